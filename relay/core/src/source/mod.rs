//! Token Sources
//!
//! A token source runs a generator on its own task and feeds a bounded relay
//! at its own pace. It is never blocked by network I/O, only by a full relay,
//! and that wait is itself cancellable.
//!
//! # Available Generators
//!
//! - **Scripted**: fixed list of fragments (tests, the plain-text endpoint)
//! - **Messages**: numbered, timestamped records (SSE and JSON endpoints)
//! - **Prompt**: prompt echo followed by a fixed vocabulary (pipeline endpoint)
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::source::{Pacing, ScriptedGenerator, TokenSource};
//! use relay_core::{relay_channel, CancellationMonitor};
//!
//! let cancel = CancellationMonitor::new();
//! let (tx, mut rx) = relay_channel(5);
//! let source = TokenSource::new(Box::new(ScriptedGenerator::new(["a", "b"])), Pacing::Immediate);
//! let handle = source.start("prompt", tx, cancel.clone());
//! ```

mod generators;
mod runner;
mod traits;

pub use generators::{
    MessageGenerator, PromptGenerator, ScriptedGenerator, PIPELINE_VOCABULARY, TEXT_STREAM_LINES,
};
pub use runner::{SourceHandle, SourceOutcome, SourceReport, TokenSource};
pub use traits::{GenerationError, GeneratorFactory, Pacing, TokenGenerator};
