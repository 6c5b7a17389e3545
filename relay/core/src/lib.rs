//! Relay Core - Decoupled Token Streaming Engine
//!
//! This crate streams generated output to HTTP clients while keeping
//! generation and network I/O on separate tasks. A token source produces
//! tokens at its own pace, a bounded relay hands them over, and a transport
//! sink frames and flushes each one the moment it is read. A shared
//! cancellation monitor stops both sides when the client goes away.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        HTTP (axum)                               │
//! │  /stream/sse   /stream/text   /stream/json   /stream/pipeline    │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ StreamRequest + BodyWriter
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                        RELAY CORE                                │
//! │                    StreamMultiplexer ──► SessionRegistry         │
//! │                                 │                                │
//! │   ┌─────────────┐   relay   ┌───┴───────────┐   frames           │
//! │   │ TokenSource │ ────────► │ TransportSink │ ──────► FrameWriter│
//! │   │ (own task)  │ capacity C│  + Encoder    │   write + flush    │
//! │   └──────┬──────┘           └───────┬───────┘                    │
//! │          └──── CancellationMonitor ─┘                            │
//! │               (disconnect, deadline, shutdown)                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`TokenSource`]: runs a [`TokenGenerator`] on its own task
//! - [`RelaySender`] / [`RelayReceiver`]: the bounded relay channel
//! - [`TransportSink`]: reads, encodes, writes and flushes each token
//! - [`CancellationMonitor`]: one-way, level-triggered cancellation
//! - [`StreamMultiplexer`]: builds one session per connection
//! - [`SessionRegistry`]: live sessions and recent reports
//!
//! # Quick Start
//!
//! ```ignore
//! use relay_core::{load_config, router, RelayState, StreamMultiplexer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let multiplexer = StreamMultiplexer::new(&config.stream);
//!     let app = router(RelayState::new(multiplexer));
//!
//!     let listener = tokio::net::TcpListener::bind(config.server.bind).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`token`]: token and message record types
//! - [`relay`]: bounded relay channel
//! - [`source`]: generators, pacing and the source task
//! - [`encoding`]: raw text, Server-Sent Events and incremental JSON framing
//! - [`sink`]: the transport sink and the frame writer abstraction
//! - [`cancel`]: cancellation monitor and disconnect/deadline watcher
//! - [`session`]: stream sessions and the session registry
//! - [`multiplexer`]: stream kinds, source catalog, session assembly
//! - [`transport`]: axum router and streamed response body writer
//! - [`config`]: TOML, environment and CLI configuration

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod config;
pub mod encoding;
pub mod error;
pub mod multiplexer;
pub mod relay;
pub mod session;
pub mod sink;
pub mod source;
pub mod token;
pub mod transport;

// Core re-exports
pub use cancel::{CancelReason, CancellationMonitor, WatchGuard};
pub use error::StreamError;
pub use relay::{relay_channel, Received, RelayReceiver, RelaySender, SendOutcome};
pub use token::{MessageRecord, Token};

// Pipeline re-exports
pub use encoding::{EncodeError, Encoder, EncodingKind, FramePosition};
pub use sink::{FrameWriter, MemoryWriter, SinkReport, TransportSink, WriteError};
pub use source::{
    GenerationError, GeneratorFactory, MessageGenerator, Pacing, PromptGenerator,
    ScriptedGenerator, SourceHandle, SourceOutcome, SourceReport, TokenGenerator, TokenSource,
};

// Session re-exports
pub use multiplexer::{SourceCatalog, StreamKind, StreamMultiplexer, StreamRequest};
pub use session::{
    SessionId, SessionOutcome, SessionRegistry, SessionReport, SessionSnapshot, StreamSession,
};

// Transport re-exports
pub use transport::{router, BodyWriter, RelayState};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env, ConfigError,
    ConfigOverrides, ConfigSource, RelayConfig, ServerConfig, StreamConfig,
};
