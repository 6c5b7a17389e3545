//! Wire Encoders
//!
//! An encoder turns tokens into wire fragments for one framing format. The
//! sink writes and flushes every fragment as soon as it is produced, so each
//! fragment must be meaningful to the peer on its own terms.
//!
//! # Formats
//!
//! | Kind | Content-Type | Per token | End of stream |
//! |------|--------------|-----------|---------------|
//! | raw-text | `text/plain` | bytes verbatim | optional summary line |
//! | event-stream | `text/event-stream` | `data: ...\n\n` | `data: [DONE]\n\n` |
//! | incremental-array | `application/json` | `[`/`,` + record | `]` |

mod event_stream;
mod json_array;
mod raw;

use thiserror::Error;

use crate::token::Token;

pub use event_stream::EventStreamEncoder;
pub use json_array::IncrementalArrayEncoder;
pub use raw::RawTextEncoder;

/// Errors produced while framing a token
#[derive(Debug, Error)]
pub enum EncodeError {
    /// A record could not be serialized
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where a token sits in the stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FramePosition {
    /// This is the first token of the stream
    pub first: bool,
    /// The relay was already closed and empty when this token was read,
    /// so no token follows it
    pub last: bool,
}

/// Framing rule for one wire format
pub trait Encoder: Send {
    /// Value of the `Content-Type` header for this format
    fn content_type(&self) -> &'static str;

    /// Fragment written and flushed before the first token, if any
    fn preamble(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Frame one token
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the token cannot be serialized.
    fn frame(&mut self, token: &Token, position: FramePosition) -> Result<Vec<u8>, EncodeError>;

    /// Fragment written after the relay drained normally
    fn terminator(&mut self, delivered: u64) -> Option<Vec<u8>>;

    /// Fragment written after the source failed
    fn error_marker(&mut self, reason: &str) -> Option<Vec<u8>>;

    /// Fragment written while the stream is idle to keep intermediaries from
    /// timing the connection out; never counted as a token
    fn keep_alive(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Selects one of the built-in encoders
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodingKind {
    /// Raw fragments, optionally followed by a delivery summary
    RawText {
        /// Append the `[pipeline complete: N tokens]` summary on normal end
        summary: bool,
    },
    /// Server-Sent Events
    EventStream,
    /// Incrementally built JSON array
    IncrementalArray,
}

impl EncodingKind {
    /// Build a fresh encoder of this kind
    #[must_use]
    pub fn encoder(self) -> Box<dyn Encoder> {
        match self {
            Self::RawText { summary } => Box::new(RawTextEncoder::new(summary)),
            Self::EventStream => Box::new(EventStreamEncoder::new()),
            Self::IncrementalArray => Box::new(IncrementalArrayEncoder::new()),
        }
    }

    /// Content type of the encoder this kind builds
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::RawText { .. } => raw::CONTENT_TYPE,
            Self::EventStream => event_stream::CONTENT_TYPE,
            Self::IncrementalArray => json_array::CONTENT_TYPE,
        }
    }
}
