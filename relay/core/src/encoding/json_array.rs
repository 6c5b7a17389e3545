//! Incremental JSON array framing.
//!
//! The opening bracket goes out with the first record and the closing bracket
//! with the last one (or with the terminator when the end of the stream was
//! not yet known). Concatenating every fragment always yields a valid array.

use super::{EncodeError, Encoder, FramePosition};
use crate::token::Token;

pub(super) const CONTENT_TYPE: &str = "application/json; charset=utf-8";

const INDENT: &str = "  ";

/// Frames tokens as elements of one JSON array
#[derive(Clone, Debug, Default)]
pub struct IncrementalArrayEncoder {
    opened: bool,
    closed: bool,
}

impl IncrementalArrayEncoder {
    /// Create an encoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn element(&mut self, value: &serde_json::Value, close: bool) -> Result<Vec<u8>, EncodeError> {
        let pretty = serde_json::to_string_pretty(value)?;

        let mut out = String::with_capacity(pretty.len() + 8);
        out.push_str(if self.opened { ",\n" } else { "[\n" });
        out.push_str(INDENT);
        out.push_str(&pretty.replace('\n', &format!("\n{INDENT}")));
        self.opened = true;

        if close {
            out.push_str("\n]");
            self.closed = true;
        }
        Ok(out.into_bytes())
    }
}

impl Encoder for IncrementalArrayEncoder {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    fn frame(&mut self, token: &Token, position: FramePosition) -> Result<Vec<u8>, EncodeError> {
        self.element(&token.to_value(), position.last)
    }

    fn terminator(&mut self, _delivered: u64) -> Option<Vec<u8>> {
        if self.closed {
            return None;
        }
        self.closed = true;
        Some(if self.opened { b"\n]".to_vec() } else { b"[]".to_vec() })
    }

    fn error_marker(&mut self, reason: &str) -> Option<Vec<u8>> {
        if self.closed {
            return None;
        }
        self.element(&serde_json::json!({ "error": reason }), true).ok()
    }
}
