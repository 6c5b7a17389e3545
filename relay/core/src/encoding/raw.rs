//! Raw text framing: token bytes verbatim.

use super::{EncodeError, Encoder, FramePosition};
use crate::token::Token;

pub(super) const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Writes each token's bytes with no framing
#[derive(Clone, Debug, Default)]
pub struct RawTextEncoder {
    summary: bool,
}

impl RawTextEncoder {
    /// Create an encoder; `summary` appends a delivery summary on normal end
    #[must_use]
    pub fn new(summary: bool) -> Self {
        Self { summary }
    }

    /// The summary line written after `delivered` tokens
    #[must_use]
    pub fn summary_line(delivered: u64) -> String {
        format!("\n\n[pipeline complete: {delivered} tokens]\n")
    }
}

impl Encoder for RawTextEncoder {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    fn frame(&mut self, token: &Token, _position: FramePosition) -> Result<Vec<u8>, EncodeError> {
        Ok(token.to_compact()?.into_bytes())
    }

    fn terminator(&mut self, delivered: u64) -> Option<Vec<u8>> {
        self.summary
            .then(|| Self::summary_line(delivered).into_bytes())
    }

    fn error_marker(&mut self, reason: &str) -> Option<Vec<u8>> {
        Some(format!("\n[stream error: {reason}]\n").into_bytes())
    }
}
