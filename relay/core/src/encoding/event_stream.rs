//! Server-Sent Events framing.
//!
//! Each token becomes one event: a `data:` line per payload line, then a blank
//! line. Records are compact JSON, so they always fit on one line. The stream
//! ends with the `data: [DONE]` sentinel event.

use super::{EncodeError, Encoder, FramePosition};
use crate::token::Token;

pub(super) const CONTENT_TYPE: &str = "text/event-stream";

/// Payload of the terminal sentinel event
pub const DONE_SENTINEL: &str = "[DONE]";

/// Frames tokens as Server-Sent Events
#[derive(Clone, Debug, Default)]
pub struct EventStreamEncoder;

impl EventStreamEncoder {
    /// Create an encoder
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn event(name: Option<&str>, payload: &str) -> Vec<u8> {
        let mut out = String::with_capacity(payload.len() + 16);
        if let Some(name) = name {
            out.push_str("event: ");
            out.push_str(name);
            out.push('\n');
        }
        for line in payload.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out.into_bytes()
    }
}

impl Encoder for EventStreamEncoder {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    fn preamble(&mut self) -> Option<Vec<u8>> {
        Some(b": stream open\n\n".to_vec())
    }

    fn frame(&mut self, token: &Token, _position: FramePosition) -> Result<Vec<u8>, EncodeError> {
        Ok(Self::event(None, &token.to_compact()?))
    }

    fn terminator(&mut self, _delivered: u64) -> Option<Vec<u8>> {
        Some(Self::event(None, DONE_SENTINEL))
    }

    fn error_marker(&mut self, reason: &str) -> Option<Vec<u8>> {
        Some(Self::event(Some("error"), reason))
    }

    fn keep_alive(&self) -> Option<Vec<u8>> {
        Some(b": keep-alive\n\n".to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::MessageRecord;

    /// Minimal SSE parser: returns (event name, data) per dispatched event
    fn parse(stream: &str) -> Vec<(String, String)> {
        let mut events = Vec::new();
        for block in stream.split("\n\n").filter(|b| !b.is_empty()) {
            let mut name = "message".to_string();
            let mut data: Vec<&str> = Vec::new();
            for line in block.lines() {
                if line.starts_with(':') {
                    continue;
                }
                if let Some(v) = line.strip_prefix("event: ") {
                    name = v.to_string();
                } else if let Some(v) = line.strip_prefix("data: ") {
                    data.push(v);
                }
            }
            if !data.is_empty() {
                events.push((name, data.join("\n")));
            }
        }
        events
    }

    #[test]
    fn test_two_tokens_then_done() {
        let mut encoder = EventStreamEncoder::new();
        let mut wire = Vec::new();
        wire.extend(encoder.preamble().unwrap());
        let first = FramePosition {
            first: true,
            last: false,
        };
        let last = FramePosition {
            first: false,
            last: true,
        };
        wire.extend(encoder.frame(&Token::text("A"), first).unwrap());
        wire.extend(encoder.frame(&Token::text("B"), last).unwrap());
        wire.extend(encoder.terminator(2).unwrap());

        let events = parse(&String::from_utf8(wire).unwrap());
        assert_eq!(
            events,
            vec![
                ("message".to_string(), "A".to_string()),
                ("message".to_string(), "B".to_string()),
                ("message".to_string(), DONE_SENTINEL.to_string()),
            ]
        );
    }

    #[test]
    fn test_record_is_single_data_line() {
        let mut encoder = EventStreamEncoder::new();
        let record = MessageRecord {
            id: 1,
            content: "hi".into(),
            time: "10:00:00".into(),
        };
        let out = encoder
            .frame(&Token::record(&record).unwrap(), FramePosition::default())
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.trim_end().lines().count(), 1);
        let payload = text
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .unwrap();
        let parsed: MessageRecord = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_multiline_text_keeps_newlines() {
        let mut encoder = EventStreamEncoder::new();
        let out = encoder
            .frame(&Token::text("one\ntwo"), FramePosition::default())
            .unwrap();
        let events = parse(&String::from_utf8(out).unwrap());
        assert_eq!(events, vec![("message".to_string(), "one\ntwo".to_string())]);
    }

    #[test]
    fn test_error_event() {
        let mut encoder = EventStreamEncoder::new();
        let out = encoder.error_marker("generation failed").unwrap();
        let events = parse(&String::from_utf8(out).unwrap());
        assert_eq!(
            events,
            vec![("error".to_string(), "generation failed".to_string())]
        );
    }

    #[test]
    fn test_keep_alive_is_a_comment() {
        let encoder = EventStreamEncoder::new();
        let out = encoder.keep_alive().unwrap();
        assert!(parse(&String::from_utf8(out).unwrap()).is_empty());
    }
}
