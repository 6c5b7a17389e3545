//! Token Types
//!
//! A [`Token`] is one atomic unit of generated output. Sources produce them in
//! order, the relay hands them over unchanged, and encoders turn them into wire
//! fragments. Tokens are never split, merged, duplicated, or reordered.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One unit of produced content
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// A plain text fragment, written verbatim by raw encoders
    Text(String),
    /// A structured record, serialized by the encoder in use
    Record(serde_json::Value),
}

impl Token {
    /// Create a text token
    pub fn text(fragment: impl Into<String>) -> Self {
        Self::Text(fragment.into())
    }

    /// Create a record token from any serializable payload
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the payload cannot be represented as JSON.
    pub fn record<T: Serialize>(payload: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(payload).map(Self::Record)
    }

    /// Borrow the text fragment, if this is a text token
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Record(_) => None,
        }
    }

    /// Whether this token carries a structured record
    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    /// Compact single-line representation used by the raw and event-stream encoders
    ///
    /// # Errors
    ///
    /// Fails only if a record holds a value serde_json refuses to print.
    pub fn to_compact(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Record(value) => serde_json::to_string(value),
        }
    }

    /// JSON value of this token (text becomes a JSON string)
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::Record(value) => value.clone(),
        }
    }
}

impl From<&str> for Token {
    fn from(fragment: &str) -> Self {
        Self::Text(fragment.to_string())
    }
}

impl From<String> for Token {
    fn from(fragment: String) -> Self {
        Self::Text(fragment)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Record(value) => write!(f, "{value}"),
        }
    }
}

/// A timestamped message record streamed by the SSE and JSON endpoints
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// 1-based position of the message in its stream
    pub id: u32,
    /// Message body
    pub content: String,
    /// Wall-clock time the record was generated (`HH:MM:SS`)
    pub time: String,
}

impl MessageRecord {
    /// Create a record stamped with the current local time
    pub fn now(id: u32, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            time: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }
}
