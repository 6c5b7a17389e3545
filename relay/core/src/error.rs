//! Error Types
//!
//! Errors that end a request before any stream bytes are written. Failures that
//! happen mid-stream are reported through [`crate::session::SessionOutcome`]
//! instead, since the response status has already been sent by then.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors raised while opening a stream
#[derive(Debug, Error)]
pub enum StreamError {
    /// The connection cannot deliver flushed chunks incrementally
    ///
    /// Not retried: the same connection will never support flushing.
    #[error("Streaming unsupported")]
    TransportUnsupported,
}

impl StreamError {
    /// HTTP status reported for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TransportUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
