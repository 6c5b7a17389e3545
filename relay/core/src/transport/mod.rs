//! HTTP Transport
//!
//! Adapts stream sessions to axum. The engine only sees a [`FrameWriter`]
//! with an explicit flush; this module supplies one backed by a streamed
//! response body, plus the router that maps endpoints to stream kinds.
//!
//! # Design Philosophy
//!
//! The transport owns three decisions and nothing else:
//! - whether the connection can stream at all (HTTP/1.0 cannot)
//! - the response headers for each stream kind
//! - how "peer went away" is detected (the response body being dropped)
//!
//! [`FrameWriter`]: crate::sink::FrameWriter

mod body;
mod http;

pub use body::{supports_incremental, BodyWriter};
pub use http::{router, HealthResponse, PipelineQuery, RelayState, SESSION_ID_HEADER};
