//! HTTP routes for the streaming endpoints.
//!
//! Each streaming handler opens a session, spawns it on its own task against a
//! [`BodyWriter`], and returns the streamed response immediately. Headers go
//! out before the first token; from then on the session owns the body.

use axum::extract::{Query, State};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::Version;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::body::BodyWriter;
use crate::error::StreamError;
use crate::multiplexer::{StreamKind, StreamMultiplexer, StreamRequest};
use crate::sink::FrameWriter;

/// Response header carrying the session id
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Shared state handed to every handler
#[derive(Clone, Debug)]
pub struct RelayState {
    multiplexer: StreamMultiplexer,
}

impl RelayState {
    /// Wrap a multiplexer
    #[must_use]
    pub fn new(multiplexer: StreamMultiplexer) -> Self {
        Self { multiplexer }
    }

    /// The multiplexer serving streams
    #[must_use]
    pub fn multiplexer(&self) -> &StreamMultiplexer {
        &self.multiplexer
    }
}

/// Build the application router
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route(StreamKind::Sse.path(), get(stream_sse))
        .route(StreamKind::Text.path(), get(stream_text))
        .route(StreamKind::Json.path(), get(stream_json))
        .route(StreamKind::Pipeline.path(), get(stream_pipeline))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Query string of the pipeline endpoint
#[derive(Debug, Default, Deserialize)]
pub struct PipelineQuery {
    /// Prompt to run; absent or blank uses the configured default
    pub prompt: Option<String>,
}

/// Body of `GET /health`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is accepting requests
    pub status: String,
    /// Sessions currently streaming
    pub active_sessions: usize,
}

async fn stream_sse(State(state): State<RelayState>, version: Version) -> Response {
    open_stream(&state, version, StreamRequest::new(StreamKind::Sse))
}

async fn stream_text(State(state): State<RelayState>, version: Version) -> Response {
    open_stream(&state, version, StreamRequest::new(StreamKind::Text))
}

async fn stream_json(State(state): State<RelayState>, version: Version) -> Response {
    open_stream(&state, version, StreamRequest::new(StreamKind::Json))
}

async fn stream_pipeline(
    State(state): State<RelayState>,
    version: Version,
    Query(query): Query<PipelineQuery>,
) -> Response {
    let mut request = StreamRequest::new(StreamKind::Pipeline);
    request.prompt = query.prompt;
    open_stream(&state, version, request)
}

async fn health(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_sessions: state.multiplexer.registry().active_count(),
    })
}

fn open_stream(state: &RelayState, version: Version, request: StreamRequest) -> Response {
    let (mut writer, body) = BodyWriter::channel(version);
    if !writer.supports_flush() {
        warn!(?version, kind = %request.kind, "Refusing stream over non-chunked transport");
        return StreamError::TransportUnsupported.into_response();
    }

    let session = state.multiplexer.open(request);
    let id = session.id();
    let kind = session.kind();

    tokio::spawn(async move {
        match session.run(&mut writer).await {
            Ok(report) => {
                debug!(session = %report.id, outcome = %report.outcome, "Response finished");
            }
            Err(e) => warn!(session = %id, error = %e, "Stream could not start"),
        }
    });

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(kind.content_type()));
    for &(name, value) in kind.headers() {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        headers.insert(HeaderName::from_static(SESSION_ID_HEADER), value);
    }
    response
}
