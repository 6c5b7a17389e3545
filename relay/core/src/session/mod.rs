//! Stream Sessions
//!
//! A session is one streamed response: a relay, a cancellation monitor, a
//! token source and a transport sink, all owned together for the lifetime of
//! the connection.
//!
//! # Design Philosophy
//!
//! The source and the sink never share anything but the relay and the
//! cancellation monitor. Running a session spawns the source on its own task,
//! drives the sink on the caller's task, then joins the source so the report
//! accounts for both sides.

mod registry;

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::cancel::{CancelReason, CancellationMonitor};
use crate::error::StreamError;
use crate::multiplexer::StreamKind;
use crate::relay::RelaySender;
use crate::sink::{FrameWriter, TransportSink};
use crate::source::TokenSource;
use crate::token::Token;

pub use registry::{Registration, SessionRegistry, SessionSnapshot, DEFAULT_HISTORY_LIMIT};

/// Unique identifier of a stream session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a session ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The source finished and every token was delivered
    Completed,
    /// The session was cancelled; already flushed bytes stand
    Cancelled(CancelReason),
    /// The source or the sink failed
    Failed(String),
}

impl SessionOutcome {
    /// Whether the stream ran to completion
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Cancelled(reason) => write!(f, "cancelled ({reason})"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Summary of a finished session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    /// Session identifier
    pub id: SessionId,
    /// Endpoint that was served
    pub kind: StreamKind,
    /// Tokens flushed to the peer
    pub delivered: u64,
    /// Tokens the source handed to the relay
    pub emitted: u64,
    /// How the session ended
    pub outcome: SessionOutcome,
    /// Wall time from open to completion
    pub elapsed: Duration,
}

/// One multiplexed stream, ready to run against a writer
pub struct StreamSession {
    id: SessionId,
    kind: StreamKind,
    prompt: String,
    source: TokenSource,
    relay: RelaySender<Token>,
    sink: TransportSink,
    cancel: CancellationMonitor,
    deadline: Option<Duration>,
    registry: SessionRegistry,
    registration: Registration,
    opened: Instant,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Everything a session is assembled from
pub(crate) struct SessionParts {
    pub(crate) id: SessionId,
    pub(crate) kind: StreamKind,
    pub(crate) prompt: String,
    pub(crate) source: TokenSource,
    pub(crate) relay: RelaySender<Token>,
    pub(crate) sink: TransportSink,
    pub(crate) cancel: CancellationMonitor,
    pub(crate) deadline: Option<Duration>,
    pub(crate) registry: SessionRegistry,
    pub(crate) delivered: Arc<AtomicU64>,
}

impl StreamSession {
    pub(crate) fn assemble(parts: SessionParts) -> Self {
        let registration = parts.registry.register(
            parts.id,
            parts.kind,
            parts.cancel.clone(),
            parts.delivered,
        );
        Self {
            id: parts.id,
            kind: parts.kind,
            prompt: parts.prompt,
            source: parts.source,
            relay: parts.relay,
            sink: parts.sink,
            cancel: parts.cancel,
            deadline: parts.deadline,
            registry: parts.registry,
            registration,
            opened: Instant::now(),
        }
    }

    /// Session identifier
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Endpoint being served
    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// The session's cancellation monitor
    #[must_use]
    pub fn cancellation(&self) -> &CancellationMonitor {
        &self.cancel
    }

    /// Stream the session into `writer` until it ends
    ///
    /// The report is recorded in the registry before the session deregisters,
    /// so an observer that sees the session gone always finds its report.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::TransportUnsupported`] without starting the
    /// source if `writer` cannot flush incrementally.
    pub async fn run<W>(self, writer: &mut W) -> Result<SessionReport, StreamError>
    where
        W: FrameWriter + ?Sized,
    {
        if !writer.supports_flush() {
            return Err(StreamError::TransportUnsupported);
        }

        let Self {
            id,
            kind,
            prompt,
            source,
            relay,
            sink,
            cancel,
            deadline,
            registry,
            registration,
            opened,
        } = self;

        info!(session = %id, ?kind, "Stream opened");

        let handle = source.start(prompt, relay, cancel.clone());
        let watch = cancel.watch(writer.disconnected(), deadline);

        let sink_report = sink.run(writer).await;
        drop(watch);
        let source_report = handle.join().await;

        let report = SessionReport {
            id,
            kind,
            delivered: sink_report.delivered,
            emitted: source_report.emitted,
            outcome: sink_report.outcome,
            elapsed: opened.elapsed(),
        };

        info!(
            session = %id,
            delivered = report.delivered,
            emitted = report.emitted,
            outcome = %report.outcome,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "Stream closed"
        );

        registry.record(report.clone());
        drop(registration);
        Ok(report)
    }
}
