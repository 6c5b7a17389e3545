//! Stream Multiplexer
//!
//! Wires one token source to one transport sink per inbound connection. The
//! multiplexer knows nothing about HTTP: it takes a [`StreamRequest`] and a
//! [`FrameWriter`], and everything it builds is owned by the resulting
//! [`StreamSession`].
//!
//! # Architecture
//!
//! ```text
//!   StreamRequest ──► StreamMultiplexer::open
//!                        │
//!                        ├── SourceCatalog ──► TokenSource (generator + pacing)
//!                        ├── relay_channel(capacity)
//!                        ├── CancellationMonitor
//!                        ├── TransportSink (encoder for the kind)
//!                        └── SessionRegistry::register
//!                        ▼
//!                  StreamSession::run(writer)
//! ```

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationMonitor;
use crate::config::StreamConfig;
use crate::encoding::EncodingKind;
use crate::error::StreamError;
use crate::relay::relay_channel;
use crate::session::{SessionId, SessionParts, SessionRegistry, SessionReport, StreamSession};
use crate::sink::{FrameWriter, TransportSink};
use crate::source::{
    GeneratorFactory, MessageGenerator, Pacing, PromptGenerator, ScriptedGenerator, TokenGenerator,
    TokenSource, TEXT_STREAM_LINES,
};

// ============================================================================
// Stream Kinds
// ============================================================================

/// The streaming endpoints a connection can request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Server-Sent Events carrying message records
    Sse,
    /// Plain text lines
    Text,
    /// Incrementally built JSON array of message records
    Json,
    /// Prompt-driven token pipeline with a delivery summary
    Pipeline,
}

impl StreamKind {
    /// Every stream kind
    pub const ALL: [Self; 4] = [Self::Sse, Self::Text, Self::Json, Self::Pipeline];

    /// Wire encoding used for this kind
    #[must_use]
    pub fn encoding(self) -> EncodingKind {
        match self {
            Self::Sse => EncodingKind::EventStream,
            Self::Text => EncodingKind::RawText { summary: false },
            Self::Json => EncodingKind::IncrementalArray,
            Self::Pipeline => EncodingKind::RawText { summary: true },
        }
    }

    /// `Content-Type` of the response body
    #[must_use]
    pub fn content_type(self) -> &'static str {
        self.encoding().content_type()
    }

    /// Extra response headers sent with every stream of this kind
    #[must_use]
    pub fn headers(self) -> &'static [(&'static str, &'static str)] {
        const STREAMING: &[(&str, &str)] = &[
            ("cache-control", "no-cache"),
            ("connection", "keep-alive"),
        ];
        const EVENT_STREAM: &[(&str, &str)] = &[
            ("cache-control", "no-cache"),
            ("connection", "keep-alive"),
            ("access-control-allow-origin", "*"),
        ];
        match self {
            Self::Sse => EVENT_STREAM,
            Self::Text | Self::Json | Self::Pipeline => STREAMING,
        }
    }

    /// Route serving this kind
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Sse => "/stream/sse",
            Self::Text => "/stream/text",
            Self::Json => "/stream/json",
            Self::Pipeline => "/stream/pipeline",
        }
    }

    /// Short lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::Text => "text",
            Self::Json => "json",
            Self::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for one stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamRequest {
    /// Endpoint requested
    pub kind: StreamKind,
    /// Prompt for prompt-driven kinds; blank means "use the default"
    pub prompt: Option<String>,
}

impl StreamRequest {
    /// Request a stream with no prompt
    #[must_use]
    pub fn new(kind: StreamKind) -> Self {
        Self { kind, prompt: None }
    }

    /// Attach a prompt
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

// ============================================================================
// Source Catalog
// ============================================================================

#[derive(Clone)]
struct SourceProfile {
    factory: Arc<dyn GeneratorFactory>,
    pacing: Pacing,
}

impl SourceProfile {
    fn new<F>(factory: F, pacing: Pacing) -> Self
    where
        F: GeneratorFactory + 'static,
    {
        Self {
            factory: Arc::new(factory),
            pacing,
        }
    }
}

/// Which generator and pacing each stream kind uses
#[derive(Clone)]
pub struct SourceCatalog {
    sse: SourceProfile,
    text: SourceProfile,
    json: SourceProfile,
    pipeline: SourceProfile,
}

impl fmt::Debug for SourceCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCatalog")
            .field("sse", &self.sse.pacing)
            .field("text", &self.text.pacing)
            .field("json", &self.json.pacing)
            .field("pipeline", &self.pipeline.pacing)
            .finish()
    }
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

impl SourceCatalog {
    /// Build the built-in catalog from stream settings
    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Self {
        let sse_count = config.sse_messages;
        let json_count = config.json_messages;

        let pipeline_pacing = if config.token_jitter.is_zero() {
            Pacing::Fixed(config.token_delay)
        } else {
            Pacing::Jitter {
                base: config.token_delay,
                spread: config.token_jitter,
            }
        };

        Self {
            sse: SourceProfile::new(
                move || -> Box<dyn TokenGenerator> {
                    Box::new(MessageGenerator::new("SSE message number {n}", sse_count))
                },
                fixed(config.sse_interval),
            ),
            text: SourceProfile::new(
                || -> Box<dyn TokenGenerator> {
                    Box::new(ScriptedGenerator::new(TEXT_STREAM_LINES.iter().copied()))
                },
                fixed(config.text_interval),
            ),
            json: SourceProfile::new(
                move || -> Box<dyn TokenGenerator> {
                    Box::new(MessageGenerator::new("JSON stream message {n}", json_count))
                },
                fixed(config.json_interval),
            ),
            pipeline: SourceProfile::new(
                || -> Box<dyn TokenGenerator> { Box::new(PromptGenerator::new()) },
                pipeline_pacing,
            ),
        }
    }

    /// Replace the generator and pacing used for one kind
    #[must_use]
    pub fn with_profile<F>(mut self, kind: StreamKind, factory: F, pacing: Pacing) -> Self
    where
        F: GeneratorFactory + 'static,
    {
        *self.profile_mut(kind) = SourceProfile::new(factory, pacing);
        self
    }

    /// Pacing configured for a kind
    #[must_use]
    pub fn pacing(&self, kind: StreamKind) -> Pacing {
        self.profile(kind).pacing
    }

    /// Build a fresh token source for a kind
    #[must_use]
    pub fn source_for(&self, kind: StreamKind) -> TokenSource {
        let profile = self.profile(kind);
        TokenSource::new(profile.factory.create(), profile.pacing)
    }

    fn profile(&self, kind: StreamKind) -> &SourceProfile {
        match kind {
            StreamKind::Sse => &self.sse,
            StreamKind::Text => &self.text,
            StreamKind::Json => &self.json,
            StreamKind::Pipeline => &self.pipeline,
        }
    }

    fn profile_mut(&mut self, kind: StreamKind) -> &mut SourceProfile {
        match kind {
            StreamKind::Sse => &mut self.sse,
            StreamKind::Text => &mut self.text,
            StreamKind::Json => &mut self.json,
            StreamKind::Pipeline => &mut self.pipeline,
        }
    }
}

fn fixed(interval: Duration) -> Pacing {
    if interval.is_zero() {
        Pacing::Immediate
    } else {
        Pacing::Fixed(interval)
    }
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Per-session limits applied by the multiplexer
#[derive(Clone, Debug, PartialEq, Eq)]
struct SessionSettings {
    capacity: usize,
    deadline: Option<Duration>,
    keep_alive: Option<Duration>,
    default_prompt: String,
}

/// Builds and runs stream sessions
///
/// Cheap to clone; clones share the catalog and the registry.
#[derive(Clone, Debug)]
pub struct StreamMultiplexer {
    catalog: Arc<SourceCatalog>,
    registry: SessionRegistry,
    settings: Arc<SessionSettings>,
}

impl StreamMultiplexer {
    /// Create a multiplexer with the built-in catalog
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            catalog: Arc::new(SourceCatalog::from_config(config)),
            registry: SessionRegistry::with_history_limit(config.history_limit),
            settings: Arc::new(SessionSettings {
                capacity: config.relay_capacity.max(1),
                deadline: config.deadline,
                keep_alive: config.keep_alive,
                default_prompt: config.default_prompt.clone(),
            }),
        }
    }

    /// Replace the source catalog
    #[must_use]
    pub fn with_catalog(mut self, catalog: SourceCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// Registry of live sessions
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Relay capacity given to every session
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    /// Assemble and register a session for `request`
    ///
    /// Nothing runs until [`StreamSession::run`] is called.
    #[must_use]
    pub fn open(&self, request: StreamRequest) -> StreamSession {
        let kind = request.kind;
        let prompt = request
            .prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_prompt.clone());

        let (tx, rx) = relay_channel(self.settings.capacity);
        let cancel = CancellationMonitor::new();
        let delivered = Arc::new(AtomicU64::new(0));
        let sink = TransportSink::new(rx, cancel.clone(), kind.encoding().encoder())
            .with_keep_alive(self.settings.keep_alive)
            .with_counter(Arc::clone(&delivered));

        StreamSession::assemble(SessionParts {
            id: SessionId::new(),
            kind,
            prompt,
            source: self.catalog.source_for(kind),
            relay: tx,
            sink,
            cancel,
            deadline: self.settings.deadline,
            registry: self.registry.clone(),
            delivered,
        })
    }

    /// Open a session and stream it into `writer`
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::TransportUnsupported`] if `writer` cannot flush
    /// incrementally; no session is registered in that case.
    pub async fn serve<W>(
        &self,
        request: StreamRequest,
        writer: &mut W,
    ) -> Result<SessionReport, StreamError>
    where
        W: FrameWriter + ?Sized,
    {
        if !writer.supports_flush() {
            return Err(StreamError::TransportUnsupported);
        }
        self.open(request).run(writer).await
    }
}
