//! Frame Writers
//!
//! The sink's view of the outgoing connection: an append-only byte sink with an
//! explicit flush. A flush makes everything written since the previous flush
//! visible to the peer as one chunk.

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use thiserror::Error;

/// Errors raised by a [`FrameWriter`]
#[derive(Debug, Error)]
pub enum WriteError {
    /// The peer is no longer reading
    #[error("peer disconnected")]
    PeerGone,

    /// The underlying transport failed
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunked output stream with an explicit flush primitive
#[async_trait]
pub trait FrameWriter: Send {
    /// Append bytes to the pending chunk
    async fn write(&mut self, bytes: &[u8]) -> Result<(), WriteError>;

    /// Deliver the pending chunk to the peer
    async fn flush(&mut self) -> Result<(), WriteError>;

    /// Whether flushes reach the peer incrementally
    ///
    /// A writer that would buffer the whole response must return `false`;
    /// streaming over it is refused instead of silently buffering.
    fn supports_flush(&self) -> bool {
        true
    }

    /// Resolves when the transport observes that the peer went away
    ///
    /// Writers without disconnect detection never resolve.
    fn disconnected(&self) -> BoxFuture<'static, ()> {
        future::pending().boxed()
    }
}

/// In-memory writer that records every flushed chunk
#[derive(Clone, Debug)]
pub struct MemoryWriter {
    pending: Vec<u8>,
    chunks: Vec<Vec<u8>>,
    flush_supported: bool,
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWriter {
    /// Create a writer that supports incremental flushing
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            chunks: Vec::new(),
            flush_supported: true,
        }
    }

    /// Create a writer that reports no incremental flush support
    #[must_use]
    pub fn buffered() -> Self {
        Self {
            flush_supported: false,
            ..Self::new()
        }
    }

    /// Chunks delivered so far, one per flush
    #[must_use]
    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    /// Every flushed byte, concatenated
    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        self.chunks.concat()
    }

    /// Flushed body as UTF-8 (lossy)
    #[must_use]
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body()).into_owned()
    }

    /// Bytes written but not yet flushed
    #[must_use]
    pub fn unflushed(&self) -> &[u8] {
        &self.pending
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        if !self.pending.is_empty() {
            self.chunks.push(std::mem::take(&mut self.pending));
        }
        Ok(())
    }

    fn supports_flush(&self) -> bool {
        self.flush_supported
    }
}
