//! Streaming response body writer.
//!
//! Bridges the sink's write/flush model onto an axum response body. Writes
//! accumulate in a buffer; a flush hands the buffer to hyper as one body chunk
//! through a capacity-1 channel, so a flush waits until hyper has taken the
//! previous chunk. When the response body is dropped (the peer went away) the
//! channel closes and both flushes and the disconnect future observe it.

use std::io;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Version;
use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::sink::{FrameWriter, WriteError};

/// Chunks queued between the sink and hyper
const BODY_CHANNEL_CAPACITY: usize = 1;

/// [`FrameWriter`] feeding a streamed HTTP response body
#[derive(Debug)]
pub struct BodyWriter {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    buffer: BytesMut,
    incremental: bool,
}

impl BodyWriter {
    /// Create a writer and the response body it feeds
    ///
    /// `version` decides whether flushes can reach the peer incrementally:
    /// HTTP/1.0 has no chunked transfer encoding, so it cannot.
    #[must_use]
    pub fn channel(version: Version) -> (Self, Body) {
        let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let writer = Self {
            tx,
            buffer: BytesMut::with_capacity(1024),
            incremental: supports_incremental(version),
        };
        (writer, Body::from_stream(ReceiverStream::new(rx)))
    }
}

/// Whether responses over this protocol version can be streamed
#[must_use]
pub fn supports_incremental(version: Version) -> bool {
    version != Version::HTTP_09 && version != Version::HTTP_10
}

#[async_trait]
impl FrameWriter for BodyWriter {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        if self.tx.is_closed() {
            return Err(WriteError::PeerGone);
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| WriteError::PeerGone)
    }

    fn supports_flush(&self) -> bool {
        self.incremental
    }

    fn disconnected(&self) -> BoxFuture<'static, ()> {
        let tx = self.tx.clone();
        async move { tx.closed().await }.boxed()
    }
}
