//! Transport Sink
//!
//! Consumes the relay on behalf of one connection. Every token is framed,
//! written and flushed before the next one is read, so the peer observes each
//! unit as soon as the sink handles it.
//!
//! # Architecture
//!
//! ```text
//! RelayReceiver ──► TransportSink ──► Encoder ──► FrameWriter ──► peer
//!                        ▲
//!                        └── CancellationMonitor (checked every iteration)
//! ```
//!
//! The sink never closes the relay. It ends when the relay reports a terminal
//! signal, when the session is cancelled, or when the writer reports that the
//! peer is gone (which cancels the session so the source stops too).

mod writer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::{CancelReason, CancellationMonitor};
use crate::encoding::{Encoder, FramePosition};
use crate::relay::{Received, RelayReceiver};
use crate::session::SessionOutcome;
use crate::token::Token;

pub use writer::{FrameWriter, MemoryWriter, WriteError};

/// Summary of one sink run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkReport {
    /// Tokens written and flushed to the peer
    pub delivered: u64,
    /// How the run ended
    pub outcome: SessionOutcome,
}

/// What woke the sink loop
enum Step {
    Cancelled,
    Received(Received<Token>),
    Idle,
}

/// Consumer side of a session
pub struct TransportSink {
    relay: RelayReceiver<Token>,
    cancel: CancellationMonitor,
    encoder: Box<dyn Encoder>,
    delivered: Arc<AtomicU64>,
    keep_alive: Option<Duration>,
}

impl TransportSink {
    /// Create a sink over a relay receiver
    pub fn new(
        relay: RelayReceiver<Token>,
        cancel: CancellationMonitor,
        encoder: Box<dyn Encoder>,
    ) -> Self {
        Self {
            relay,
            cancel,
            encoder,
            delivered: Arc::new(AtomicU64::new(0)),
            keep_alive: None,
        }
    }

    /// Write the encoder's keep-alive fragment after `interval` without tokens
    #[must_use]
    pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval.filter(|d| !d.is_zero());
        self
    }

    /// Share an existing delivered counter (e.g. with the session registry)
    #[must_use]
    pub fn with_counter(mut self, delivered: Arc<AtomicU64>) -> Self {
        self.delivered = delivered;
        self
    }

    /// Drive the sink until the stream ends
    ///
    /// Returns once the relay is drained or faulted, the session is cancelled,
    /// or the peer goes away. Never returns an error: the outcome is reported.
    pub async fn run<W>(mut self, writer: &mut W) -> SinkReport
    where
        W: FrameWriter + ?Sized,
    {
        if let Some(preamble) = self.encoder.preamble() {
            if let Err(e) = emit(writer, &preamble).await {
                return self.write_failed(e);
            }
        }

        let mut delivered: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return self.cancelled(delivered);
            }

            let keep_alive = self.keep_alive;
            let idle = async move {
                match keep_alive {
                    Some(interval) => tokio::time::sleep(interval).await,
                    None => std::future::pending().await,
                }
            };

            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Cancelled,
                received = self.relay.receive() => Step::Received(received),
                () = idle => Step::Idle,
            };

            match step {
                Step::Cancelled => return self.cancelled(delivered),
                Step::Idle => {
                    if let Some(ping) = self.encoder.keep_alive() {
                        if let Err(e) = emit(writer, &ping).await {
                            return self.write_failed(e);
                        }
                    }
                }
                Step::Received(Received::Token(token)) => {
                    let position = FramePosition {
                        first: delivered == 0,
                        last: self.relay.is_completed(),
                    };
                    let bytes = match self.encoder.frame(&token, position) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode token, stopping stream");
                            self.cancel.cancel(CancelReason::SinkFailed);
                            return self.report(delivered, SessionOutcome::Failed(e.to_string()));
                        }
                    };
                    if let Err(e) = emit(writer, &bytes).await {
                        return self.write_failed(e);
                    }
                    delivered += 1;
                    self.delivered.store(delivered, Ordering::Release);
                }
                Step::Received(Received::Drained) => {
                    if let Some(end) = self.encoder.terminator(delivered) {
                        if let Err(e) = emit(writer, &end).await {
                            return self.write_failed(e);
                        }
                    }
                    debug!(delivered, "Stream drained");
                    return self.report(delivered, SessionOutcome::Completed);
                }
                Step::Received(Received::Failed(reason)) => {
                    warn!(reason = %reason, delivered, "Source failed, writing error marker");
                    if let Some(marker) = self.encoder.error_marker(&reason) {
                        if let Err(e) = emit(writer, &marker).await {
                            return self.write_failed(e);
                        }
                    }
                    return self.report(delivered, SessionOutcome::Failed(reason));
                }
            }
        }
    }

    fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    fn report(&self, delivered: u64, outcome: SessionOutcome) -> SinkReport {
        SinkReport { delivered, outcome }
    }

    fn cancelled(&self, delivered: u64) -> SinkReport {
        let reason = self.cancel.reason().unwrap_or(CancelReason::Requested);
        debug!(%reason, delivered, "Sink stopped by cancellation");
        self.report(delivered, SessionOutcome::Cancelled(reason))
    }

    fn write_failed(&self, error: WriteError) -> SinkReport {
        let delivered = self.delivered();
        match error {
            WriteError::PeerGone => {
                self.cancel.cancel(CancelReason::PeerDisconnected);
                debug!(delivered, "Peer gone during write");
                self.cancelled(delivered)
            }
            WriteError::Io(e) => {
                warn!(error = %e, delivered, "Write failed, stopping stream");
                self.cancel.cancel(CancelReason::SinkFailed);
                self.report(delivered, SessionOutcome::Failed(e.to_string()))
            }
        }
    }
}

/// Write one fragment and make it visible to the peer
async fn emit<W>(writer: &mut W, bytes: &[u8]) -> Result<(), WriteError>
where
    W: FrameWriter + ?Sized,
{
    writer.write(bytes).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::encoding::EncodingKind;
    use crate::relay::{relay_channel, RelaySender};

    fn sink(
        kind: EncodingKind,
        capacity: usize,
    ) -> (RelaySender<Token>, TransportSink, CancellationMonitor) {
        let (tx, rx) = relay_channel(capacity);
        let cancel = CancellationMonitor::new();
        (tx, TransportSink::new(rx, cancel.clone(), kind.encoder()), cancel)
    }

    /// Writer whose flushes fail once a budget is used up
    struct LimitedWriter {
        inner: MemoryWriter,
        flushes_left: usize,
    }

    #[async_trait]
    impl FrameWriter for LimitedWriter {
        async fn write(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
            self.inner.write(bytes).await
        }

        async fn flush(&mut self) -> Result<(), WriteError> {
            if self.flushes_left == 0 {
                return Err(WriteError::PeerGone);
            }
            self.flushes_left -= 1;
            self.inner.flush().await
        }
    }

    /// Writer that cancels the session on its n-th flush
    struct CancellingWriter {
        inner: MemoryWriter,
        cancel: CancellationMonitor,
        flushes: AtomicUsize,
        cancel_on: usize,
    }

    #[async_trait]
    impl FrameWriter for CancellingWriter {
        async fn write(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
            self.inner.write(bytes).await
        }

        async fn flush(&mut self) -> Result<(), WriteError> {
            self.inner.flush().await?;
            if self.flushes.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_on {
                self.cancel.cancel(CancelReason::PeerDisconnected);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivers_all_tokens_in_order() {
        let (tx, sink, cancel) = sink(EncodingKind::RawText { summary: false }, 8);
        for t in ["a", "b", "c"] {
            tx.send(Token::text(t), &cancel).await;
        }
        tx.close();

        let mut writer = MemoryWriter::new();
        let report = sink.run(&mut writer).await;

        assert_eq!(report.delivered, 3);
        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(writer.chunks(), &[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn test_summary_terminator_uses_delivered_count() {
        let (tx, sink, cancel) = sink(EncodingKind::RawText { summary: true }, 8);
        for t in ["a", "b", "c"] {
            tx.send(Token::text(t), &cancel).await;
        }
        tx.close();

        let mut writer = MemoryWriter::new();
        sink.run(&mut writer).await;
        assert_eq!(
            writer.body_string(),
            "abc\n\n[pipeline complete: 3 tokens]\n"
        );
    }

    #[tokio::test]
    async fn test_sse_preamble_is_flushed_first() {
        let (tx, sink, _cancel) = sink(EncodingKind::EventStream, 1);
        tx.close();

        let mut writer = MemoryWriter::new();
        let report = sink.run(&mut writer).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(writer.chunks()[0], b": stream open\n\n".to_vec());
        assert!(writer.body_string().ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn test_json_array_closes_with_last_known_token() {
        let (tx, sink, cancel) = sink(EncodingKind::IncrementalArray, 4);
        tx.send(Token::text("A"), &cancel).await;
        tx.send(Token::text("B"), &cancel).await;
        tx.close();

        let mut writer = MemoryWriter::new();
        sink.run(&mut writer).await;

        // Sender closed before the sink started, so the second token is known last
        assert_eq!(writer.chunks().len(), 2);
        let parsed: serde_json::Value = serde_json::from_slice(&writer.body()).unwrap();
        assert_eq!(parsed, serde_json::json!(["A", "B"]));
    }

    #[tokio::test]
    async fn test_relay_fault_writes_error_marker() {
        let (tx, sink, cancel) = sink(EncodingKind::RawText { summary: true }, 4);
        tx.send(Token::text("partial"), &cancel).await;
        tx.fail("backend exploded");

        let mut writer = MemoryWriter::new();
        let report = sink.run(&mut writer).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(
            report.outcome,
            SessionOutcome::Failed("backend exploded".to_string())
        );
        assert_eq!(
            writer.body_string(),
            "partial\n[stream error: backend exploded]\n"
        );
    }

    #[tokio::test]
    async fn test_json_fault_after_last_token_keeps_error_element() {
        let (tx, sink, cancel) = sink(EncodingKind::IncrementalArray, 4);
        tx.send(Token::text("A"), &cancel).await;
        tx.fail("model crashed");

        let mut writer = MemoryWriter::new();
        let report = sink.run(&mut writer).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(
            report.outcome,
            SessionOutcome::Failed("model crashed".to_string())
        );
        let parsed: serde_json::Value = serde_json::from_slice(&writer.body()).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!(["A", { "error": "model crashed" }])
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing_but_preamble() {
        let (tx, sink, cancel) = sink(EncodingKind::RawText { summary: true }, 4);
        tx.send(Token::text("never"), &cancel).await;
        cancel.cancel(CancelReason::Shutdown);

        let mut writer = MemoryWriter::new();
        let report = sink.run(&mut writer).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.outcome, SessionOutcome::Cancelled(CancelReason::Shutdown));
        assert!(writer.body().is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn test_cancel_during_stream_stops_after_current_unit() {
        let (tx, sink, cancel) = sink(EncodingKind::RawText { summary: true }, 8);
        for t in ["a", "b", "c", "d"] {
            tx.send(Token::text(t), &cancel).await;
        }
        tx.close();

        let mut writer = CancellingWriter {
            inner: MemoryWriter::new(),
            cancel: cancel.clone(),
            flushes: AtomicUsize::new(0),
            cancel_on: 1,
        };
        let report = sink.run(&mut writer).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(
            report.outcome,
            SessionOutcome::Cancelled(CancelReason::PeerDisconnected)
        );
        assert_eq!(writer.inner.body_string(), "a");
    }

    #[tokio::test]
    async fn test_peer_gone_cancels_session() {
        let (tx, sink, cancel) = sink(EncodingKind::RawText { summary: false }, 8);
        for t in ["a", "b", "c"] {
            tx.send(Token::text(t), &cancel).await;
        }

        let mut writer = LimitedWriter {
            inner: MemoryWriter::new(),
            flushes_left: 2,
        };
        let report = sink.run(&mut writer).await;

        assert_eq!(report.delivered, 2);
        assert!(cancel.is_cancelled());
        assert_eq!(cancel.reason(), Some(CancelReason::PeerDisconnected));
        assert_eq!(
            report.outcome,
            SessionOutcome::Cancelled(CancelReason::PeerDisconnected)
        );
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_while_idle() {
        let (tx, sink, cancel) = sink(EncodingKind::EventStream, 1);
        let sink = sink.with_keep_alive(Some(Duration::from_secs(15)));

        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(40)).await;
            tx.send(Token::text("late"), &cancel).await;
            tx.close();
        });

        let mut writer = MemoryWriter::new();
        let report = sink.run(&mut writer).await;
        producer.await.unwrap();

        assert_eq!(report.delivered, 1);
        let body = writer.body_string();
        assert_eq!(body.matches(": keep-alive\n\n").count(), 2);
        assert!(body.contains("data: late\n\n"));
    }

    #[tokio::test]
    async fn test_shared_counter_tracks_delivery() {
        let (tx, sink, cancel) = sink(EncodingKind::RawText { summary: false }, 4);
        let counter = Arc::new(AtomicU64::new(0));
        let sink = sink.with_counter(Arc::clone(&counter));
        tx.send(Token::text("x"), &cancel).await;
        tx.send(Token::text("y"), &cancel).await;
        tx.close();

        sink.run(&mut MemoryWriter::new()).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
