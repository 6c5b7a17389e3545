//! End-to-end tests of the source → relay → sink pipeline
//!
//! These tests drive the engine through its public API against in-memory
//! writers. They cover:
//! - Cancellation bounding how much the source produces
//! - Backpressure from a full relay
//! - Generation failures and panics surfacing as error markers
//! - Session deadlines

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use relay_core::{
    relay_channel, CancelReason, CancellationMonitor, EncodingKind, FrameWriter, GenerationError,
    MemoryWriter, Pacing, ScriptedGenerator, SessionOutcome, SourceCatalog, SourceOutcome,
    StreamConfig, StreamKind, StreamMultiplexer, StreamRequest, Token, TokenGenerator,
    TokenSource, TransportSink, WriteError,
};

// =============================================================================
// Helpers
// =============================================================================

fn numbered(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("t{i} ")).collect()
}

/// Writer that cancels the session as soon as the first unit is flushed
struct CancelOnFirstFlush {
    inner: MemoryWriter,
    cancel: CancellationMonitor,
}

#[async_trait]
impl FrameWriter for CancelOnFirstFlush {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        self.inner.write(bytes).await
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        self.inner.flush().await?;
        self.cancel.cancel(CancelReason::PeerDisconnected);
        Ok(())
    }
}

/// Writer whose flushes take a while, like a slow network peer
struct SlowWriter {
    inner: MemoryWriter,
    delay: Duration,
}

#[async_trait]
impl FrameWriter for SlowWriter {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        self.inner.write(bytes).await
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        tokio::time::sleep(self.delay).await;
        self.inner.flush().await
    }
}

struct PanicsAfterOne {
    sent: bool,
}

#[async_trait]
impl TokenGenerator for PanicsAfterOne {
    fn name(&self) -> &str {
        "panics-after-one"
    }

    async fn next_token(&mut self) -> Result<Option<Token>, GenerationError> {
        if self.sent {
            panic!("model crashed");
        }
        self.sent = true;
        Ok(Some(Token::text("partial")))
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cancelling right after the first fragment stops the source within one
/// relay slot of where the sink stopped.
#[tokio::test]
async fn test_cancel_after_first_fragment_bounds_production() {
    let cancel = CancellationMonitor::new();
    let (tx, rx) = relay_channel(1);

    let source = TokenSource::new(
        Box::new(ScriptedGenerator::new(numbered(100))),
        Pacing::Fixed(Duration::from_millis(20)),
    )
    .start("prompt", tx, cancel.clone());

    let sink = TransportSink::new(
        rx,
        cancel.clone(),
        EncodingKind::RawText { summary: true }.encoder(),
    );
    let mut writer = CancelOnFirstFlush {
        inner: MemoryWriter::new(),
        cancel: cancel.clone(),
    };
    let report = sink.run(&mut writer).await;

    assert_eq!(report.delivered, 1);
    assert_eq!(
        report.outcome,
        SessionOutcome::Cancelled(CancelReason::PeerDisconnected)
    );
    assert_eq!(writer.inner.body_string(), "t0 ");

    let source_report = tokio::time::timeout(Duration::from_secs(2), source.join())
        .await
        .expect("source did not stop after cancellation");
    assert_eq!(source_report.outcome, SourceOutcome::Cancelled);
    assert!(
        source_report.emitted <= 2,
        "source kept producing after cancel: {}",
        source_report.emitted
    );
}

/// Scripted `a b c`, no pacing, default capacity: cancelling on the first
/// flush leaves only `a` on the wire and no summary line.
#[tokio::test(flavor = "current_thread")]
async fn test_cancel_after_first_fragment_without_pacing() {
    let catalog = SourceCatalog::default().with_profile(
        StreamKind::Pipeline,
        || -> Box<dyn TokenGenerator> { Box::new(ScriptedGenerator::new(["a", "b", "c"])) },
        Pacing::Immediate,
    );
    let config = StreamConfig {
        relay_capacity: 5,
        ..StreamConfig::default()
    };
    let multiplexer = StreamMultiplexer::new(&config).with_catalog(catalog);

    let session = multiplexer.open(StreamRequest::new(StreamKind::Pipeline).with_prompt("test"));
    let mut writer = CancelOnFirstFlush {
        inner: MemoryWriter::new(),
        cancel: session.cancellation().clone(),
    };
    let report = session.run(&mut writer).await.unwrap();

    assert_eq!(writer.inner.body_string(), "a");
    assert!(!writer.inner.body_string().contains("[pipeline complete"));
    assert_eq!(report.delivered, 1);
    assert!(report.emitted <= 2, "source emitted {}", report.emitted);
    assert_eq!(
        report.outcome,
        SessionOutcome::Cancelled(CancelReason::PeerDisconnected)
    );
}

// =============================================================================
// Backpressure
// =============================================================================

#[tokio::test]
async fn test_full_relay_blocks_the_source() {
    let cancel = CancellationMonitor::new();
    let (tx, rx) = relay_channel(3);

    let source = TokenSource::new(
        Box::new(ScriptedGenerator::new(numbered(50))),
        Pacing::Immediate,
    )
    .start("prompt", tx, cancel.clone());

    // Nobody is reading yet: the source fills the relay and then waits.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.emitted(), 3);
    assert!(!source.is_finished());

    let sink = TransportSink::new(
        rx,
        cancel,
        EncodingKind::RawText { summary: false }.encoder(),
    );
    let mut writer = MemoryWriter::new();
    let report = sink.run(&mut writer).await;

    assert_eq!(report.delivered, 50);
    assert_eq!(writer.body_string(), numbered(50).concat());
    assert_eq!(writer.chunks().len(), 50);

    let source_report = source.join().await;
    assert_eq!(source_report.emitted, 50);
    assert_eq!(source_report.outcome, SourceOutcome::Finished);
}

#[tokio::test]
async fn test_slow_peer_keeps_order() {
    let catalog = SourceCatalog::default().with_profile(
        StreamKind::Text,
        || -> Box<dyn TokenGenerator> { Box::new(ScriptedGenerator::new(numbered(10))) },
        Pacing::Immediate,
    );
    let config = StreamConfig {
        relay_capacity: 1,
        ..StreamConfig::default()
    };
    let multiplexer = StreamMultiplexer::new(&config).with_catalog(catalog);

    let mut writer = SlowWriter {
        inner: MemoryWriter::new(),
        delay: Duration::from_millis(5),
    };
    let report = multiplexer
        .serve(StreamRequest::new(StreamKind::Text), &mut writer)
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.delivered, 10);
    assert_eq!(report.emitted, 10);
    assert_eq!(writer.inner.body_string(), numbered(10).concat());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_generation_failure_writes_error_marker() {
    let catalog = SourceCatalog::default().with_profile(
        StreamKind::Pipeline,
        || -> Box<dyn TokenGenerator> {
            Box::new(ScriptedGenerator::new(["one ", "two ", "three "]).failing_at(2))
        },
        Pacing::Immediate,
    );
    let multiplexer = StreamMultiplexer::new(&StreamConfig::default()).with_catalog(catalog);

    let mut writer = MemoryWriter::new();
    let report = multiplexer
        .serve(
            StreamRequest::new(StreamKind::Pipeline).with_prompt("count"),
            &mut writer,
        )
        .await
        .unwrap();

    assert_eq!(report.delivered, 2);
    assert_eq!(
        writer.body_string(),
        "one two \n[stream error: generation failed: scripted failure at token 2]\n"
    );
    assert!(matches!(report.outcome, SessionOutcome::Failed(_)));
    assert!(!writer.body_string().contains("pipeline complete"));
}

#[tokio::test]
async fn test_generator_panic_is_reported_to_peer() {
    let catalog = SourceCatalog::default().with_profile(
        StreamKind::Pipeline,
        || -> Box<dyn TokenGenerator> { Box::new(PanicsAfterOne { sent: false }) },
        Pacing::Immediate,
    );
    let multiplexer = StreamMultiplexer::new(&StreamConfig::default()).with_catalog(catalog);

    let mut writer = MemoryWriter::new();
    let report = multiplexer
        .serve(
            StreamRequest::new(StreamKind::Pipeline).with_prompt("crash"),
            &mut writer,
        )
        .await
        .unwrap();

    let body = writer.body_string();
    assert!(body.starts_with("partial\n[stream error: generator panicked"));
    assert!(body.contains("model crashed"));
    assert_eq!(report.delivered, 1);
    match report.outcome {
        SessionOutcome::Failed(reason) => assert!(reason.contains("model crashed")),
        other => panic!("expected failure, got {other:?}"),
    }
}

// =============================================================================
// Deadlines
// =============================================================================

#[tokio::test]
async fn test_deadline_cancels_slow_stream() {
    let config = StreamConfig {
        text_interval: Duration::from_secs(30),
        deadline: Some(Duration::from_millis(50)),
        ..StreamConfig::default()
    };
    let multiplexer = StreamMultiplexer::new(&config);

    let mut writer = MemoryWriter::new();
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        multiplexer.serve(StreamRequest::new(StreamKind::Text), &mut writer),
    )
    .await
    .expect("deadline did not stop the session")
    .unwrap();

    assert_eq!(
        report.outcome,
        SessionOutcome::Cancelled(CancelReason::DeadlineExceeded)
    );
    assert_eq!(report.delivered, 1);
    assert_eq!(writer.chunks().len(), 1);
}

#[tokio::test]
async fn test_concurrent_sessions_are_isolated() {
    let multiplexer = Arc::new(StreamMultiplexer::new(&StreamConfig {
        token_delay: Duration::ZERO,
        token_jitter: Duration::ZERO,
        ..StreamConfig::default()
    }));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let multiplexer = Arc::clone(&multiplexer);
        tasks.push(tokio::spawn(async move {
            let mut writer = MemoryWriter::new();
            let prompt = format!("prompt number {i}");
            let report = multiplexer
                .serve(
                    StreamRequest::new(StreamKind::Pipeline).with_prompt(prompt.clone()),
                    &mut writer,
                )
                .await
                .unwrap();
            (prompt, report, writer.body_string())
        }));
    }

    for task in tasks {
        let (prompt, report, body) = task.await.unwrap();
        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert!(body.contains(&prompt), "body {body:?} missing {prompt:?}");
    }
    assert_eq!(multiplexer.registry().active_count(), 0);
    assert_eq!(multiplexer.registry().recent_reports().len(), 8);
}
