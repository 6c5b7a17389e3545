//! Token Source Runner
//!
//! Drives a [`TokenGenerator`] on its own task and feeds the relay.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::traits::{GenerationError, Pacing, TokenGenerator};
use crate::cancel::CancellationMonitor;
use crate::relay::{RelaySender, SendOutcome};
use crate::token::Token;

/// How a source's generation loop ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceOutcome {
    /// The plan was exhausted and the relay closed normally
    Finished,
    /// Cancellation was observed; the relay was closed without further tokens
    Cancelled,
    /// The sink went away before the plan was exhausted
    Abandoned,
    /// The generator failed or panicked; the relay was closed with a fault
    Failed(String),
}

/// Summary of a finished source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceReport {
    /// Tokens handed to the relay
    pub emitted: u64,
    /// How generation ended
    pub outcome: SourceOutcome,
}

/// A token source bound to one generator and one pacing policy
pub struct TokenSource {
    generator: Box<dyn TokenGenerator>,
    pacing: Pacing,
}

impl TokenSource {
    /// Create a source around a generator
    #[must_use]
    pub fn new(generator: Box<dyn TokenGenerator>, pacing: Pacing) -> Self {
        Self { generator, pacing }
    }

    /// Begin generation on an independent task and return immediately
    ///
    /// The relay is closed exactly once: normally when the plan is exhausted
    /// or cancellation is observed, with a fault when generation fails or the
    /// generator panics.
    pub fn start(
        self,
        prompt: impl Into<String>,
        relay: RelaySender<Token>,
        cancel: CancellationMonitor,
    ) -> SourceHandle {
        let emitted = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&emitted);
        let prompt = prompt.into();
        let Self {
            mut generator,
            pacing,
        } = self;

        let join = tokio::spawn(async move {
            let name = generator.name().to_string();
            let generation = generate(
                generator.as_mut(),
                &prompt,
                &relay,
                &cancel,
                pacing,
                &counter,
            );

            let result = AssertUnwindSafe(generation).catch_unwind().await;
            let outcome = match result {
                Ok(Ok(outcome)) => {
                    relay.close();
                    outcome
                }
                Ok(Err(e)) => {
                    warn!(generator = %name, error = %e, "Generation failed");
                    let reason = e.to_string();
                    relay.fail(reason.clone());
                    SourceOutcome::Failed(reason)
                }
                Err(panic) => {
                    let reason = format!("generator panicked: {}", panic_message(&*panic));
                    warn!(generator = %name, "{reason}");
                    relay.fail(reason.clone());
                    SourceOutcome::Failed(reason)
                }
            };

            let report = SourceReport {
                emitted: counter.load(Ordering::SeqCst),
                outcome,
            };
            debug!(
                generator = %name,
                emitted = report.emitted,
                outcome = ?report.outcome,
                "Source finished"
            );
            report
        });

        SourceHandle { join, emitted }
    }
}

async fn generate(
    generator: &mut dyn TokenGenerator,
    prompt: &str,
    relay: &RelaySender<Token>,
    cancel: &CancellationMonitor,
    pacing: Pacing,
    emitted: &AtomicU64,
) -> Result<SourceOutcome, GenerationError> {
    generator.prepare(prompt).await?;

    let mut step: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return Ok(SourceOutcome::Cancelled);
        }

        if step > 0 {
            let delay = pacing.next_delay();
            if delay.is_zero() {
                // Let the sink run between unpaced emissions
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(SourceOutcome::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        let Some(token) = generator.next_token().await? else {
            return Ok(SourceOutcome::Finished);
        };

        if cancel.is_cancelled() {
            return Ok(SourceOutcome::Cancelled);
        }

        match relay.send(token, cancel).await {
            SendOutcome::Delivered => {
                emitted.fetch_add(1, Ordering::SeqCst);
            }
            SendOutcome::Cancelled => return Ok(SourceOutcome::Cancelled),
            SendOutcome::Disconnected => return Ok(SourceOutcome::Abandoned),
        }
        step += 1;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a running source
#[derive(Debug)]
pub struct SourceHandle {
    join: JoinHandle<SourceReport>,
    emitted: Arc<AtomicU64>,
}

impl SourceHandle {
    /// Tokens handed to the relay so far
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Whether the generation task has ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the generation task to end
    pub async fn join(self) -> SourceReport {
        match self.join.await {
            Ok(report) => report,
            // Panics are caught inside the task; this is the aborted-runtime case
            Err(e) => SourceReport {
                emitted: self.emitted.load(Ordering::SeqCst),
                outcome: SourceOutcome::Failed(e.to_string()),
            },
        }
    }
}
