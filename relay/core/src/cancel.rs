//! Cancellation Monitor
//!
//! One-way, level-triggered cancellation shared by the producer and consumer of
//! a session. The first cancellation wins and records its [`CancelReason`];
//! every later call is a no-op. Observers poll [`CancellationMonitor::is_cancelled`]
//! once per loop iteration or await [`CancellationMonitor::cancelled`] while
//! suspended.
//!
//! The transport feeds the monitor through [`CancellationMonitor::watch`], which
//! turns a "peer went away" future and an optional deadline into a cancellation.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a session was cancelled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The remote peer disconnected
    PeerDisconnected,
    /// The session deadline elapsed
    DeadlineExceeded,
    /// The server is shutting down
    Shutdown,
    /// The sink could not encode or write a unit
    SinkFailed,
    /// Cancelled explicitly by the owner
    Requested,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PeerDisconnected => "peer disconnected",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::Shutdown => "server shutdown",
            Self::SinkFailed => "sink failed",
            Self::Requested => "requested",
        };
        f.write_str(s)
    }
}

/// Shared cancellation state for one session
#[derive(Clone, Debug, Default)]
pub struct CancellationMonitor {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancellationMonitor {
    /// Create a live monitor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking check of the cancellation state
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the session
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// session was already cancelled (the original reason is kept).
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        if first {
            debug!(reason = %reason, "Session cancelled");
        }
        first
    }

    /// The reason recorded by the first cancellation, if any
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Resolves once the session is cancelled (immediately if it already is)
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Watch a disconnect signal and an optional deadline
    ///
    /// Spawns a watcher task that cancels with [`CancelReason::PeerDisconnected`]
    /// when `disconnect` resolves, or [`CancelReason::DeadlineExceeded`] when the
    /// deadline elapses. The watcher exits on its own once the session is
    /// cancelled for any reason, and is aborted when the returned guard drops.
    pub fn watch<F>(&self, disconnect: F, deadline: Option<Duration>) -> WatchGuard
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            let deadline = async {
                match deadline {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                () = monitor.cancelled() => {}
                () = disconnect => {
                    monitor.cancel(CancelReason::PeerDisconnected);
                }
                () = deadline => {
                    monitor.cancel(CancelReason::DeadlineExceeded);
                }
            }
        });

        WatchGuard { handle }
    }
}

/// Stops the disconnect/deadline watcher when dropped
#[derive(Debug)]
pub struct WatchGuard {
    handle: JoinHandle<()>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
