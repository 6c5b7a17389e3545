//! Session Registry - Live Stream Tracking
//!
//! Tracks every session that is currently streaming so the server can report
//! how many are active, cancel all of them on shutdown, and wait for them to
//! wind down. A bounded history of finished session reports is kept for
//! diagnostics.
//!
//! # Architecture
//!
//! ```text
//!                       SessionRegistry
//!          ┌──────────────────────────────────────────┐
//!          │ DashMap<SessionId, LiveSession>          │
//!          │ Mutex<VecDeque<SessionReport>> (bounded) │
//!          │ Notify (fires when the map empties)      │
//!          └────────────────────┬─────────────────────┘
//!                               │ Registration (drop guard)
//!              ┌────────────────┼────────────────┐
//!       ┌──────▼──────┐  ┌──────▼──────┐  ┌──────▼──────┐
//!       │  session a  │  │  session b  │  │  session c  │
//!       └─────────────┘  └─────────────┘  └─────────────┘
//! ```
//!
//! # Thread Safety
//!
//! The live map is a `DashMap`, so request tasks register and deregister
//! without a global lock. Entries are removed by the [`Registration`] guard,
//! which runs even when the request task is aborted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{SessionId, SessionReport};
use crate::cancel::{CancelReason, CancellationMonitor};
use crate::multiplexer::StreamKind;

/// Number of finished reports kept when no limit is given
pub const DEFAULT_HISTORY_LIMIT: usize = 64;

/// Registry entry for one live session
#[derive(Debug)]
struct LiveSession {
    kind: StreamKind,
    started: Instant,
    cancel: CancellationMonitor,
    delivered: Arc<AtomicU64>,
}

/// Point-in-time view of a live session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session identifier
    pub id: SessionId,
    /// Endpoint being served
    pub kind: StreamKind,
    /// Tokens flushed so far
    pub delivered: u64,
    /// Time since the session was opened
    pub elapsed: Duration,
}

struct RegistryInner {
    live: DashMap<SessionId, LiveSession>,
    history: Mutex<VecDeque<SessionReport>>,
    history_limit: usize,
    idle: Notify,
}

/// Registry of live streaming sessions
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("active", &self.active_count())
            .field("history_limit", &self.inner.history_limit)
            .finish()
    }
}

impl SessionRegistry {
    /// Create a registry with the default history limit
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a registry keeping at most `limit` finished reports
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                live: DashMap::new(),
                history: Mutex::new(VecDeque::with_capacity(limit.min(256))),
                history_limit: limit,
                idle: Notify::new(),
            }),
        }
    }

    /// Register a live session
    ///
    /// The session stays registered until the returned guard is dropped.
    #[must_use = "the session is deregistered when the registration drops"]
    pub fn register(
        &self,
        id: SessionId,
        kind: StreamKind,
        cancel: CancellationMonitor,
        delivered: Arc<AtomicU64>,
    ) -> Registration {
        self.inner.live.insert(
            id,
            LiveSession {
                kind,
                started: Instant::now(),
                cancel,
                delivered,
            },
        );
        debug!(session = %id, ?kind, "Session registered");
        Registration {
            registry: self.clone(),
            id,
        }
    }

    fn deregister(&self, id: &SessionId) {
        if self.inner.live.remove(id).is_some() {
            debug!(session = %id, "Session deregistered");
        }
        if self.inner.live.is_empty() {
            self.inner.idle.notify_waiters();
        }
    }

    /// Number of sessions currently streaming
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.live.len()
    }

    /// Whether a session is currently registered
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.live.contains_key(id)
    }

    /// Snapshot of every live session
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.inner
            .live
            .iter()
            .map(|entry| SessionSnapshot {
                id: *entry.key(),
                kind: entry.kind,
                delivered: entry.delivered.load(Ordering::Acquire),
                elapsed: entry.started.elapsed(),
            })
            .collect()
    }

    /// Cancel one live session
    ///
    /// Returns true if the session was live and this call cancelled it.
    pub fn cancel(&self, id: &SessionId, reason: CancelReason) -> bool {
        self.inner
            .live
            .get(id)
            .is_some_and(|entry| entry.cancel.cancel(reason))
    }

    /// Cancel every live session, returning how many were newly cancelled
    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let cancelled = self
            .inner
            .live
            .iter()
            .filter(|entry| entry.cancel.cancel(reason))
            .count();
        if cancelled > 0 {
            info!(cancelled, %reason, "Cancelled live sessions");
        }
        cancelled
    }

    /// Wait until no session is registered
    ///
    /// Returns false if sessions were still live when `timeout` elapsed.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.inner.live.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    /// Store a finished session's report, evicting the oldest past the limit
    pub fn record(&self, report: SessionReport) {
        if self.inner.history_limit == 0 {
            return;
        }
        let mut history = self.inner.history.lock();
        while history.len() >= self.inner.history_limit {
            history.pop_front();
        }
        history.push_back(report);
    }

    /// Most recent finished reports, oldest first
    #[must_use]
    pub fn recent_reports(&self) -> Vec<SessionReport> {
        self.inner.history.lock().iter().cloned().collect()
    }

    /// Report for a finished session, if it is still in the history
    #[must_use]
    pub fn report(&self, id: &SessionId) -> Option<SessionReport> {
        self.inner
            .history
            .lock()
            .iter()
            .rev()
            .find(|report| report.id == *id)
            .cloned()
    }
}

/// Keeps a session registered while alive
#[derive(Debug)]
pub struct Registration {
    registry: SessionRegistry,
    id: SessionId,
}

impl Registration {
    /// Registered session id
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(&self.id);
    }
}
