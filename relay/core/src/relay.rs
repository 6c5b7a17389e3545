//! Bounded Relay Channel
//!
//! Single-producer, single-consumer FIFO hand-off between a token source and a
//! transport sink. Capacity `C` bounds how far the source may run ahead of the
//! sink: the `C + 1`th unread send waits until the sink catches up.
//!
//! # Ownership
//!
//! - [`RelaySender`] is held by the source. It is the only handle that can
//!   close the channel, and closing consumes it, so a channel can never be
//!   closed twice.
//! - [`RelayReceiver`] is held by the sink. It is not `Clone` and has no close
//!   operation, so exactly one reader exists per channel.
//!
//! A sender dropped without [`RelaySender::close`] or [`RelaySender::fail`]
//! (for example because the generation task panicked) closes the channel with
//! a fault. The receiver never waits forever on a producer that is gone.

use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;

use crate::cancel::CancellationMonitor;

/// Fault recorded when a sender is dropped without closing the channel
pub const ABANDONED_FAULT: &str = "source terminated without closing the relay";

/// Create a relay channel with the given capacity
///
/// A capacity of zero is raised to one; an unbuffered relay is not supported.
#[must_use]
pub fn relay_channel<T>(capacity: usize) -> (RelaySender<T>, RelayReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let fault = Arc::new(OnceLock::new());

    (
        RelaySender {
            tx: Some(tx),
            fault: Arc::clone(&fault),
        },
        RelayReceiver {
            rx,
            fault,
            capacity,
        },
    )
}

/// Result of a send attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The token was buffered for the sink
    Delivered,
    /// Cancellation was observed before the token could be buffered
    Cancelled,
    /// The receiver is gone; nothing will ever read this channel again
    Disconnected,
}

/// Result of a receive
#[derive(Clone, Debug, PartialEq)]
pub enum Received<T> {
    /// The next token in FIFO order
    Token(T),
    /// Closed normally and every buffered token has been read
    Drained,
    /// Closed by a failing source and every buffered token has been read
    Failed(String),
}

/// Producer half of a relay channel
#[derive(Debug)]
pub struct RelaySender<T> {
    tx: Option<mpsc::Sender<T>>,
    fault: Arc<OnceLock<String>>,
}

impl<T> RelaySender<T> {
    /// Buffer a token, waiting while the channel is at capacity
    ///
    /// The wait is cancellable: if the monitor is (or becomes) cancelled before
    /// the token is buffered, the token is dropped and [`SendOutcome::Cancelled`]
    /// is returned. A send after cancellation is skipped, not an error.
    pub async fn send(&self, token: T, cancel: &CancellationMonitor) -> SendOutcome {
        let Some(tx) = self.tx.as_ref() else {
            return SendOutcome::Disconnected;
        };

        if cancel.is_cancelled() {
            return SendOutcome::Cancelled;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => SendOutcome::Cancelled,
            result = tx.send(token) => match result {
                Ok(()) => SendOutcome::Delivered,
                Err(_) => SendOutcome::Disconnected,
            },
        }
    }

    /// Number of free slots before a send would wait
    #[must_use]
    pub fn available(&self) -> usize {
        self.tx.as_ref().map_or(0, mpsc::Sender::capacity)
    }

    /// Whether the receiver has been dropped
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.tx.as_ref().map_or(true, mpsc::Sender::is_closed)
    }

    /// Close the channel normally
    ///
    /// Buffered tokens stay readable; the receiver sees [`Received::Drained`]
    /// after the last one.
    pub fn close(mut self) {
        drop(self.tx.take());
    }

    /// Close the channel after a generation failure
    ///
    /// The receiver drains buffered tokens first, then sees
    /// [`Received::Failed`] with `reason`.
    pub fn fail(mut self, reason: impl Into<String>) {
        let _ = self.fault.set(reason.into());
        drop(self.tx.take());
    }
}

impl<T> Drop for RelaySender<T> {
    fn drop(&mut self) {
        // The fault must be visible before the channel reports closed
        if let Some(tx) = self.tx.take() {
            let _ = self.fault.set(ABANDONED_FAULT.to_string());
            drop(tx);
        }
    }
}

/// Consumer half of a relay channel
#[derive(Debug)]
pub struct RelayReceiver<T> {
    rx: mpsc::Receiver<T>,
    fault: Arc<OnceLock<String>>,
    capacity: usize,
}

impl<T> RelayReceiver<T> {
    /// Wait for the next token or the terminal signal
    ///
    /// Once the channel is closed and drained, every call returns the same
    /// terminal value.
    pub async fn receive(&mut self) -> Received<T> {
        match self.rx.recv().await {
            Some(token) => Received::Token(token),
            None => self.terminal(),
        }
    }

    /// Non-blocking receive; `None` means the channel is open but empty
    pub fn try_receive(&mut self) -> Option<Received<T>> {
        match self.rx.try_recv() {
            Ok(token) => Some(Received::Token(token)),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => Some(self.terminal()),
        }
    }

    /// Whether the channel is closed and holds no unread tokens
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }

    /// Whether the channel was closed normally and holds no unread tokens
    ///
    /// False after a fault, even once drained: the stream's end is then
    /// reported by [`Received::Failed`], not by the last token.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.is_drained() && self.fault.get().is_none()
    }

    /// Number of buffered, unread tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no tokens are buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Configured capacity of the channel
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn terminal(&self) -> Received<T> {
        match self.fault.get() {
            Some(reason) => Received::Failed(reason.clone()),
            None => Received::Drained,
        }
    }
}
