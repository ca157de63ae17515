//! Cancellable, deadline-bounded execution context.
//!
//! A [`RunContext`] is handed to every store call and every migration. It
//! carries zero or more cancellation signals (its own plus those inherited
//! from parents) and an optional deadline. [`Canceller`] flips the signal
//! owned by one context level.
//!
//! Cleanup work uses [`RunContext::detached`]: the returned context ignores
//! every inherited signal and only honours a fresh deadline, so a cancelled
//! run can still release its locks within bounded time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

use crate::manager::{StoreError, StoreResult};

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A [`Canceller`] fired, locally or on a parent.
    Cancelled,
    /// The deadline elapsed.
    DeadlineExceeded,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "context cancelled"),
            Self::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// Execution context shared by the orchestrator, the heartbeat task, the
/// store and migrations.
#[derive(Debug, Clone)]
pub struct RunContext {
    signals: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels the context level it was created with, and every child of it.
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Canceller {
    /// Cancel the associated context. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`Canceller::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl RunContext {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub const fn background() -> Self {
        Self {
            signals: Vec::new(),
            deadline: None,
        }
    }

    /// Derive a cancellable child.
    ///
    /// The child stops when the parent stops or when the returned
    /// [`Canceller`] fires.
    #[must_use]
    pub fn child(&self) -> (Self, Canceller) {
        let (tx, rx) = watch::channel(false);
        let mut signals = self.signals.clone();
        signals.push(rx);

        (
            Self {
                signals,
                deadline: self.deadline,
            },
            Canceller { tx: Arc::new(tx) },
        )
    }

    /// Derive a cancellable child whose deadline is at most `timeout` away.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> (Self, Canceller) {
        let (mut child, canceller) = self.child();
        child.deadline = match (self.deadline, deadline_after(timeout)) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        (child, canceller)
    }

    /// Strip every cancellation signal and apply a fresh deadline.
    ///
    /// Use for cleanup that must run even after the run was cancelled.
    #[must_use]
    pub fn detached(&self, timeout: Duration) -> Self {
        Self {
            signals: Vec::new(),
            deadline: deadline_after(timeout),
        }
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Why the context stopped, or `None` while it is still live.
    #[must_use]
    pub fn cause(&self) -> Option<CancelReason> {
        if self.signals.iter().any(|rx| *rx.borrow()) {
            Some(CancelReason::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(CancelReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Whether the context has been cancelled or has expired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) -> CancelReason {
        if let Some(reason) = self.cause() {
            return reason;
        }

        let signalled = async {
            if self.signals.is_empty() {
                std::future::pending::<()>().await;
            }
            let _ = select_all(
                self.signals
                    .iter()
                    .cloned()
                    .map(|rx| Box::pin(wait_for_cancel(rx))),
            )
            .await;
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                () = signalled => CancelReason::Cancelled,
                () = sleep_until(deadline) => CancelReason::DeadlineExceeded,
            },
            None => {
                signalled.await;
                CancelReason::Cancelled
            }
        }
    }

    /// Run a store operation, giving up when the context stops first.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, [`StoreError::Cancelled`] if the
    /// context was cancelled, or [`StoreError::Timeout`] if the deadline
    /// passed before the operation finished.
    pub async fn bound<T, F>(&self, operation: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let budget_ms = self.remaining().map_or(0, duration_ms);

        tokio::select! {
            biased;
            result = operation => result,
            reason = self.cancelled() => Err(match reason {
                CancelReason::Cancelled => StoreError::Cancelled,
                CancelReason::DeadlineExceeded => StoreError::timeout(budget_ms),
            }),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::background()
    }
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

async fn wait_for_cancel(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Every canceller is gone; only a value set before that counts.
            if *rx.borrow() {
                return;
            }
            std::future::pending::<()>().await;
        }
    }
}

/// Whole milliseconds in a duration, saturating at `u64::MAX`.
#[must_use]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
