//! Run-exclusivity lock keeper.
//!
//! Once the migration lock is held, a background task renews it on a fixed
//! interval. Too many consecutive renewal failures mean exclusivity may be
//! lost: the task cancels the shared run context so in-flight migrations
//! unwind, and reports a liveness error. Whatever the outcome, the task
//! releases the lock before it finishes.

use std::sync::Arc;
use std::time::Duration;

use migrator_core::{Canceller, Error, Manager, Result, ResultExt, RunContext};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::config::MigratorConfig;

/// Heartbeat cadence and budgets.
///
/// Durations are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    interval: Duration,
    retries: u32,
    release_timeout: Duration,
}

impl HeartbeatSettings {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `interval` or `release_timeout`
    /// is zero.
    pub fn new(interval: Duration, retries: u32, release_timeout: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::invalid_config("heartbeat interval must be positive"));
        }
        if release_timeout.is_zero() {
            return Err(Error::invalid_config("lock release timeout must be positive"));
        }

        Ok(Self {
            interval,
            retries,
            release_timeout,
        })
    }

    /// Time between renewals. Also the deadline for a single renewal.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Consecutive failures tolerated; one more aborts the run.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    /// Deadline for releasing the lock.
    #[must_use]
    pub const fn release_timeout(&self) -> Duration {
        self.release_timeout
    }
}

impl TryFrom<&MigratorConfig> for HeartbeatSettings {
    type Error = Error;

    fn try_from(config: &MigratorConfig) -> Result<Self> {
        Self::new(
            config.heartbeat_interval(),
            config.heartbeat_retries,
            config.lock_release_timeout(),
        )
    }
}

/// Handle to the heartbeat task of one run.
///
/// Dropping the handle cancels the run context, so the task stops and
/// releases the lock even when [`LockKeeper::join`] is never reached.
#[derive(Debug)]
pub struct LockKeeper {
    handle: Option<JoinHandle<Result<()>>>,
    canceller: Canceller,
}

impl LockKeeper {
    /// Start renewing a migration lock that is already held.
    ///
    /// The task runs until `ctx` is cancelled or the retry budget is
    /// exceeded, then releases the lock. `canceller` must cancel `ctx`.
    #[must_use]
    pub fn spawn(
        ctx: RunContext,
        canceller: Canceller,
        manager: Arc<dyn Manager>,
        settings: HeartbeatSettings,
    ) -> Self {
        let task_canceller = canceller.clone();
        let handle = tokio::spawn(async move {
            let renewed = keep_alive(&ctx, &task_canceller, manager.as_ref(), settings).await;
            let released =
                release_migration_lock(&ctx, manager.as_ref(), settings.release_timeout).await;
            renewed.join_with(released)
        });

        Self {
            handle: Some(handle),
            canceller,
        }
    }

    /// Wait for the task to stop and release the lock.
    ///
    /// Call after cancelling the run context, otherwise this waits for the
    /// run deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HeartbeatFailed`] if the retry budget was exceeded,
    /// [`Error::ReleaseMigrationLock`] if the release failed, both joined
    /// if both happened, or [`Error::Internal`] if the task panicked.
    pub async fn join(mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Err(Error::internal("heartbeat task already joined"));
        };

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::internal(format!("heartbeat task failed: {e}"))),
        }
    }
}

impl Drop for LockKeeper {
    fn drop(&mut self) {
        if self.handle.is_some() && !self.canceller.is_cancelled() {
            warn!("Lock keeper dropped before the run finished, stopping heartbeat");
        }
        self.canceller.cancel();
    }
}

async fn keep_alive(
    ctx: &RunContext,
    canceller: &Canceller,
    manager: &dyn Manager,
    settings: HeartbeatSettings,
) -> Result<()> {
    let start = Instant::now()
        .checked_add(settings.interval)
        .unwrap_or_else(Instant::now);
    let mut ticker = interval_at(start, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            reason = ctx.cancelled() => {
                debug!(%reason, "Heartbeat stopping");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let (beat_ctx, _beat) = ctx.child_with_timeout(settings.interval);
        let renewed = beat_ctx
            .bound(manager.migration_lock_heartbeat(&beat_ctx))
            .await;

        match renewed {
            Ok(()) => {
                if failures > 0 {
                    info!(previous_failures = failures, "Migration lock heartbeat recovered");
                }
                failures = 0;
            }
            Err(_) if ctx.is_cancelled() => {
                debug!("Heartbeat interrupted by run shutdown");
                return Ok(());
            }
            Err(source) => {
                failures = failures.saturating_add(1);
                warn!(
                    failures,
                    retries = settings.retries,
                    error = %source,
                    "Migration lock heartbeat failed"
                );

                if failures > settings.retries {
                    error!(failures, "Heartbeat retry budget exhausted, cancelling run");
                    canceller.cancel();
                    return Err(Error::HeartbeatFailed { failures, source });
                }
            }
        }
    }
}

async fn release_migration_lock(
    ctx: &RunContext,
    manager: &dyn Manager,
    release_timeout: Duration,
) -> Result<()> {
    let release_ctx = ctx.detached(release_timeout);
    match release_ctx
        .bound(manager.release_migration_lock(&release_ctx))
        .await
    {
        Ok(()) => {
            info!("Migration lock released");
            Ok(())
        }
        Err(source) => {
            error!(error = %source, "Failed to release migration lock");
            Err(Error::ReleaseMigrationLock { source })
        }
    }
}
