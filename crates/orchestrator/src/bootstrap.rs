//! Data-store bootstrap under the global setup lock.

use std::time::Duration;

use migrator_core::{Error, Manager, Result, ResultExt, RunContext};
use tracing::{debug, info, warn};

/// Ensure the lock and status tables exist.
///
/// The setup lock is always released once taken, through a detached context
/// with its own `release_timeout`, so a cancelled run still cleans up.
///
/// # Errors
///
/// Returns [`Error::AcquireDbLock`] without doing anything else if the lock
/// cannot be taken. Otherwise returns [`Error::EnsureDataStores`],
/// [`Error::ReleaseDbLock`], or both joined together.
pub async fn ensure_data_stores(
    ctx: &RunContext,
    manager: &dyn Manager,
    release_timeout: Duration,
) -> Result<()> {
    debug!("Acquiring data store lock");
    manager
        .acquire_db_lock(ctx)
        .await
        .map_err(|source| Error::AcquireDbLock { source })?;

    let ensured = manager
        .ensure_data_stores(ctx)
        .await
        .map_err(|source| Error::EnsureDataStores { source });

    ensured.join_with(release_db_lock(ctx, manager, release_timeout).await)?;
    info!("Data stores ready");
    Ok(())
}

async fn release_db_lock(
    ctx: &RunContext,
    manager: &dyn Manager,
    release_timeout: Duration,
) -> Result<()> {
    let release_ctx = ctx.detached(release_timeout);
    release_ctx
        .bound(manager.release_db_lock(&release_ctx))
        .await
        .map_err(|source| {
            warn!(error = %source, "Failed to release data store lock");
            Error::ReleaseDbLock { source }
        })
}
