//! Top-level orchestration of a migration run.

use std::sync::Arc;

use migrator_core::{Error, Manager, Order, Result, ResultExt, RunContext};
use migrator_registry::Registry;
use serde::Serialize;
use tracing::info;

use crate::bootstrap;
use crate::config::MigratorConfig;
use crate::lock::{HeartbeatSettings, LockKeeper};
use crate::reconciler::{self, Reconciliation};
use crate::runner;

/// What a successful run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Migrations run to completion, in order.
    pub executed: Vec<Order>,
    /// Enabled migrations skipped because an earlier run completed them.
    pub already_completed: Vec<Order>,
    /// Disabled migrations, never run.
    pub skipped_disabled: Vec<Order>,
}

/// Runs registered migrations against a [`Manager`].
///
/// ```ignore
/// let migrator = Migrator::builder()
///     .manager(Arc::new(PostgresManager::connect(url).await?))
///     .registry(registry)
///     .config(MigratorConfig::from_file("migrator.toml")?)
///     .build()?;
///
/// let summary = migrator.run().await?;
/// ```
pub struct Migrator {
    manager: Arc<dyn Manager>,
    registry: Registry,
    config: MigratorConfig,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Migrator {
    #[must_use]
    pub fn builder() -> MigratorBuilder {
        MigratorBuilder::default()
    }

    #[must_use]
    pub const fn config(&self) -> &MigratorConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run with no outer cancellation, bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`Migrator::run_with_context`].
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_with_context(&RunContext::background()).await
    }

    /// Bring the store up to date with the registry.
    ///
    /// The run is cancelled when `parent` is, when the configured timeout
    /// passes, or when the migration lock heartbeat exhausts its retries.
    /// The migration lock is released whatever happens once it is held.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of the run, joined with any heartbeat
    /// or lock-release error.
    pub async fn run_with_context(&self, parent: &RunContext) -> Result<RunSummary> {
        let heartbeat = HeartbeatSettings::try_from(&self.config)?;
        let (ctx, canceller) = parent.child_with_timeout(self.config.timeout());
        info!(
            registered = self.registry.len(),
            timeout_ms = self.config.timeout_ms,
            "Starting migration run"
        );

        bootstrap::ensure_data_stores(&ctx, self.manager.as_ref(), self.config.lock_release_timeout())
            .await?;

        self.manager
            .acquire_migration_lock(&ctx)
            .await
            .map_err(|source| Error::AcquireMigrationLock { source })?;
        info!("Migration lock acquired");

        let keeper = LockKeeper::spawn(
            ctx.clone(),
            canceller.clone(),
            Arc::clone(&self.manager),
            heartbeat,
        );

        let outcome = self.reconcile_and_run(&ctx).await;
        canceller.cancel();

        let summary = outcome.join_with(keeper.join().await)?;
        info!(
            executed = summary.executed.len(),
            already_completed = summary.already_completed.len(),
            "Migration run finished"
        );
        Ok(summary)
    }

    /// Orders the next run would execute, without running anything.
    ///
    /// Bootstraps the data stores but takes no migration lock and writes no
    /// statuses, so a concurrent run may change the answer.
    ///
    /// # Errors
    ///
    /// Returns bootstrap, store and consistency errors as a run would.
    pub async fn plan(&self, parent: &RunContext) -> Result<Vec<Order>> {
        let (ctx, _canceller) = parent.child_with_timeout(self.config.timeout());
        bootstrap::ensure_data_stores(&ctx, self.manager.as_ref(), self.config.lock_release_timeout())
            .await?;

        let reconciliation =
            reconciler::reconcile(&ctx, self.manager.as_ref(), &self.registry).await?;
        Ok(reconciliation.scheduled_orders())
    }

    async fn reconcile_and_run(&self, ctx: &RunContext) -> Result<RunSummary> {
        let Reconciliation {
            scheduled,
            already_completed,
            disabled,
            ..
        } = reconciler::reconcile(ctx, self.manager.as_ref(), &self.registry).await?;

        let executed = runner::run_migrations(ctx, self.manager.as_ref(), &scheduled).await?;

        Ok(RunSummary {
            executed,
            already_completed,
            skipped_disabled: disabled,
        })
    }
}

/// Builder for [`Migrator`].
#[derive(Default)]
pub struct MigratorBuilder {
    manager: Option<Arc<dyn Manager>>,
    registry: Option<Registry>,
    config: MigratorConfig,
}

impl MigratorBuilder {
    /// Set the store backend (required).
    #[must_use]
    pub fn manager(mut self, manager: Arc<dyn Manager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Set the declared migrations (required).
    #[must_use]
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the default configuration.
    #[must_use]
    pub fn config(mut self, config: MigratorConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the manager or registry is
    /// missing, or the configuration does not validate.
    pub fn build(self) -> Result<Migrator> {
        let manager = self
            .manager
            .ok_or_else(|| Error::invalid_config("a manager is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| Error::invalid_config("a registry is required"))?;
        self.config.validate()?;

        Ok(Migrator {
            manager,
            registry,
            config: self.config,
        })
    }
}
