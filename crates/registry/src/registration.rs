//! Migration declarations.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use migrator_core::{BoxError, Order, RunContext, Status};

/// A single migration step.
///
/// Implementations must be idempotent and safe to retry: a step can be
/// invoked again after an earlier partial failure, and receives the status
/// persisted by that earlier attempt ([`Status::Pending`] on a first run).
///
/// The context is cancelled when the run's deadline passes or the
/// migration lock is lost. Cancellation is advisory; long-running steps
/// should watch [`RunContext::cancelled`] and return promptly.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Apply the migration.
    async fn migrate(&self, ctx: RunContext, previous: Status) -> Result<(), BoxError>;
}

/// Adapter turning an async closure into a [`Migration`].
pub struct FnMigration<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Migration for FnMigration<F>
where
    F: Fn(RunContext, Status) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn migrate(&self, ctx: RunContext, previous: Status) -> Result<(), BoxError> {
        (self.f)(ctx, previous).await
    }
}

/// Wrap an async closure as a shareable [`Migration`].
///
/// ```ignore
/// let add_index = migration_fn(|ctx, _previous| async move {
///     db.execute(&ctx, "CREATE INDEX IF NOT EXISTS ...").await?;
///     Ok(())
/// });
/// ```
pub fn migration_fn<F, Fut>(f: F) -> Arc<dyn Migration>
where
    F: Fn(RunContext, Status) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(FnMigration { f })
}

/// A migration as declared by the application, before validation.
///
/// Enabled by default. The migration function is optional here so that a
/// declaration missing one can be caught by the registry.
#[derive(Clone)]
pub struct Registration {
    order: Order,
    migration: Option<Arc<dyn Migration>>,
    enabled: bool,
}

impl Registration {
    /// Declare a migration at `order`.
    pub fn new(order: impl Into<Order>) -> Self {
        Self {
            order: order.into(),
            migration: None,
            enabled: true,
        }
    }

    /// Set the migration to run.
    #[must_use]
    pub fn migration(mut self, migration: Arc<dyn Migration>) -> Self {
        self.migration = Some(migration);
        self
    }

    /// Set the migration to run from an async closure.
    #[must_use]
    pub fn migrate_with<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RunContext, Status) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.migration(migration_fn(f))
    }

    /// Enable or disable the migration.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Shorthand for `enabled(false)`.
    #[must_use]
    pub const fn disabled(self) -> Self {
        self.enabled(false)
    }

    #[must_use]
    pub const fn order(&self) -> Order {
        self.order
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn into_entry(self) -> Option<MigrationEntry> {
        let Self {
            order,
            migration,
            enabled,
        } = self;
        migration.map(|migration| MigrationEntry {
            order,
            migration,
            enabled,
        })
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("order", &self.order)
            .field("has_migration", &self.migration.is_some())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// A validated registration, owned by the [`crate::Registry`].
#[derive(Clone)]
pub struct MigrationEntry {
    order: Order,
    migration: Arc<dyn Migration>,
    enabled: bool,
}

impl MigrationEntry {
    #[must_use]
    pub const fn order(&self) -> Order {
        self.order
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The migration to run.
    #[must_use]
    pub fn migration(&self) -> Arc<dyn Migration> {
        Arc::clone(&self.migration)
    }
}

impl fmt::Debug for MigrationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationEntry")
            .field("order", &self.order)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
