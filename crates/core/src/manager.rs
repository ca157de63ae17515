//! Store contract used by the orchestrator.
//!
//! A [`Manager`] owns the backing store: a global lock for data-store setup,
//! the run-exclusivity ("migration") lock with its heartbeat, and the status
//! table. Implementations may sit on a relational database, a distributed KV
//! store or plain memory; the orchestrator only relies on the contracts
//! documented on each method.

use async_trait::async_trait;
use thiserror::Error;

use crate::context::RunContext;
use crate::status::{Order, PersistedStatus, Status};

/// Errors that can occur inside a [`Manager`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to reach the store.
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Query execution failed.
    #[error("query failed: {reason}")]
    QueryFailed { reason: String },

    /// A lock could not be taken, renewed or released.
    #[error("lock '{lock}' unavailable: {reason}")]
    LockUnavailable { lock: String, reason: String },

    /// A persisted value could not be decoded.
    #[error("corrupt record: {reason}")]
    CorruptRecord { reason: String },

    /// The operation outlived its context deadline.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The operation's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Required data store has not been created.
    #[error("data store '{name}' does not exist")]
    MissingDataStore { name: String },
}

impl StoreError {
    /// Create a connection failed error.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Create a query failed error.
    pub fn query_failed(reason: impl Into<String>) -> Self {
        Self::QueryFailed {
            reason: reason.into(),
        }
    }

    /// Create a lock unavailable error.
    pub fn lock_unavailable(lock: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LockUnavailable {
            lock: lock.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt record error.
    pub fn corrupt_record(reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub const fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a missing data store error.
    pub fn missing_data_store(name: impl Into<String>) -> Self {
        Self::MissingDataStore { name: name.into() }
    }

    /// Check if error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::LockUnavailable { .. }
        )
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Locking and status-persistence primitives the orchestrator runs against.
///
/// Every method receives the current [`RunContext`]; implementations should
/// stop waiting once it is cancelled.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Block until the global data-store setup lock is held.
    async fn acquire_db_lock(&self, ctx: &RunContext) -> StoreResult<()>;

    /// Create the lock table and the status table if absent. Idempotent.
    async fn ensure_data_stores(&self, ctx: &RunContext) -> StoreResult<()>;

    /// Release the lock taken by [`Manager::acquire_db_lock`].
    async fn release_db_lock(&self, ctx: &RunContext) -> StoreResult<()>;

    /// Block until the run-exclusivity lock is held.
    async fn acquire_migration_lock(&self, ctx: &RunContext) -> StoreResult<()>;

    /// Renew the run-exclusivity lock.
    ///
    /// A failure means exclusivity may have been lost.
    async fn migration_lock_heartbeat(&self, ctx: &RunContext) -> StoreResult<()>;

    /// Every persisted `{order, status}` row.
    async fn list_statuses(&self, ctx: &RunContext) -> StoreResult<Vec<PersistedStatus>>;

    /// Upsert the status for one order. Last write wins.
    async fn persist_status(&self, ctx: &RunContext, order: Order, status: Status)
    -> StoreResult<()>;

    /// Release the run-exclusivity lock.
    async fn release_migration_lock(&self, ctx: &RunContext) -> StoreResult<()>;
}
