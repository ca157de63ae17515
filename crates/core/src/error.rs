//! Core error types for migrator operations.
//!
//! All errors are explicit, typed, and recoverable. Independent failures
//! (a failed migration *and* a failed lock release, say) are kept side by
//! side in [`Error::Multiple`] instead of one shadowing the other.

use std::fmt;

use itertools::Itertools;
use thiserror::Error;

use crate::manager::StoreError;
use crate::status::{Order, Status};

/// Boxed error returned by migration functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error type for migrator operations.
#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Lock errors
    #[error("failed to acquire data store lock: {source}")]
    AcquireDbLock { source: StoreError },

    #[error("failed to release data store lock: {source}")]
    ReleaseDbLock { source: StoreError },

    #[error("failed to acquire migration lock: {source}")]
    AcquireMigrationLock { source: StoreError },

    #[error("failed to release migration lock: {source}")]
    ReleaseMigrationLock { source: StoreError },

    // Store errors
    #[error("failed to ensure data stores exist: {source}")]
    EnsureDataStores { source: StoreError },

    #[error("failed to list migration statuses: {source}")]
    ListStatuses { source: StoreError },

    #[error("failed to persist status {status} for migration {order}: {source}")]
    PersistStatus {
        order: Order,
        status: Status,
        source: StoreError,
    },

    // Consistency errors
    #[error("invalid persisted status for migration {order}: {reason}")]
    InvalidStatus { order: Order, reason: String },

    #[error("duplicate order {order} in persisted statuses")]
    DuplicateOrder { order: Order },

    #[error("persisted migrations not in the registry: {}", format_orders(.orders))]
    NotInRegistry { orders: Vec<Order> },

    #[error(
        "migration {order} cannot run out of order: migration {highest_completed} has already completed"
    )]
    OutOfOrder {
        order: Order,
        highest_completed: Order,
    },

    // Execution errors
    #[error("migration {order} failed: {source}")]
    MigrationFailed { order: Order, source: BoxError },

    // Liveness errors
    #[error("migration lock heartbeat failed {failures} consecutive times: {source}")]
    HeartbeatFailed { failures: u32, source: StoreError },

    #[error("internal error: {reason}")]
    Internal { reason: String },

    // Aggregate of independent failures
    #[error(transparent)]
    Multiple(Errors),
}

fn format_orders(orders: &[Order]) -> String {
    orders.iter().join(", ")
}

impl Error {
    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a persist status error.
    #[must_use]
    pub const fn persist_status(order: Order, status: Status, source: StoreError) -> Self {
        Self::PersistStatus {
            order,
            status,
            source,
        }
    }

    /// Create an invalid status error.
    pub fn invalid_status(order: Order, reason: impl Into<String>) -> Self {
        Self::InvalidStatus {
            order,
            reason: reason.into(),
        }
    }

    /// Create a migration failed error.
    pub fn migration_failed(order: Order, source: impl Into<BoxError>) -> Self {
        Self::MigrationFailed {
            order,
            source: source.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Combine any number of errors into one.
    ///
    /// Returns `None` for an empty input and the error itself when there is
    /// exactly one. Nested aggregates are flattened.
    pub fn combine(errors: impl IntoIterator<Item = Self>) -> Option<Self> {
        let mut flat: Vec<Self> = errors.into_iter().flat_map(Self::into_leaves).collect();

        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Self::Multiple(Errors(flat))),
        }
    }

    /// Join two independent failures, keeping both.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        let mut flat = self.into_leaves();
        flat.extend(other.into_leaves());
        Self::Multiple(Errors(flat))
    }

    fn into_leaves(self) -> Vec<Self> {
        match self {
            Self::Multiple(inner) => inner.0,
            other => vec![other],
        }
    }

    /// Every leaf error, with aggregates flattened.
    #[must_use]
    pub fn causes(&self) -> Vec<&Self> {
        match self {
            Self::Multiple(inner) => inner.iter().flat_map(Self::causes).collect(),
            other => vec![other],
        }
    }

    /// Whether any leaf error matches the predicate.
    pub fn any(&self, predicate: impl Fn(&Self) -> bool) -> bool {
        self.causes().into_iter().any(predicate)
    }

    /// Check if the error signals a corrupted or inconsistent run history.
    #[must_use]
    pub fn is_consistency_error(&self) -> bool {
        self.any(|e| {
            matches!(
                e,
                Self::InvalidStatus { .. }
                    | Self::DuplicateOrder { .. }
                    | Self::NotInRegistry { .. }
                    | Self::OutOfOrder { .. }
            )
        })
    }
}

/// Independent failures collected from one orchestration run.
#[derive(Debug)]
pub struct Errors(Vec<Error>);

impl Errors {
    /// Iterate over the collected errors.
    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.0.iter()
    }

    /// Number of collected errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the underlying errors.
    #[must_use]
    pub fn into_vec(self) -> Vec<Error> {
        self.0
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join("; "))
    }
}

impl std::error::Error for Errors {}

impl<'a> IntoIterator for &'a Errors {
    type Item = &'a Error;
    type IntoIter = std::slice::Iter<'a, Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
