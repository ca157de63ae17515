//! Migration ordering and run-status types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Position of a migration in the required run sequence.
///
/// Orders are signed so that corrupted persisted values can be represented
/// and rejected; valid orders are non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Order(i64);

impl Order {
    /// Create an order from its raw value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// The raw order value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Whether the order is usable (non-negative).
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl From<i64> for Order {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last known execution state of one migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Queued for this run, not started yet.
    #[default]
    Pending,
    /// Execution began; no outcome recorded.
    Started,
    /// The migration function returned an error.
    Failed,
    /// The migration function succeeded.
    Completed,
}

impl Status {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Started, Self::Failed, Self::Completed];

    /// Lowercase name used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    /// Whether this status means the migration never has to run again.
    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown migration status '{s}'"))
    }
}

/// A `{Order, Status}` row read back from the status store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedStatus {
    /// Migration order.
    pub order: Order,
    /// Last persisted status.
    pub status: Status,
}

impl PersistedStatus {
    /// Create a persisted status row.
    #[must_use]
    pub const fn new(order: Order, status: Status) -> Self {
        Self { order, status }
    }

    /// Check that the row is well formed.
    ///
    /// The status is an enum and therefore always valid once decoded;
    /// stores reject unknown status strings while decoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStatus`] if the order is negative.
    pub fn validate(&self) -> Result<()> {
        if self.order.is_valid() {
            Ok(())
        } else {
            Err(Error::invalid_status(
                self.order,
                format!("order must be non-negative, got {}", self.order),
            ))
        }
    }
}
