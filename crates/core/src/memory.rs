//! In-memory [`Manager`] for tests and local simulation.
//!
//! Locks are real (semaphore-backed) so a second acquirer blocks until the
//! first releases. Every call is appended to a journal that tests can
//! assert on, and any call can be made to fail on demand.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::context::RunContext;
use crate::manager::{Manager, StoreError, StoreResult};
use crate::status::{Order, PersistedStatus, Status};

/// Name of the lock table created by `ensure_data_stores`.
pub const LOCK_TABLE: &str = "migration_locks";
/// Name of the status table created by `ensure_data_stores`.
pub const STATUS_TABLE: &str = "migration_status";

const DB_LOCK: &str = "data_store_setup";
const MIGRATION_LOCK: &str = "migration_run";

/// One recorded call against the manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManagerCall {
    AcquireDbLock,
    EnsureDataStores,
    ReleaseDbLock,
    AcquireMigrationLock,
    MigrationLockHeartbeat,
    ListStatuses,
    PersistStatus(Order, Status),
    ReleaseMigrationLock,
    /// Free-form marker added by the caller, e.g. from inside a migration.
    Note(String),
}

impl fmt::Display for ManagerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcquireDbLock => write!(f, "AcquireDBLock"),
            Self::EnsureDataStores => write!(f, "EnsureDataStores"),
            Self::ReleaseDbLock => write!(f, "ReleaseDBLock"),
            Self::AcquireMigrationLock => write!(f, "AcquireMigrationLock"),
            Self::MigrationLockHeartbeat => write!(f, "MigrationLockHeartbeat"),
            Self::ListStatuses => write!(f, "ListStatuses"),
            Self::PersistStatus(order, status) => write!(f, "PersistStatus({order},{status})"),
            Self::ReleaseMigrationLock => write!(f, "ReleaseMigrationLock"),
            Self::Note(note) => f.write_str(note),
        }
    }
}

/// A stored status row with its last write time.
#[derive(Debug, Clone, Serialize)]
pub struct StatusRow {
    pub order: Order,
    pub status: Status,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    data_stores_exist: bool,
    rows: Vec<StatusRow>,
    journal: Vec<ManagerCall>,
    failures: HashSet<ManagerCall>,
    db_permit: Option<OwnedSemaphorePermit>,
    migration_permit: Option<OwnedSemaphorePermit>,
}

/// Memory-backed manager with real lock semantics.
#[derive(Debug)]
pub struct InMemoryManager {
    state: Mutex<State>,
    db_lock: Arc<Semaphore>,
    migration_lock: Arc<Semaphore>,
}

impl Default for InMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryManager {
    /// Create an empty manager. Data stores do not exist yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            db_lock: Arc::new(Semaphore::new(1)),
            migration_lock: Arc::new(Semaphore::new(1)),
        }
    }

    /// Seed raw status rows, as if written by earlier runs.
    ///
    /// Rows are stored verbatim, so duplicate or negative orders can be used
    /// to model a corrupted store. Seeding implies the data stores exist.
    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = PersistedStatus>) -> Self {
        let state = self.state.get_mut();
        state.data_stores_exist = true;
        state.rows.extend(statuses.into_iter().map(|row| StatusRow {
            order: row.order,
            status: row.status,
            updated_at: Utc::now(),
        }));
        self
    }

    /// Make every future call equal to `call` fail.
    pub async fn fail_on(&self, call: ManagerCall) {
        self.state.lock().await.failures.insert(call);
    }

    /// Stop failing calls equal to `call`.
    pub async fn heal(&self, call: &ManagerCall) {
        self.state.lock().await.failures.remove(call);
    }

    /// Append a marker to the journal.
    pub async fn note(&self, note: impl Into<String>) {
        self.state.lock().await.journal.push(ManagerCall::Note(note.into()));
    }

    /// Every call recorded so far, in order.
    pub async fn calls(&self) -> Vec<ManagerCall> {
        self.state.lock().await.journal.clone()
    }

    /// How many times `call` was recorded.
    pub async fn count(&self, call: &ManagerCall) -> usize {
        self.state
            .lock()
            .await
            .journal
            .iter()
            .filter(|recorded| *recorded == call)
            .count()
    }

    /// Forget the journal, keeping stored data and injected failures.
    pub async fn clear_calls(&self) {
        self.state.lock().await.journal.clear();
    }

    /// Current status rows, in storage order.
    pub async fn rows(&self) -> Vec<StatusRow> {
        self.state.lock().await.rows.clone()
    }

    /// Current status of one order, if stored.
    pub async fn status_of(&self, order: Order) -> Option<Status> {
        self.state
            .lock()
            .await
            .rows
            .iter()
            .find(|row| row.order == order)
            .map(|row| row.status)
    }

    /// Whether the run-exclusivity lock is currently held.
    #[must_use]
    pub fn is_migration_lock_held(&self) -> bool {
        self.migration_lock.available_permits() == 0
    }

    /// Whether the data-store setup lock is currently held.
    #[must_use]
    pub fn is_db_lock_held(&self) -> bool {
        self.db_lock.available_permits() == 0
    }

    async fn record(&self, call: ManagerCall) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.journal.push(call.clone());
        if state.failures.contains(&call) {
            debug!(call = %call, "Injected failure");
            return Err(injected_failure(&call));
        }
        Ok(())
    }

    async fn acquire(
        &self,
        ctx: &RunContext,
        lock: &Arc<Semaphore>,
        name: &str,
    ) -> StoreResult<OwnedSemaphorePermit> {
        let semaphore = Arc::clone(lock);
        ctx.bound(async move {
            semaphore
                .acquire_owned()
                .await
                .map_err(|_| StoreError::lock_unavailable(name, "lock closed"))
        })
        .await
    }
}

fn injected_failure(call: &ManagerCall) -> StoreError {
    match call {
        ManagerCall::AcquireDbLock | ManagerCall::ReleaseDbLock => {
            StoreError::lock_unavailable(DB_LOCK, "injected failure")
        }
        ManagerCall::AcquireMigrationLock
        | ManagerCall::MigrationLockHeartbeat
        | ManagerCall::ReleaseMigrationLock => {
            StoreError::lock_unavailable(MIGRATION_LOCK, "injected failure")
        }
        other => StoreError::query_failed(format!("injected failure on {other}")),
    }
}

#[async_trait]
impl Manager for InMemoryManager {
    async fn acquire_db_lock(&self, ctx: &RunContext) -> StoreResult<()> {
        self.record(ManagerCall::AcquireDbLock).await?;
        let permit = self.acquire(ctx, &self.db_lock, DB_LOCK).await?;
        self.state.lock().await.db_permit = Some(permit);
        Ok(())
    }

    async fn ensure_data_stores(&self, _ctx: &RunContext) -> StoreResult<()> {
        self.record(ManagerCall::EnsureDataStores).await?;
        let mut state = self.state.lock().await;
        if state.db_permit.is_none() {
            return Err(StoreError::lock_unavailable(
                DB_LOCK,
                "data stores must be created under the setup lock",
            ));
        }
        if !state.data_stores_exist {
            debug!(tables = ?[LOCK_TABLE, STATUS_TABLE], "Creating data stores");
            state.data_stores_exist = true;
        }
        Ok(())
    }

    async fn release_db_lock(&self, _ctx: &RunContext) -> StoreResult<()> {
        self.record(ManagerCall::ReleaseDbLock).await?;
        self.state
            .lock()
            .await
            .db_permit
            .take()
            .map(drop)
            .ok_or_else(|| StoreError::lock_unavailable(DB_LOCK, "lock not held"))
    }

    async fn acquire_migration_lock(&self, ctx: &RunContext) -> StoreResult<()> {
        self.record(ManagerCall::AcquireMigrationLock).await?;
        let permit = self.acquire(ctx, &self.migration_lock, MIGRATION_LOCK).await?;
        self.state.lock().await.migration_permit = Some(permit);
        Ok(())
    }

    async fn migration_lock_heartbeat(&self, _ctx: &RunContext) -> StoreResult<()> {
        self.record(ManagerCall::MigrationLockHeartbeat).await?;
        if self.state.lock().await.migration_permit.is_some() {
            Ok(())
        } else {
            Err(StoreError::lock_unavailable(MIGRATION_LOCK, "lock not held"))
        }
    }

    async fn list_statuses(&self, _ctx: &RunContext) -> StoreResult<Vec<PersistedStatus>> {
        self.record(ManagerCall::ListStatuses).await?;
        let state = self.state.lock().await;
        if !state.data_stores_exist {
            return Err(StoreError::missing_data_store(STATUS_TABLE));
        }
        Ok(state
            .rows
            .iter()
            .map(|row| PersistedStatus::new(row.order, row.status))
            .collect())
    }

    async fn persist_status(
        &self,
        _ctx: &RunContext,
        order: Order,
        status: Status,
    ) -> StoreResult<()> {
        self.record(ManagerCall::PersistStatus(order, status)).await?;
        let mut state = self.state.lock().await;
        if !state.data_stores_exist {
            return Err(StoreError::missing_data_store(STATUS_TABLE));
        }

        let updated_at = Utc::now();
        match state.rows.iter_mut().find(|row| row.order == order) {
            Some(row) => {
                row.status = status;
                row.updated_at = updated_at;
            }
            None => state.rows.push(StatusRow {
                order,
                status,
                updated_at,
            }),
        }
        Ok(())
    }

    async fn release_migration_lock(&self, _ctx: &RunContext) -> StoreResult<()> {
        self.record(ManagerCall::ReleaseMigrationLock).await?;
        self.state
            .lock()
            .await
            .migration_permit
            .take()
            .map(drop)
            .ok_or_else(|| StoreError::lock_unavailable(MIGRATION_LOCK, "lock not held"))
    }
}
