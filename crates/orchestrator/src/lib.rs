//! # Migrator orchestrator
//!
//! Sequences one migration run:
//!
//! 1. bootstrap the lock and status tables under the setup lock
//! 2. take the migration lock and keep it alive from a background task
//! 3. reconcile the registry with persisted history
//! 4. mark the work queue pending, then run it in order
//!
//! The migration lock is always released, and independent failures are
//! reported together.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod bootstrap;
pub mod config;
pub mod lock;
pub mod migrator;
pub mod reconciler;
pub mod runner;

pub use config::MigratorConfig;
pub use lock::{HeartbeatSettings, LockKeeper};
pub use migrator::{Migrator, MigratorBuilder, RunSummary};
pub use reconciler::{PlannedMigration, Reconciliation};
