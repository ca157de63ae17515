//! # Migrator core
//!
//! Shared vocabulary for the migrator workspace: migration [`Order`] and
//! [`Status`], the [`Manager`] store contract, the cancellable
//! [`RunContext`], and the [`Error`] taxonomy with aggregation.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod context;
pub mod error;
pub mod manager;
pub mod memory;
pub mod result;
pub mod status;

pub use context::{CancelReason, Canceller, RunContext, duration_ms};
pub use error::{BoxError, Error, Errors};
pub use manager::{Manager, StoreError, StoreResult};
pub use memory::{InMemoryManager, ManagerCall, StatusRow};
pub use result::{Result, ResultExt};
pub use status::{Order, PersistedStatus, Status};
