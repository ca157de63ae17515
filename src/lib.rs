#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Migrator
//!
//! Ordered, exclusive, resumable migrations.
//!
//! This library re-exports the workspace crates for convenience; the CLI
//! lives in [`cli`] and [`commands`].

pub use migrator_core;
pub use migrator_orchestrator;
pub use migrator_registry;

pub use migrator_core::{
    BoxError, Error, InMemoryManager, Manager, Order, PersistedStatus, Result, RunContext, Status,
    StoreError, StoreResult,
};
pub use migrator_orchestrator::{Migrator, MigratorBuilder, MigratorConfig, RunSummary};
pub use migrator_registry::{Migration, Registration, Registry, migration_fn};

pub mod cli;
pub mod commands;
