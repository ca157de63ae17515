//! # Migrator registry
//!
//! Applications declare their migrations at startup:
//!
//! ```ignore
//! let mut registry = Registry::new();
//! registry
//!     .register(Registration::new(1).migrate_with(|ctx, _| async move { create_users(&ctx).await }))
//!     .register(Registration::new(2).migration(Arc::new(AddEmailIndex)))
//!     .register(Registration::new(3).migrate_with(|_, _| async { Ok(()) }).disabled());
//! ```
//!
//! The registry is the source of truth for which orders may exist; the
//! orchestrator refuses to run when the store knows about an order that is
//! not registered here.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod registration;
pub mod registry;

pub use registration::{FnMigration, Migration, MigrationEntry, Registration, migration_fn};
pub use registry::{Registry, RegistryError};
