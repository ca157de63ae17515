//! Ordered collection of declared migrations.

use std::collections::BTreeMap;

use migrator_core::Order;
use thiserror::Error;
use tracing::debug;

use crate::registration::{MigrationEntry, Registration};

/// A registration rejected by the [`Registry`].
///
/// These signal a broken build rather than runtime state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("migration order must be non-negative, got {order}")]
    NegativeOrder { order: Order },

    #[error("migration {order} has no migration function")]
    MissingMigration { order: Order },

    #[error("migration {order} is already registered")]
    DuplicateOrder { order: Order },
}

/// Owns the Order → registration mapping and yields a deterministic run order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<Order, MigrationEntry>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a registration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the order is negative, the migration
    /// function is missing, or the order is already taken. The registry is
    /// left unchanged on error.
    pub fn try_register(&mut self, registration: Registration) -> Result<(), RegistryError> {
        let order = registration.order();
        if !order.is_valid() {
            return Err(RegistryError::NegativeOrder { order });
        }
        if self.entries.contains_key(&order) {
            return Err(RegistryError::DuplicateOrder { order });
        }

        let entry = registration
            .into_entry()
            .ok_or(RegistryError::MissingMigration { order })?;

        debug!(order = %order, enabled = entry.is_enabled(), "Registered migration");
        self.entries.insert(order, entry);
        Ok(())
    }

    /// Validate and store a registration, treating rejection as fatal.
    ///
    /// Use at startup, where a bad registration means the program itself is
    /// wrong. Use [`Registry::try_register`] to handle the error instead.
    ///
    /// # Panics
    ///
    /// Panics if the order is negative, the migration function is missing,
    /// or the order is already registered.
    #[allow(clippy::panic)]
    pub fn register(&mut self, registration: Registration) -> &mut Self {
        if let Err(e) = self.try_register(registration) {
            panic!("invalid migration registration: {e}");
        }
        self
    }

    /// All registrations, ascending by order.
    #[must_use]
    pub fn ordered_registrations(&self) -> Vec<MigrationEntry> {
        self.entries.values().cloned().collect()
    }

    /// Look up one registration.
    #[must_use]
    pub fn get(&self, order: Order) -> Option<&MigrationEntry> {
        self.entries.get(&order)
    }

    #[must_use]
    pub fn contains(&self, order: Order) -> bool {
        self.entries.contains_key(&order)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(order: i64) -> Registration {
        Registration::new(order).migrate_with(|_ctx, _previous| async { Ok(()) })
    }

    #[test]
    fn test_try_register_rejects_negative_order() {
        let mut registry = Registry::new();
        let result = registry.try_register(noop(-1));
        assert_eq!(
            result,
            Err(RegistryError::NegativeOrder {
                order: Order::new(-1)
            })
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_try_register_rejects_missing_migration() {
        let mut registry = Registry::new();
        let result = registry.try_register(Registration::new(1));
        assert_eq!(
            result,
            Err(RegistryError::MissingMigration {
                order: Order::new(1)
            })
        );
    }

    #[test]
    fn test_try_register_rejects_duplicates_and_keeps_first() {
        let mut registry = Registry::new();
        assert!(registry.try_register(noop(1)).is_ok());

        let result = registry.try_register(noop(1).disabled());

        assert_eq!(
            result,
            Err(RegistryError::DuplicateOrder {
                order: Order::new(1)
            })
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.get(Order::new(1)).is_some_and(MigrationEntry::is_enabled));
    }

    #[test]
    fn test_order_zero_is_valid() {
        let mut registry = Registry::new();
        assert!(registry.try_register(noop(0)).is_ok());
        assert!(registry.contains(Order::new(0)));
    }
}
