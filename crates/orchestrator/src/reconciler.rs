//! Reconciliation of declared migrations against persisted run history.
//!
//! Produces the work queue for one run and refuses to produce one when the
//! persisted history cannot be trusted.

use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::Itertools;
use migrator_core::{Error, Manager, Order, PersistedStatus, Result, RunContext, Status};
use migrator_registry::{Migration, MigrationEntry, Registry};
use tap::Tap;
use tracing::{debug, info, warn};

/// A migration scheduled to run in this invocation.
#[derive(Clone)]
pub struct PlannedMigration {
    pub order: Order,
    /// Status from an earlier attempt, [`Status::Pending`] on a first run.
    pub previous: Status,
    pub migration: Arc<dyn Migration>,
}

impl std::fmt::Debug for PlannedMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedMigration")
            .field("order", &self.order)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

/// Outcome of reconciling the registry with the store.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Work queue, ascending by order.
    pub scheduled: Vec<PlannedMigration>,
    /// Enabled migrations skipped because they already completed.
    pub already_completed: Vec<Order>,
    /// Every disabled registration.
    pub disabled: Vec<Order>,
    /// Disabled migrations that had persisted history.
    pub superseded: Vec<Order>,
}

impl Reconciliation {
    /// Orders in the work queue.
    #[must_use]
    pub fn scheduled_orders(&self) -> Vec<Order> {
        self.scheduled.iter().map(|planned| planned.order).collect()
    }
}

/// Fetch persisted statuses and compute the work queue.
///
/// # Errors
///
/// Returns [`Error::ListStatuses`] if the store cannot be read, or any of
/// the consistency errors documented on [`reconcile_statuses`].
pub async fn reconcile(
    ctx: &RunContext,
    manager: &dyn Manager,
    registry: &Registry,
) -> Result<Reconciliation> {
    let statuses = manager
        .list_statuses(ctx)
        .await
        .map_err(|source| Error::ListStatuses { source })?;

    debug!(persisted = statuses.len(), "Fetched persisted statuses");
    reconcile_statuses(registry, statuses)
}

/// Compute the work queue from an already-fetched status list.
///
/// # Errors
///
/// - [`Error::InvalidStatus`] if a persisted order is negative.
/// - [`Error::DuplicateOrder`] if the store holds an order twice.
/// - [`Error::NotInRegistry`] listing every persisted order with no registration.
/// - [`Error::OutOfOrder`] for the lowest scheduled order below the highest
///   completed one.
pub fn reconcile_statuses(
    registry: &Registry,
    statuses: Vec<PersistedStatus>,
) -> Result<Reconciliation> {
    statuses.iter().try_for_each(PersistedStatus::validate)?;

    if let Some(order) = statuses.iter().map(|persisted| persisted.order).duplicates().next() {
        return Err(Error::DuplicateOrder { order });
    }

    let mut unaccounted: BTreeMap<Order, Status> = statuses
        .into_iter()
        .map(|persisted| (persisted.order, persisted.status))
        .collect();

    let mut plan = Reconciliation::default();
    let mut highest_completed: Option<Order> = None;

    for entry in registry.ordered_registrations() {
        let order = entry.order();
        let persisted = unaccounted.remove(&order);

        match (entry.is_enabled(), persisted) {
            (false, Some(status)) => {
                warn!(
                    %order,
                    %status,
                    "Migration is disabled but has persisted history; ignoring it"
                );
                plan.superseded.push(order);
                plan.disabled.push(order);
            }
            (false, None) => plan.disabled.push(order),
            (true, Some(Status::Completed)) => {
                highest_completed = highest_completed.max(Some(order));
                plan.already_completed.push(order);
            }
            (true, Some(previous)) => plan.scheduled.push(planned(&entry, previous)),
            (true, None) => plan.scheduled.push(planned(&entry, Status::Pending)),
        }
    }

    if !unaccounted.is_empty() {
        return Err(Error::NotInRegistry {
            orders: unaccounted.into_keys().collect(),
        });
    }

    if let Some(highest_completed) = highest_completed {
        let behind = plan
            .scheduled
            .iter()
            .find(|planned| planned.order < highest_completed);
        if let Some(behind) = behind {
            return Err(Error::OutOfOrder {
                order: behind.order,
                highest_completed,
            });
        }
    }

    Ok(plan.tap(|plan| {
        info!(
            scheduled = plan.scheduled.len(),
            already_completed = plan.already_completed.len(),
            superseded = plan.superseded.len(),
            "Reconciled migrations"
        );
    }))
}

fn planned(entry: &MigrationEntry, previous: Status) -> PlannedMigration {
    PlannedMigration {
        order: entry.order(),
        previous,
        migration: entry.migration(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use migrator_core::{InMemoryManager, ManagerCall};
    use migrator_registry::Registration;

    use super::*;

    fn registry(orders: &[(i64, bool)]) -> Registry {
        let mut registry = Registry::new();
        for &(order, enabled) in orders {
            registry.register(
                Registration::new(order)
                    .migrate_with(|_, _| async { Ok(()) })
                    .enabled(enabled),
            );
        }
        registry
    }

    fn persisted(order: i64, status: Status) -> PersistedStatus {
        PersistedStatus::new(Order::new(order), status)
    }

    fn orders(values: &[i64]) -> Vec<Order> {
        values.iter().copied().map(Order::new).collect()
    }

    #[test]
    fn test_empty_store_schedules_every_enabled_migration() {
        let plan = reconcile_statuses(&registry(&[(1, true), (2, true), (3, false)]), Vec::new())
            .unwrap();

        assert_eq!(plan.scheduled_orders(), orders(&[1, 2]));
        assert!(plan.scheduled.iter().all(|p| p.previous == Status::Pending));
        assert!(plan.already_completed.is_empty());
    }

    #[test]
    fn test_completed_migrations_are_skipped() {
        let plan = reconcile_statuses(
            &registry(&[(1, true), (2, true), (3, true)]),
            vec![persisted(1, Status::Completed), persisted(2, Status::Completed)],
        )
        .unwrap();

        assert_eq!(plan.scheduled_orders(), orders(&[3]));
        assert_eq!(plan.already_completed, orders(&[1, 2]));
    }

    #[test]
    fn test_unfinished_migrations_carry_previous_status() {
        let plan = reconcile_statuses(
            &registry(&[(1, true), (2, true), (3, true)]),
            vec![
                persisted(1, Status::Failed),
                persisted(2, Status::Started),
                persisted(3, Status::Pending),
            ],
        )
        .unwrap();

        let previous: Vec<Status> = plan.scheduled.iter().map(|p| p.previous).collect();
        assert_eq!(previous, vec![Status::Failed, Status::Started, Status::Pending]);
    }

    #[test]
    fn test_disabled_history_is_ignored() {
        let plan = reconcile_statuses(
            &registry(&[(1, false), (2, true)]),
            vec![persisted(1, Status::Failed)],
        )
        .unwrap();

        assert_eq!(plan.scheduled_orders(), orders(&[2]));
        assert_eq!(plan.superseded, orders(&[1]));
        assert_eq!(plan.disabled, orders(&[1]));
    }

    #[test]
    fn test_disabled_completed_does_not_block_earlier_orders() {
        let plan = reconcile_statuses(
            &registry(&[(1, true), (2, false)]),
            vec![persisted(2, Status::Completed)],
        )
        .unwrap();

        assert_eq!(plan.scheduled_orders(), orders(&[1]));
    }

    #[test]
    fn test_orphaned_statuses_are_all_reported() {
        let err = reconcile_statuses(
            &registry(&[(1, true)]),
            vec![persisted(7, Status::Completed), persisted(4, Status::Failed)],
        )
        .unwrap_err();

        match err {
            Error::NotInRegistry { orders: found } => assert_eq!(found, orders(&[4, 7])),
            other => panic!("expected NotInRegistry, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_persisted_order_is_rejected() {
        let err = reconcile_statuses(
            &registry(&[(1, true)]),
            vec![persisted(1, Status::Completed), persisted(1, Status::Failed)],
        )
        .unwrap_err();

        assert!(matches!(err, Error::DuplicateOrder { order } if order == Order::new(1)));
    }

    #[test]
    fn test_negative_persisted_order_is_rejected() {
        let err = reconcile_statuses(&registry(&[(1, true)]), vec![persisted(-1, Status::Completed)])
            .unwrap_err();

        assert!(matches!(err, Error::InvalidStatus { .. }));
    }

    #[test]
    fn test_running_behind_completed_is_rejected() {
        let err = reconcile_statuses(
            &registry(&[(1, true), (2, true)]),
            vec![persisted(2, Status::Completed)],
        )
        .unwrap_err();

        match err {
            Error::OutOfOrder {
                order,
                highest_completed,
            } => {
                assert_eq!(order, Order::new(1));
                assert_eq!(highest_completed, Order::new(2));
            }
            other => panic!("expected OutOfOrder, got {other:?}"),
        }
    }

    #[test]
    fn test_orders_above_highest_completed_may_run() {
        let plan = reconcile_statuses(
            &registry(&[(1, true), (2, true), (5, true)]),
            vec![persisted(1, Status::Completed), persisted(2, Status::Failed)],
        )
        .unwrap();

        assert_eq!(plan.scheduled_orders(), orders(&[2, 5]));
    }

    #[tokio::test]
    async fn test_reconcile_reads_store_once() {
        let manager =
            InMemoryManager::new().with_statuses(vec![persisted(1, Status::Completed)]);

        let plan = reconcile(
            &RunContext::background(),
            &manager,
            &registry(&[(1, true), (2, true)]),
        )
        .await
        .unwrap();

        assert_eq!(plan.scheduled_orders(), orders(&[2]));
        assert_eq!(manager.calls().await, vec![ManagerCall::ListStatuses]);
    }

    #[tokio::test]
    async fn test_list_failure_is_wrapped() {
        let manager = InMemoryManager::new().with_statuses(Vec::new());
        manager.fail_on(ManagerCall::ListStatuses).await;

        let result = reconcile(&RunContext::background(), &manager, &registry(&[(1, true)])).await;

        assert!(matches!(result, Err(Error::ListStatuses { .. })));
    }
}
