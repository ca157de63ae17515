//! Two-phase execution of a reconciled work queue.
//!
//! Every scheduled migration is first marked [`Status::Pending`] so the
//! whole intended run is visible in the store, then each one is executed
//! in order. The first failure stops the run.

use migrator_core::{Error, Manager, Order, Result, RunContext, Status};
use tracing::{debug, error, info};

use crate::reconciler::PlannedMigration;

/// Run every planned migration in order.
///
/// Returns the orders that completed.
///
/// # Errors
///
/// Returns [`Error::PersistStatus`] if a status cannot be written, aborting
/// before any migration runs when it happens during the pending phase.
/// Returns [`Error::MigrationFailed`] for the first migration that fails,
/// joined with a [`Error::PersistStatus`] if recording the failure also
/// failed.
pub async fn run_migrations(
    ctx: &RunContext,
    manager: &dyn Manager,
    planned: &[PlannedMigration],
) -> Result<Vec<Order>> {
    for migration in planned {
        persist(ctx, manager, migration.order, Status::Pending).await?;
    }

    let mut executed = Vec::with_capacity(planned.len());
    for migration in planned {
        run_one(ctx, manager, migration).await?;
        executed.push(migration.order);
    }

    Ok(executed)
}

async fn run_one(ctx: &RunContext, manager: &dyn Manager, planned: &PlannedMigration) -> Result<()> {
    let order = planned.order;
    persist(ctx, manager, order, Status::Started).await?;

    info!(%order, previous = %planned.previous, "Running migration");
    match planned.migration.migrate(ctx.clone(), planned.previous).await {
        Ok(()) => {
            persist(ctx, manager, order, Status::Completed).await?;
            info!(%order, "Migration completed");
            Ok(())
        }
        Err(source) => {
            error!(%order, error = %source, "Migration failed");
            let failed = Error::migration_failed(order, source);
            match persist(ctx, manager, order, Status::Failed).await {
                Ok(()) => Err(failed),
                Err(persist_err) => Err(failed.join(persist_err)),
            }
        }
    }
}

async fn persist(ctx: &RunContext, manager: &dyn Manager, order: Order, status: Status) -> Result<()> {
    debug!(%order, %status, "Persisting migration status");
    manager
        .persist_status(ctx, order, status)
        .await
        .map_err(|source| Error::persist_status(order, status, source))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use std::sync::Arc;

    use migrator_core::{InMemoryManager, ManagerCall, PersistedStatus};
    use migrator_registry::migration_fn;

    use super::*;

    fn ok_step(manager: &Arc<InMemoryManager>, order: i64) -> PlannedMigration {
        let manager = Arc::clone(manager);
        PlannedMigration {
            order: Order::new(order),
            previous: Status::Pending,
            migration: migration_fn(move |_, _| {
                let manager = Arc::clone(&manager);
                async move {
                    manager.note(format!("run({order})")).await;
                    Ok(())
                }
            }),
        }
    }

    fn failing_step(order: i64) -> PlannedMigration {
        PlannedMigration {
            order: Order::new(order),
            previous: Status::Pending,
            migration: migration_fn(|_, _| async { Err("boom".into()) }),
        }
    }

    fn ready_manager() -> Arc<InMemoryManager> {
        Arc::new(InMemoryManager::new().with_statuses(Vec::<PersistedStatus>::new()))
    }

    fn persist_call(order: i64, status: Status) -> ManagerCall {
        ManagerCall::PersistStatus(Order::new(order), status)
    }

    #[tokio::test]
    async fn test_pending_phase_precedes_execution() {
        let manager = ready_manager();
        let planned = vec![ok_step(&manager, 1), ok_step(&manager, 2)];

        let executed = run_migrations(&RunContext::background(), manager.as_ref(), &planned)
            .await
            .unwrap();

        assert_eq!(executed, vec![Order::new(1), Order::new(2)]);
        assert_eq!(
            manager.calls().await,
            vec![
                persist_call(1, Status::Pending),
                persist_call(2, Status::Pending),
                persist_call(1, Status::Started),
                ManagerCall::Note("run(1)".to_string()),
                persist_call(1, Status::Completed),
                persist_call(2, Status::Started),
                ManagerCall::Note("run(2)".to_string()),
                persist_call(2, Status::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_first_failure_stops_run() {
        let manager = ready_manager();
        let planned = vec![failing_step(1), ok_step(&manager, 2)];

        let err = run_migrations(&RunContext::background(), manager.as_ref(), &planned)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("migration 1 failed: boom"));
        assert_eq!(manager.status_of(Order::new(1)).await, Some(Status::Failed));
        assert_eq!(manager.status_of(Order::new(2)).await, Some(Status::Pending));
        assert_eq!(manager.count(&ManagerCall::Note("run(2)".to_string())).await, 0);
    }

    #[tokio::test]
    async fn test_failed_mark_failure_is_joined() {
        let manager = ready_manager();
        manager.fail_on(persist_call(1, Status::Failed)).await;

        let err = run_migrations(&RunContext::background(), manager.as_ref(), &[failing_step(1)])
            .await
            .unwrap_err();

        let causes = err.causes();
        assert_eq!(causes.len(), 2);
        assert!(matches!(causes.first(), Some(Error::MigrationFailed { .. })));
        assert!(matches!(
            causes.get(1),
            Some(Error::PersistStatus { status: Status::Failed, .. })
        ));
    }

    #[tokio::test]
    async fn test_pending_phase_failure_runs_nothing() {
        let manager = ready_manager();
        manager.fail_on(persist_call(2, Status::Pending)).await;
        let planned = vec![ok_step(&manager, 1), ok_step(&manager, 2)];

        let result = run_migrations(&RunContext::background(), manager.as_ref(), &planned).await;

        assert!(matches!(result, Err(Error::PersistStatus { .. })));
        assert_eq!(manager.count(&persist_call(1, Status::Started)).await, 0);
    }

    #[tokio::test]
    async fn test_completion_write_failure_aborts() {
        let manager = ready_manager();
        manager.fail_on(persist_call(1, Status::Completed)).await;
        let planned = vec![ok_step(&manager, 1), ok_step(&manager, 2)];

        let result = run_migrations(&RunContext::background(), manager.as_ref(), &planned).await;

        assert!(matches!(
            result,
            Err(Error::PersistStatus { status: Status::Completed, .. })
        ));
        assert_eq!(manager.count(&persist_call(2, Status::Started)).await, 0);
    }

    #[tokio::test]
    async fn test_previous_status_is_passed_through() {
        let manager = ready_manager();
        let seen = Arc::new(tokio::sync::Mutex::new(None));
        let observed = Arc::clone(&seen);
        let planned = PlannedMigration {
            order: Order::new(3),
            previous: Status::Failed,
            migration: migration_fn(move |_, previous| {
                let observed = Arc::clone(&observed);
                async move {
                    *observed.lock().await = Some(previous);
                    Ok(())
                }
            }),
        };

        run_migrations(&RunContext::background(), manager.as_ref(), &[planned])
            .await
            .unwrap();

        assert_eq!(*seen.lock().await, Some(Status::Failed));
    }
}
