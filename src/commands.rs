//! CLI command handlers.
//!
//! Handlers return `anyhow::Result` and print JSON to stdout.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, ensure};
use migrator_core::{InMemoryManager, StatusRow};
use migrator_orchestrator::{Migrator, MigratorConfig, RunSummary};
use migrator_registry::{Registration, Registry};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::Commands;

/// Execute a CLI command.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Check { config } => cmd_check(config.as_deref()),

        Commands::Simulate {
            config,
            migrations,
            fail,
            disable,
            runs,
        } => {
            let config = load_config(config.as_deref())?;
            let plan = SimulationPlan {
                migrations,
                fail,
                disable,
                runs,
            };
            cmd_simulate(config, &plan).await
        }
    }
}

/// Load the config file (or defaults) and layer environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<MigratorConfig> {
    let base = match path {
        Some(path) => MigratorConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => MigratorConfig::default(),
    };

    base.with_env_overrides()
        .context("Invalid MIGRATOR_* environment override")
}

fn cmd_check(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    info!("Configuration is valid");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn cmd_simulate(config: MigratorConfig, plan: &SimulationPlan) -> Result<()> {
    let report = simulate(config, plan).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Parameters of a simulated deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationPlan {
    /// Register orders `1..=migrations`.
    pub migrations: i64,
    /// Order that fails on its first attempt only.
    pub fail: Option<i64>,
    /// Orders registered as disabled.
    pub disable: Vec<i64>,
    /// Number of consecutive runs.
    pub runs: usize,
}

/// Outcome of one simulated run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything a simulation produced.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub runs: Vec<RunReport>,
    /// Final contents of the status table.
    pub statuses: Vec<StatusRow>,
}

/// Run `plan.runs` migrations against a fresh in-memory store.
///
/// Failed runs are recorded in the report, not returned as errors, so a
/// later run can show the retry.
pub async fn simulate(config: MigratorConfig, plan: &SimulationPlan) -> Result<SimulationReport> {
    ensure!(plan.migrations >= 0, "--migrations must not be negative");
    ensure!(plan.runs > 0, "--runs must be at least 1");
    for order in plan.fail.iter().chain(&plan.disable) {
        ensure!(
            (1..=plan.migrations).contains(order),
            "order {order} is outside 1..={}",
            plan.migrations
        );
    }

    let manager = Arc::new(InMemoryManager::new());
    let migrator = Migrator::builder()
        .manager(manager.clone())
        .registry(simulated_registry(plan))
        .config(config)
        .build()?;

    let mut runs = Vec::with_capacity(plan.runs);
    for run in 1..=plan.runs {
        let report = match migrator.run().await {
            Ok(summary) => RunReport {
                run,
                summary: Some(summary),
                error: None,
            },
            Err(e) => {
                warn!(run, error = %e, "Simulated run failed");
                RunReport {
                    run,
                    summary: None,
                    error: Some(e.to_string()),
                }
            }
        };
        runs.push(report);
    }

    Ok(SimulationReport {
        runs,
        statuses: manager.rows().await,
    })
}

fn simulated_registry(plan: &SimulationPlan) -> Registry {
    let mut registry = Registry::new();
    for order in 1..=plan.migrations {
        let fails_once = plan.fail == Some(order);
        let failed_already = Arc::new(AtomicBool::new(false));
        let registration = Registration::new(order)
            .migrate_with(move |_ctx, previous| {
                let fail_now = fails_once && !failed_already.swap(true, Ordering::SeqCst);
                async move {
                    info!(order, %previous, "Simulated migration");
                    if fail_now {
                        Err(format!("simulated failure of migration {order}").into())
                    } else {
                        Ok(())
                    }
                }
            })
            .enabled(!plan.disable.contains(&order));
        registry.register(registration);
    }
    registry
}
