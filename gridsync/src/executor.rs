//! The transactional executor: runs an execution plan against one table.
//!
//! Schema steps run first, each alone (their transactionality is
//! dialect-routed in [`ops::execute_schema_change`]); data steps share one
//! transaction, which is retried as a whole on transient failures and
//! bounded by the configured wall-clock budget.

use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, info};

use gridsync_data::PkSpec;
use gridsync_errors::{Fault, SyncResult};
use gridsync_tracker::{ExecutionPlan, PlanStep, StepKind};

use crate::config::SyncConfig;
use crate::engine::Engine;
use crate::health::check_connection_health;
use crate::ops;
use crate::retry::retry;

/// Execute `plan` against `table`. An empty plan is a successful no-op.
pub async fn execute_plan(
    engine: &dyn Engine,
    table: &str,
    plan: &ExecutionPlan,
    schema: Option<&str>,
    pk_spec: &PkSpec,
    config: &SyncConfig,
) -> SyncResult<()> {
    if plan.is_empty() {
        return Ok(());
    }

    if config.check_health
        && !check_connection_health(engine, config.connection_timeout).await
    {
        return Err(Fault::connection_with(
            format!("connection health check failed before pushing '{table}'"),
            engine.pool_status().to_json(),
        ));
    }

    let (schema_steps, data_steps): (Vec<&PlanStep>, Vec<&PlanStep>) = plan
        .steps()
        .iter()
        .partition(|s| s.kind == StepKind::SchemaChange);

    // Schema steps surface errors immediately; they are never retried.
    for step in &schema_steps {
        if let gridsync_tracker::StepPayload::Schema(change) = &step.payload {
            ops::execute_schema_change(engine, table, schema, change).await?;
        }
    }

    if data_steps.is_empty() {
        return Ok(());
    }

    info!(
        table,
        steps = data_steps.len(),
        dialect = %engine.dialect(),
        "executing data steps"
    );

    let started = Instant::now();
    let run = retry(&config.retry_policy, table, || {
        let data_steps = &data_steps;
        async move {
            let result =
                run_data_transaction(engine, table, schema, pk_spec, data_steps, config).await;
            if let Err(fault) = &result {
                if fault.is_deadlock() {
                    // Deadlocks get an extra pause proportional to how long
                    // this push has been running, on top of the policy's own
                    // backoff.
                    let extra = (config.retry_policy.delay_for(0)
                        + started.elapsed().mul_f64(0.1))
                    .min(Duration::from_secs(1));
                    debug!(table, extra_ms = extra.as_millis() as u64, "deadlock backoff");
                    tokio::time::sleep(extra).await;
                }
            }
            result
        }
    });

    match config.query_timeout {
        Some(budget) => match tokio::time::timeout(budget, run).await {
            Ok(result) => result,
            Err(_) => Err(Fault::Transaction {
                message: format!("data transaction for '{table}' exceeded its wall-clock budget"),
                details: json!({
                    "table": table,
                    "schema": schema,
                    "timeout_s": budget.as_secs_f64(),
                    "elapsed_s": started.elapsed().as_secs_f64(),
                }),
            }),
        },
        None => run.await,
    }
}

async fn run_data_transaction(
    engine: &dyn Engine,
    table: &str,
    schema: Option<&str>,
    pk_spec: &PkSpec,
    data_steps: &[&PlanStep],
    config: &SyncConfig,
) -> SyncResult<()> {
    let dialect = engine.dialect();
    let mut txn = engine.begin().await?;

    if let Some(level) = &config.isolation_level {
        if dialect.supports_isolation_level() {
            txn.execute(&format!("SET TRANSACTION ISOLATION LEVEL {level}"), &[])
                .await?;
        } else {
            debug!(table, %dialect, %level, "isolation level not supported, skipping");
        }
    }

    for step in data_steps {
        if let Err(fault) =
            ops::execute_data_step(txn.as_mut(), dialect, table, schema, pk_spec, step).await
        {
            let _ = txn.rollback().await;
            return Err(fault);
        }
    }
    txn.commit().await
}
