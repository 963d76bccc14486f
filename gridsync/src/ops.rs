//! SQL operations: the bridge between plan steps and the engine.
//!
//! Everything here renders through `gridsync-sql` and executes through the
//! [`Engine`] capability trait; nothing below this layer knows about
//! trackers or plans, and nothing above it builds SQL text.

use serde_json::json;
use tracing::{debug, info};

use gridsync_data::{pk, Frame, PkSpec, PkValue};
use gridsync_errors::{Fault, SyncResult};
use gridsync_sql::{ddl, dml, Dialect, DmlKind};
use gridsync_tracker::{PlanStep, SchemaChange, StepPayload};

use crate::engine::{Engine, EngineTransaction};

/// What to do when creating a table that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IfExists {
    #[default]
    Fail,
    Replace,
    Append,
}

pub async fn table_exists(
    engine: &dyn Engine,
    table: &str,
    schema: Option<&str>,
) -> SyncResult<bool> {
    Ok(engine
        .table_names(schema)
        .await?
        .iter()
        .any(|name| name == table))
}

pub async fn get_primary_key(
    engine: &dyn Engine,
    table: &str,
    schema: Option<&str>,
) -> SyncResult<Option<PkSpec>> {
    engine.primary_key(table, schema).await
}

/// Read the whole table. With a key spec the frame is canonicalized so the
/// key columns lead; missing key columns are a schema fault.
pub async fn pull_table(
    engine: &dyn Engine,
    table: &str,
    schema: Option<&str>,
    pk_spec: Option<&PkSpec>,
) -> SyncResult<Frame> {
    let mut frame = engine.read_table(table, schema).await?;
    if let Some(spec) = pk_spec {
        pk::canonicalize_pk_front(&mut frame, spec)?;
    }
    Ok(frame)
}

/// Create the table from a frame and load its rows inside one transaction.
pub async fn create_table_from_frame(
    engine: &dyn Engine,
    table: &str,
    frame: &Frame,
    pk_spec: &PkSpec,
    schema: Option<&str>,
    if_exists: IfExists,
) -> SyncResult<()> {
    let dialect = engine.dialect();
    let exists = table_exists(engine, table, schema).await?;

    let create = match (exists, if_exists) {
        (true, IfExists::Fail) => {
            return Err(Fault::schema_with(
                format!("table '{table}' already exists"),
                json!({ "table": table, "schema": schema }),
            ));
        }
        (true, IfExists::Replace) => {
            engine.execute(&ddl::drop_table(dialect, table, schema), &[]).await?;
            true
        }
        (true, IfExists::Append) => false,
        (false, _) => true,
    };

    if create {
        pk::pk_positions(frame.schema(), pk_spec)?;
        let sql = ddl::create_table(dialect, table, schema, frame.schema(), pk_spec);
        info!(table, %dialect, "creating table");
        engine.execute(&sql, &[]).await?;
    }

    if frame.is_empty() {
        return Ok(());
    }

    let columns: Vec<String> = frame.schema().names().map(str::to_owned).collect();
    let mut txn = engine.begin().await?;
    let size = dml::batch_size(DmlKind::Insert, columns.len());
    for chunk in frame.rows().chunks(size) {
        let stmt = dml::insert_batch(dialect, table, schema, &columns, chunk)?;
        txn.execute(&stmt.sql, &stmt.params).await?;
    }
    txn.commit().await
}

/// Apply one schema change outside the data transaction.
///
/// Routing differs per dialect: PostgreSQL DDL runs in its own transaction,
/// MySQL autocommits DDL so it runs on the plain connection, and SQLite's
/// type changes are a no-op (its columns are dynamically typed). MySQL
/// renames introspect the current column type first.
pub async fn execute_schema_change(
    engine: &dyn Engine,
    table: &str,
    schema: Option<&str>,
    change: &SchemaChange,
) -> SyncResult<()> {
    let dialect = engine.dialect();
    let sql = match change {
        SchemaChange::RenameColumn { old, new } => {
            let current_type = if dialect == Dialect::MySql {
                let columns = engine.columns(table, schema).await?;
                Some(
                    columns
                        .into_iter()
                        .find(|c| &c.name == old)
                        .ok_or_else(|| {
                            Fault::schema_with(
                                format!("column '{old}' not found in table '{table}'"),
                                json!({ "table": table, "column": old }),
                            )
                        })?
                        .sql_type,
                )
            } else {
                None
            };
            Some(ddl::rename_column(dialect, table, schema, old, new, current_type.as_deref())?)
        }
        SchemaChange::DropColumn { name } => Some(ddl::drop_column(dialect, table, schema, name)),
        SchemaChange::AddColumn { name, ty } => {
            Some(ddl::add_column(dialect, table, schema, name, *ty))
        }
        SchemaChange::AlterColumnType { name, ty } => {
            ddl::change_column_type(dialect, table, schema, name, *ty)
        }
    };

    let Some(sql) = sql else {
        debug!(table, %dialect, ?change, "schema change is a no-op on this dialect");
        return Ok(());
    };

    debug!(table, %dialect, %sql, "applying schema change");
    if dialect.supports_transactional_ddl() {
        let mut txn = engine.begin().await?;
        txn.execute(&sql, &[]).await.map_err(schema_step_fault)?;
        txn.commit().await
    } else {
        engine.execute(&sql, &[]).await.map_err(schema_step_fault)?;
        Ok(())
    }
}

fn schema_step_fault(fault: Fault) -> Fault {
    match fault {
        Fault::Transaction { message, details } => Fault::Schema { message, details },
        other => other,
    }
}

/// Run one data step (delete/update/insert) inside the open transaction,
/// batching per the deterministic heuristic.
pub async fn execute_data_step(
    txn: &mut dyn EngineTransaction,
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    pk_spec: &PkSpec,
    step: &PlanStep,
) -> SyncResult<()> {
    match &step.payload {
        StepPayload::DeleteKeys(keys) => {
            let size = dml::batch_size(DmlKind::Delete, pk_spec.width());
            for chunk in keys.chunks(size) {
                let stmt = dml::delete_batch(dialect, table, schema, pk_spec, chunk);
                txn.execute(&stmt.sql, &stmt.params).await?;
            }
            debug!(table, rows = keys.len(), "deleted");
        }
        StepPayload::UpdateRecords(records) => {
            let width = records.first().map_or(1, |r| r.len());
            let size = dml::batch_size(DmlKind::Update, width);
            for chunk in records.chunks(size) {
                for record in chunk {
                    let stmt = dml::update_row(dialect, table, schema, pk_spec, record)?;
                    txn.execute(&stmt.sql, &stmt.params).await?;
                }
            }
            debug!(table, rows = records.len(), "updated");
        }
        StepPayload::InsertRecords { columns, rows } => {
            let size = dml::batch_size(DmlKind::Insert, columns.len());
            for chunk in rows.chunks(size) {
                let stmt = dml::insert_batch(dialect, table, schema, columns, chunk)?;
                txn.execute(&stmt.sql, &stmt.params).await?;
            }
            debug!(table, rows = rows.len(), "inserted");
        }
        StepPayload::Schema(_) => {
            return Err(Fault::transaction(
                "schema step routed into the data transaction",
            ));
        }
    }
    Ok(())
}

/// The cheap remote read for conflict detection: key columns plus `columns`,
/// restricted to the given keys.
pub async fn read_remote_columns(
    engine: &dyn Engine,
    table: &str,
    schema: Option<&str>,
    pk_spec: &PkSpec,
    columns: &[String],
    keys: &[PkValue],
) -> SyncResult<Frame> {
    let dialect = engine.dialect();
    let size = dml::batch_size(DmlKind::Delete, pk_spec.width());

    let mut merged: Option<Frame> = None;
    for chunk in keys.chunks(size) {
        let stmt = dml::select_columns_by_keys(dialect, table, schema, pk_spec, columns, chunk);
        let frame = engine.query(&stmt.sql, &stmt.params).await?;
        merged = Some(match merged {
            None => frame,
            Some(mut acc) => {
                for row in frame.rows() {
                    if acc.num_columns() == row.len() {
                        acc.push_row(row.clone())?;
                    }
                }
                acc
            }
        });
    }
    Ok(merged.unwrap_or_default())
}
