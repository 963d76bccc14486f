//! gridsync: change-tracking synchronization between an in-memory tabular
//! value and a relational database.
//!
//! A [`SyncTable`] binds a [`Frame`] to a database table through an
//! [`Engine`]. Mutations are tracked against the last-synced baseline;
//! [`SyncTable::push`] computes the minimal set of SQL operations to
//! reconcile the database and applies them in one transaction, and
//! [`SyncTable::pull`] rebaselines from the database. [`Database`]
//! coordinates many tables over one engine, optionally pushing in parallel.
//!
//! ```no_run
//! # use gridsync::*;
//! # use std::sync::Arc;
//! # async fn demo() -> SyncResult<()> {
//! let engine: Arc<dyn Engine> = Arc::new(SqliteEngine::open_in_memory()?);
//! let mut db = Database::connect(engine, None, SyncConfig::default()).await?;
//! let users = db.table("users").await?;
//! users.update_row(PkValue::scalar(2), [("age".to_owned(), Value::Int(31))].into())?;
//! db.push(false).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod engine;
pub mod executor;
pub mod health;
pub mod ops;
pub mod retry;
pub mod table;

pub use config::SyncConfig;
pub use database::Database;
pub use engine::mysql::MySqlEngine;
pub use engine::postgres::PostgresEngine;
pub use engine::sqlite::SqliteEngine;
pub use engine::{ColumnInfo, Engine, EngineTransaction, PoolStatus};
pub use ops::IfExists;
pub use retry::RetryPolicy;
pub use table::SyncTable;

pub use gridsync_data::{Column, DataType, Frame, PkSpec, PkValue, Schema, Value};
pub use gridsync_errors::{Fault, SyncResult};
pub use gridsync_sql::Dialect;
pub use gridsync_tracker::{
    ChangeSummary, ChangeTracker, ConflictStrategy, ExecutionPlan, PlanStep, SchemaChange,
    StepKind, StepPayload, TrackingMode,
};
