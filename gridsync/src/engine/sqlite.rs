//! SQLite engine backed by a single `rusqlite` connection.
//!
//! SQLite calls are short and local, so they run inline while holding the
//! connection mutex rather than hopping to a blocking thread. Declared column
//! types come from `PRAGMA table_info`, and pulled values are coerced toward
//! them since SQLite hands back dynamically typed cells.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use gridsync_data::{Column, DataType, Frame, PkSpec, Schema, Value};
use gridsync_errors::{Fault, SyncResult};
use gridsync_sql::Dialect;

use super::{ColumnInfo, Engine, EngineTransaction, PoolStatus};

pub struct SqliteEngine {
    url: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEngine {
    pub fn open_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Fault::connection(format!("sqlite open failed: {e}")))?;
        Ok(SqliteEngine {
            url: "sqlite::memory:".to_owned(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| Fault::connection(format!("sqlite open failed: {e}")))?;
        Ok(SqliteEngine {
            url: format!("sqlite://{}", path.display()),
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn db_err(e: rusqlite::Error) -> Fault {
    Fault::transaction(e.to_string())
}

fn bind(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Int(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::TimestampTz(_) => rusqlite::types::Value::Text(value.to_string()),
    }
}

fn cell(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
    }
}

fn run_query(conn: &Connection, sql: &str, params: &[Value]) -> SyncResult<Frame> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_owned()).collect();

    let bound: Vec<rusqlite::types::Value> = params.iter().map(bind).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(bound)).map_err(db_err)?;

    let mut data: Vec<Vec<Value>> = Vec::new();
    while let Some(row) = rows.next().map_err(db_err)? {
        let mut out = Vec::with_capacity(names.len());
        for i in 0..names.len() {
            out.push(cell(row.get_ref(i).map_err(db_err)?));
        }
        data.push(out);
    }

    let columns = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let ty = DataType::infer(data.iter().map(|r| &r[i]));
            Column::new(name, ty)
        })
        .collect();
    Frame::from_rows(Schema::new(columns), data)
}

fn table_info(conn: &Connection, table: &str) -> SyncResult<Vec<(String, String, bool, i32)>> {
    let sql = format!("PRAGMA table_info({})", Dialect::Sqlite.quote_identifier(table));
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let mut rows = stmt.query([]).map_err(db_err)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(db_err)? {
        let name: String = row.get(1).map_err(db_err)?;
        let decl: String = row.get::<_, Option<String>>(2).map_err(db_err)?.unwrap_or_default();
        let notnull: i64 = row.get(3).map_err(db_err)?;
        let pk: i64 = row.get(5).map_err(db_err)?;
        out.push((name, decl, notnull == 0, pk as i32));
    }
    Ok(out)
}

#[async_trait]
impl Engine for SqliteEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> SyncResult<u64> {
        let conn = self.conn.lock().await;
        let bound: Vec<rusqlite::types::Value> = params.iter().map(bind).collect();
        let affected = conn
            .prepare(sql)
            .and_then(|mut stmt| stmt.execute(rusqlite::params_from_iter(bound)))
            .map_err(db_err)?;
        Ok(affected as u64)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> SyncResult<Frame> {
        let conn = self.conn.lock().await;
        run_query(&conn, sql, params)
    }

    async fn begin(&self) -> SyncResult<Box<dyn EngineTransaction>> {
        let guard = Arc::clone(&self.conn).lock_owned().await;
        guard.execute_batch("BEGIN").map_err(db_err)?;
        Ok(Box::new(SqliteTransaction { guard: Some(guard) }))
    }

    async fn table_names(&self, _schema: Option<&str>) -> SyncResult<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(db_err)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(names)
    }

    async fn columns(&self, table: &str, _schema: Option<&str>) -> SyncResult<Vec<ColumnInfo>> {
        let conn = self.conn.lock().await;
        Ok(table_info(&conn, table)?
            .into_iter()
            .map(|(name, sql_type, nullable, _)| ColumnInfo { name, sql_type, nullable })
            .collect())
    }

    async fn primary_key(&self, table: &str, _schema: Option<&str>) -> SyncResult<Option<PkSpec>> {
        let conn = self.conn.lock().await;
        let mut key: Vec<(i32, String)> = table_info(&conn, table)?
            .into_iter()
            .filter(|(_, _, _, pk)| *pk > 0)
            .map(|(name, _, _, pk)| (pk, name))
            .collect();
        if key.is_empty() {
            return Ok(None);
        }
        key.sort_by_key(|(pos, _)| *pos);
        Ok(Some(PkSpec::composite(key.into_iter().map(|(_, name)| name))?))
    }

    async fn read_table(&self, table: &str, schema: Option<&str>) -> SyncResult<Frame> {
        let conn = self.conn.lock().await;
        let declared = table_info(&conn, table)?;
        if declared.is_empty() {
            return Err(Fault::schema(format!("no such table: {table}")));
        }
        let raw = run_query(&conn, &gridsync_sql::dml::select_all(Dialect::Sqlite, table, schema), &[])?;

        // SQLite cells are dynamically typed; pull them toward the declared
        // column types so booleans and timestamps rehydrate properly.
        let columns: Vec<Column> = declared
            .iter()
            .map(|(name, decl, _, _)| Column::new(name.clone(), DataType::from_sql_type(decl)))
            .collect();
        let rows = raw
            .rows()
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&columns)
                    .map(|(v, c)| v.coerce_to(c.ty))
                    .collect()
            })
            .collect();
        Frame::from_rows(Schema::new(columns), rows)
    }

    fn pool_status(&self) -> PoolStatus {
        PoolStatus {
            url: Some(self.url.clone()),
            pool_size: Some(1),
            ..PoolStatus::default()
        }
    }
}

struct SqliteTransaction {
    guard: Option<OwnedMutexGuard<Connection>>,
}

impl SqliteTransaction {
    fn conn(&mut self) -> &mut Connection {
        self.guard.as_mut().expect("transaction already finished")
    }
}

#[async_trait]
impl EngineTransaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> SyncResult<u64> {
        let bound: Vec<rusqlite::types::Value> = params.iter().map(bind).collect();
        let affected = self
            .conn()
            .prepare(sql)
            .and_then(|mut stmt| stmt.execute(rusqlite::params_from_iter(bound)))
            .map_err(db_err)?;
        Ok(affected as u64)
    }

    async fn commit(mut self: Box<Self>) -> SyncResult<()> {
        let guard = self.guard.take().expect("transaction already finished");
        guard.execute_batch("COMMIT").map_err(db_err)
    }

    async fn rollback(mut self: Box<Self>) -> SyncResult<()> {
        let guard = self.guard.take().expect("transaction already finished");
        guard.execute_batch("ROLLBACK").map_err(db_err)
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            if let Err(e) = guard.execute_batch("ROLLBACK") {
                warn!(error = %e, "implicit rollback of dropped sqlite transaction failed");
            }
        }
    }
}
