//! The engine capability contract: everything the executor consumes from a
//! database driver.
//!
//! The bundled implementations ([`sqlite`], [`postgres`], [`mysql`]) each
//! hold one driver connection behind an async mutex; [`Engine::begin`] hands
//! out a transaction object owning the mutex guard, so statements from other
//! tasks cannot interleave with an open transaction.

use async_trait::async_trait;
use serde_json::{Map, Value as Json};

use gridsync_data::{Frame, PkSpec, Value};
use gridsync_errors::SyncResult;
use gridsync_sql::Dialect;

pub mod mysql;
pub mod postgres;
pub mod sqlite;

/// One column as reported by driver introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// The raw SQL type string (e.g. `VARCHAR(255)`, `bigint`).
    pub sql_type: String,
    pub nullable: bool,
}

/// A point-in-time snapshot of the engine's connection pool. Fields the
/// driver does not expose stay `None` and are omitted from the JSON form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStatus {
    pub url: Option<String>,
    pub pool_size: Option<usize>,
    pub checked_in: Option<usize>,
    pub checked_out: Option<usize>,
    pub overflow: Option<i64>,
}

impl PoolStatus {
    /// JSON form with unavailable fields omitted.
    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        if let Some(url) = &self.url {
            map.insert("url".into(), Json::String(url.clone()));
        }
        if let Some(n) = self.pool_size {
            map.insert("pool_size".into(), Json::from(n));
        }
        if let Some(n) = self.checked_in {
            map.insert("checked_in".into(), Json::from(n));
        }
        if let Some(n) = self.checked_out {
            map.insert("checked_out".into(), Json::from(n));
        }
        if let Some(n) = self.overflow {
            map.insert("overflow".into(), Json::from(n));
        }
        Json::Object(map)
    }
}

/// Capabilities the core consumes from a database driver. Implementations
/// are supplied by the host; the bundled engines cover the three dialects the
/// SQL renderer knows.
#[async_trait]
pub trait Engine: Send + Sync {
    /// The SQL flavor this engine speaks.
    fn dialect(&self) -> Dialect;

    /// The connection URL (with credentials, if any, already redacted by the
    /// engine).
    fn url(&self) -> &str;

    /// Execute a parameterized statement outside any explicit transaction,
    /// returning the affected row count.
    async fn execute(&self, sql: &str, params: &[Value]) -> SyncResult<u64>;

    /// Run a parameterized query and return the result set as a frame, with
    /// column types taken from the driver's result metadata.
    async fn query(&self, sql: &str, params: &[Value]) -> SyncResult<Frame>;

    /// Open a transaction. The returned object owns the underlying
    /// connection until committed or rolled back; dropping it rolls back.
    async fn begin(&self) -> SyncResult<Box<dyn EngineTransaction>>;

    /// Names of the tables in `schema` (or the default schema).
    async fn table_names(&self, schema: Option<&str>) -> SyncResult<Vec<String>>;

    /// Column metadata for one table, in ordinal order.
    async fn columns(&self, table: &str, schema: Option<&str>) -> SyncResult<Vec<ColumnInfo>>;

    /// The table's primary key, or `None` when it has none.
    async fn primary_key(&self, table: &str, schema: Option<&str>) -> SyncResult<Option<PkSpec>>;

    /// Read the entire table as a frame, inferring richer column types where
    /// the raw driver would return strings.
    async fn read_table(&self, table: &str, schema: Option<&str>) -> SyncResult<Frame>;

    /// Pool snapshot; drivers without a pool report what they can.
    fn pool_status(&self) -> PoolStatus;
}

/// An open transaction. `commit`/`rollback` consume it; dropping an
/// unfinished transaction rolls back.
#[async_trait]
pub trait EngineTransaction: Send {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> SyncResult<u64>;
    async fn commit(self: Box<Self>) -> SyncResult<()>;
    async fn rollback(self: Box<Self>) -> SyncResult<()>;
}
