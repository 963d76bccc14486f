//! The multi-table coordinator: a set of synchronized tables sharing one
//! engine, pushed together with validate-all-first semantics.

use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use gridsync_errors::{Fault, SyncResult};

use crate::config::SyncConfig;
use crate::engine::Engine;
use crate::ops;
use crate::table::SyncTable;

/// All tables of one database, keyed by name in insertion order.
///
/// `push` validates every selected table before executing any, and can run
/// per-table pushes in parallel (each table owns its own transaction; there
/// is no cross-table atomicity).
pub struct Database {
    engine: Arc<dyn Engine>,
    schema: Option<String>,
    config: SyncConfig,
    tables: IndexMap<String, Option<SyncTable>>,
}

impl Database {
    /// Discover the database's tables. Unless `config.lazy` is set, every
    /// table is pulled immediately; lazy tables load on first access.
    pub async fn connect(
        engine: Arc<dyn Engine>,
        schema: Option<String>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let mut db = Database { engine, schema, config, tables: IndexMap::new() };
        db.load_tables().await?;
        Ok(db)
    }

    /// Re-read the table list from the database and rehydrate.
    pub async fn load_tables(&mut self) -> SyncResult<()> {
        let names = self.engine.table_names(self.schema.as_deref()).await?;
        self.tables.clear();
        for name in names {
            let table = if self.config.lazy {
                None
            } else {
                Some(self.load_table(&name).await?)
            };
            self.tables.insert(name, table);
        }
        Ok(())
    }

    async fn load_table(&self, name: &str) -> SyncResult<SyncTable> {
        SyncTable::load(
            name,
            Arc::clone(&self.engine),
            self.schema.clone(),
            self.config.clone(),
        )
        .await
    }

    /// Access one table, loading it first if it is lazy and not yet pulled.
    pub async fn table(&mut self, name: &str) -> SyncResult<&mut SyncTable> {
        if !self.tables.contains_key(name) {
            return Err(Fault::schema_with(
                format!("no such table: {name}"),
                json!({ "table": name }),
            ));
        }
        if self.tables[name].is_none() {
            let loaded = self.load_table(name).await?;
            self.tables[name] = Some(loaded);
        }
        Ok(self.tables[name].as_mut().expect("loaded above"))
    }

    /// Register an in-memory table (its SQL table may not exist yet; the
    /// next push creates it). Optionally push everything immediately.
    pub async fn add_table(&mut self, table: SyncTable, push: bool) -> SyncResult<()> {
        self.tables.insert(table.name().to_owned(), Some(table));
        if push {
            self.push(false).await?;
        }
        Ok(())
    }

    /// Build a new table from a frame, bind it to this database's engine and
    /// schema, and hand back the handle. The SQL table is created on the
    /// next push.
    pub fn create_table(
        &mut self,
        name: impl Into<String>,
        frame: crate::Frame,
        pk_spec: gridsync_data::PkSpec,
    ) -> SyncResult<&mut SyncTable> {
        let name = name.into();
        let table = SyncTable::with_config(
            name.clone(),
            frame,
            pk_spec,
            Arc::clone(&self.engine),
            self.schema.clone(),
            self.config.clone(),
        );
        self.tables.insert(name.clone(), Some(table));
        Ok(self.tables[&name].as_mut().expect("just inserted"))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Push every table that has changes or does not exist in the database
    /// yet.
    ///
    /// All selected tables are validated before any executes; a validation
    /// failure aborts the whole push. With `parallel` the per-table pushes
    /// run as concurrent tasks bounded by `max_concurrent_pushes`, except on
    /// dialects that serialize writers (SQLite), which force sequential
    /// execution. Parallel failures are aggregated into one fault.
    pub async fn push(&mut self, parallel: bool) -> SyncResult<()> {
        let mut selected: Vec<String> = Vec::new();
        for (name, slot) in &mut self.tables {
            let Some(table) = slot.as_mut() else { continue };
            let needs_push = table.has_changes()
                || !ops::table_exists(table.engine().as_ref(), name, table.schema_name()).await?;
            if needs_push {
                selected.push(name.clone());
            }
        }
        if selected.is_empty() {
            return Ok(());
        }

        // Validate everything before executing anything.
        for name in &selected {
            let table = self.tables[name].as_ref().expect("selected tables are loaded");
            let errors = table.validate();
            if !errors.is_empty() {
                return Err(Fault::schema_with(
                    format!("validation failed for table '{name}': {}", errors.join("; ")),
                    json!({ "table": name, "errors": errors }),
                ));
            }
        }

        let mut parallel = parallel && selected.len() > 1;
        if parallel && !self.engine.dialect().supports_concurrent_writes() {
            warn!(
                dialect = %self.engine.dialect(),
                "dialect does not tolerate concurrent writers, pushing sequentially"
            );
            parallel = false;
        }

        if parallel {
            self.push_parallel(&selected).await?;
        } else {
            self.push_sequential(&selected).await?;
        }

        // Refresh every baseline, and pick up tables created meanwhile.
        self.pull().await
    }

    async fn push_sequential(&mut self, selected: &[String]) -> SyncResult<()> {
        info!(tables = selected.len(), "pushing tables sequentially");
        for name in selected {
            let table = self.tables[name].as_mut().expect("selected tables are loaded");
            table.push().await?;
        }
        Ok(())
    }

    async fn push_parallel(&mut self, selected: &[String]) -> SyncResult<()> {
        info!(
            tables = selected.len(),
            limit = self.config.max_concurrent_pushes,
            "pushing tables in parallel"
        );
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_pushes.max(1)));

        let mut handles = Vec::with_capacity(selected.len());
        for name in selected {
            let mut table = self.tables[name].take().expect("selected tables are loaded");
            let permit_source = Arc::clone(&semaphore);
            let name = name.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit_source.acquire_owned().await.ok();
                let result = table.push().await;
                (name, table, result)
            }));
        }

        let mut failures: Vec<(String, Fault)> = Vec::new();
        for joined in join_all(handles).await {
            match joined {
                Ok((name, table, result)) => {
                    self.tables[&name] = Some(table);
                    if let Err(fault) = result {
                        failures.push((name, fault));
                    }
                }
                Err(join_error) => {
                    failures.push(("<task>".to_owned(), Fault::transaction(join_error.to_string())));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            let summary = failures
                .iter()
                .map(|(name, fault)| format!("{name}: {fault}"))
                .collect::<Vec<_>>()
                .join("; ");
            Err(Fault::transaction_with(
                format!("failed to push {} table(s): {summary}", failures.len()),
                json!({
                    "failed_tables": failures.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>(),
                }),
            ))
        }
    }

    /// Refresh every loaded table from the database and pick up tables
    /// created by others.
    pub async fn pull(&mut self) -> SyncResult<()> {
        let names = self.engine.table_names(self.schema.as_deref()).await?;
        for name in names {
            if !self.tables.contains_key(&name) {
                let table = if self.config.lazy { None } else { Some(self.load_table(&name).await?) };
                self.tables.insert(name.clone(), table);
                continue;
            }
            if let Some(table) = self.tables[&name].as_mut() {
                table.pull().await?;
            }
        }
        Ok(())
    }
}
