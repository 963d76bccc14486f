//! The user-facing synchronized table: a frame bound to an engine, a primary
//! key, and a change tracker.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use gridsync_data::{pk, DataType, Frame, PkSpec, PkValue, Value};
use gridsync_errors::{Fault, SyncResult};
use gridsync_tracker::{
    detect_conflicts, resolve_conflicts, ChangeSummary, ChangeTracker, ConflictStrategy,
    ExecutionPlan, RowChange, StepKind, StepPayload,
};

use crate::config::SyncConfig;
use crate::engine::Engine;
use crate::executor;
use crate::ops::{self, IfExists};

/// An in-memory table bound to a database table.
///
/// Mutating methods keep the key invariants (keys exist, are unique, and are
/// never modified on a live row) and inform the tracker; [`SyncTable::push`]
/// reconciles the database with the frame and [`SyncTable::pull`]
/// rebaselines the frame from the database.
pub struct SyncTable {
    name: String,
    schema: Option<String>,
    engine: Arc<dyn Engine>,
    frame: Frame,
    tracker: ChangeTracker,
    config: SyncConfig,
}

impl SyncTable {
    /// Bind `frame` to the database table `name` with the given key. The
    /// frame is treated as the baseline: a fresh table has no changes until
    /// it is mutated (first push creates the SQL table if absent).
    pub fn new(
        name: impl Into<String>,
        frame: Frame,
        pk_spec: PkSpec,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self::with_config(name, frame, pk_spec, engine, None, SyncConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        frame: Frame,
        pk_spec: PkSpec,
        engine: Arc<dyn Engine>,
        schema: Option<String>,
        config: SyncConfig,
    ) -> Self {
        let tracker = ChangeTracker::new(pk_spec, frame.clone(), config.tracking_mode);
        SyncTable { name: name.into(), schema, engine, frame, tracker, config }
    }

    /// Load an existing table from the database, introspecting its primary
    /// key (falling back to `id` when the table declares none).
    pub async fn load(
        name: impl Into<String>,
        engine: Arc<dyn Engine>,
        schema: Option<String>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let name = name.into();
        let pk_spec = ops::get_primary_key(&*engine, &name, schema.as_deref())
            .await?
            .unwrap_or_else(|| PkSpec::single("id"));
        let frame = ops::pull_table(&*engine, &name, schema.as_deref(), Some(&pk_spec)).await?;
        let tracker = ChangeTracker::new(pk_spec, frame.clone(), config.tracking_mode);
        Ok(SyncTable { name, schema, engine, frame, tracker, config })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema_name(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn primary_key(&self) -> &PkSpec {
        self.tracker.pk()
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn pk_width(&self) -> usize {
        self.tracker.pk().width()
    }

    /// Index of the row holding `key`, if any.
    fn find_row(&self, key: &PkValue) -> Option<usize> {
        let positions = pk::pk_positions(self.frame.schema(), self.tracker.pk()).ok()?;
        self.frame
            .rows()
            .iter()
            .position(|row| &pk::pk_of_row(row, &positions) == key)
    }

    fn check_key_width(&self, key: &PkValue) -> SyncResult<()> {
        if key.width() != self.pk_width() {
            return Err(Fault::validation_with(
                format!(
                    "key {key} has {} value(s) but the primary key {} has {} column(s)",
                    key.width(),
                    self.tracker.pk(),
                    self.pk_width()
                ),
                json!({ "primary_key": self.tracker.pk().columns() }),
            ));
        }
        Ok(())
    }

    fn check_known_columns<'a>(
        &self,
        columns: impl IntoIterator<Item = &'a String>,
    ) -> SyncResult<()> {
        for column in columns {
            if !self.frame.schema().contains(column) {
                return Err(Fault::schema_with(
                    format!("column '{column}' does not exist"),
                    json!({ "table": self.name, "column": column }),
                ));
            }
        }
        Ok(())
    }

    // ---- queries ------------------------------------------------------

    pub fn row_exists(&self, key: &PkValue) -> bool {
        self.find_row(key).is_some()
    }

    pub fn get_row(&self, key: &PkValue) -> Option<BTreeMap<String, Value>> {
        self.find_row(key).map(|idx| self.frame.row_map(idx))
    }

    /// The key value the next auto-incremented row would get: current max
    /// plus one, starting at 1 on an empty table. Requires a single-column
    /// integer key.
    pub fn get_next_pk_value(&self) -> SyncResult<i64> {
        let pk_spec = self.tracker.pk();
        if pk_spec.is_composite() {
            return Err(Fault::validation_with(
                format!("auto-increment requires a single-column key, found {pk_spec}"),
                json!({ "primary_key": pk_spec.columns() }),
            ));
        }
        let column = &pk_spec.columns()[0];
        let mut max = 0i64;
        for value in self.frame.column_values(column)? {
            match value {
                Value::Int(i) => max = max.max(*i),
                Value::Null => {}
                other => {
                    return Err(Fault::validation_with(
                        format!("auto-increment requires an integer key, found {other}"),
                        json!({ "column": column }),
                    ));
                }
            }
        }
        Ok(max + 1)
    }

    // ---- row mutation -------------------------------------------------

    /// Add one row. Missing non-key columns become NULL. A missing key value
    /// is auto-assigned when the `auto_increment` option is on (single
    /// integer keys only), otherwise it is a validation fault.
    pub fn add_row(&mut self, mut row: BTreeMap<String, Value>) -> SyncResult<()> {
        self.check_known_columns(row.keys())?;

        let pk_spec = self.tracker.pk().clone();
        let missing: Vec<&String> =
            pk_spec.columns().iter().filter(|c| !row.contains_key(*c)).collect();
        if !missing.is_empty() {
            if self.config.auto_increment && !pk_spec.is_composite() {
                let next = self.get_next_pk_value()?;
                row.insert(pk_spec.columns()[0].clone(), Value::Int(next));
            } else {
                return Err(Fault::validation_with(
                    format!("row is missing primary key column(s) {missing:?}"),
                    json!({ "missing": missing, "primary_key": pk_spec.columns() }),
                ));
            }
        }

        let key = PkValue::composite(pk_spec.columns().iter().map(|c| row[c].clone()));
        if key.contains_null() {
            return Err(Fault::validation(format!("primary key value {key} contains NULL")));
        }
        if self.row_exists(&key) {
            return Err(Fault::validation_with(
                format!("primary key value {key} already exists"),
                json!({ "primary_key": pk_spec.columns(), "value": key.to_string() }),
            ));
        }

        let values: Vec<Value> = self
            .frame
            .schema()
            .names()
            .map(|name| row.get(name).cloned().unwrap_or(Value::Null))
            .collect();
        self.tracker.record_operation("add_row");
        self.frame.push_row(values)
    }

    /// Update the row with `key`. `updates` must not touch key columns:
    /// key values are immutable, so changing one means delete plus insert.
    pub fn update_row(
        &mut self,
        key: PkValue,
        updates: BTreeMap<String, Value>,
    ) -> SyncResult<()> {
        self.check_key_width(&key)?;
        let pk_spec = self.tracker.pk();
        let touched_keys: Vec<&String> =
            pk_spec.columns().iter().filter(|c| updates.contains_key(*c)).collect();
        if !touched_keys.is_empty() {
            return Err(Fault::validation_with(
                format!(
                    "cannot update primary key column(s) {touched_keys:?}; \
                     keys are immutable, delete the row and insert a new one"
                ),
                json!({ "attempted": touched_keys, "primary_key": pk_spec.columns() }),
            ));
        }
        self.check_known_columns(updates.keys())?;

        let Some(idx) = self.find_row(&key) else {
            return Err(Fault::validation(format!("no row found with primary key {key}")));
        };
        self.tracker.record_operation("update_row");
        for (column, value) in updates {
            self.frame.set_cell(idx, &column, value)?;
        }
        Ok(())
    }

    pub fn delete_row(&mut self, key: PkValue) -> SyncResult<()> {
        self.check_key_width(&key)?;
        let Some(idx) = self.find_row(&key) else {
            return Err(Fault::validation(format!("no row found with primary key {key}")));
        };
        self.tracker.record_operation("delete_row");
        self.frame.remove_row(idx);
        Ok(())
    }

    /// Update by key when the row exists, insert otherwise. All key columns
    /// must be present in `row`.
    pub fn upsert_row(&mut self, row: BTreeMap<String, Value>) -> SyncResult<()> {
        let pk_spec = self.tracker.pk();
        let missing: Vec<&String> =
            pk_spec.columns().iter().filter(|c| !row.contains_key(*c)).collect();
        if !missing.is_empty() {
            return Err(Fault::validation_with(
                format!("row is missing primary key column(s) {missing:?}"),
                json!({ "missing": missing, "primary_key": pk_spec.columns() }),
            ));
        }

        let key = PkValue::composite(pk_spec.columns().iter().map(|c| row[c].clone()));
        if self.row_exists(&key) {
            let updates: BTreeMap<String, Value> = row
                .into_iter()
                .filter(|(c, _)| !self.tracker.pk().contains(c))
                .collect();
            if updates.is_empty() {
                return Ok(());
            }
            self.update_row(key, updates)
        } else {
            self.add_row(row)
        }
    }

    /// Insert many rows as one tracked operation. Rejects key duplicates
    /// both within the batch and against existing rows before touching the
    /// frame, so a failed bulk insert leaves nothing behind.
    pub fn bulk_insert(&mut self, rows: Vec<BTreeMap<String, Value>>) -> SyncResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let pk_spec = self.tracker.pk().clone();

        let mut batch_keys: HashSet<PkValue> = HashSet::with_capacity(rows.len());
        let mut conflicts: Vec<String> = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            self.check_known_columns(row.keys())?;
            let missing: Vec<&String> =
                pk_spec.columns().iter().filter(|c| !row.contains_key(*c)).collect();
            if !missing.is_empty() {
                return Err(Fault::validation_with(
                    format!("row {i} is missing primary key column(s) {missing:?}"),
                    json!({ "row": i, "missing": missing }),
                ));
            }
            let key = PkValue::composite(pk_spec.columns().iter().map(|c| row[c].clone()));
            if !batch_keys.insert(key.clone()) {
                return Err(Fault::validation_with(
                    format!("bulk insert contains duplicate primary key {key}"),
                    json!({ "value": key.to_string() }),
                ));
            }
            if self.row_exists(&key) && conflicts.len() < 10 {
                conflicts.push(key.to_string());
            }
        }
        if !conflicts.is_empty() {
            return Err(Fault::validation_with(
                format!("bulk insert contains {} primary key(s) that already exist", conflicts.len()),
                json!({ "conflicts": conflicts }),
            ));
        }

        self.tracker.record_operation("bulk_insert");
        for row in rows {
            let values: Vec<Value> = self
                .frame
                .schema()
                .names()
                .map(|name| row.get(name).cloned().unwrap_or(Value::Null))
                .collect();
            self.frame.push_row(values)?;
        }
        Ok(())
    }

    /// Apply `updates` to every row matching `predicate`, returning how many
    /// rows changed. Key columns cannot be assigned.
    pub fn update_rows_where<P>(
        &mut self,
        predicate: P,
        updates: BTreeMap<String, Value>,
    ) -> SyncResult<usize>
    where
        P: Fn(&BTreeMap<String, Value>) -> bool,
    {
        let touched_keys: Vec<&String> = updates
            .keys()
            .filter(|c| self.tracker.pk().contains(c))
            .collect();
        if !touched_keys.is_empty() {
            return Err(Fault::validation_with(
                format!("cannot update primary key column(s) {touched_keys:?}"),
                json!({ "attempted": touched_keys }),
            ));
        }
        self.check_known_columns(updates.keys())?;

        let matching: Vec<usize> = (0..self.frame.num_rows())
            .filter(|&i| predicate(&self.frame.row_map(i)))
            .collect();
        if matching.is_empty() {
            return Ok(0);
        }

        self.tracker.record_operation("update_rows_where");
        for idx in &matching {
            for (column, value) in &updates {
                self.frame.set_cell(*idx, column, value.clone())?;
            }
        }
        Ok(matching.len())
    }

    /// Delete every row matching `predicate`, returning how many were
    /// removed.
    pub fn delete_rows_where<P>(&mut self, predicate: P) -> SyncResult<usize>
    where
        P: Fn(&BTreeMap<String, Value>) -> bool,
    {
        let matching: Vec<usize> = (0..self.frame.num_rows())
            .filter(|&i| predicate(&self.frame.row_map(i)))
            .collect();
        if matching.is_empty() {
            return Ok(0);
        }

        self.tracker.record_operation("delete_rows_where");
        for idx in matching.iter().rev() {
            self.frame.remove_row(*idx);
        }
        Ok(matching.len())
    }

    // ---- schema mutation ----------------------------------------------

    /// Add a column, setting `default` on every existing row. The column
    /// type is taken from the default value unless given explicitly.
    pub fn add_column_with_default(
        &mut self,
        name: impl Into<String>,
        default: Value,
        ty: Option<DataType>,
    ) -> SyncResult<()> {
        let name = name.into();
        let ty = ty
            .or_else(|| default.data_type())
            .unwrap_or(DataType::Text);
        self.frame.add_column(name.clone(), ty, default)?;
        self.tracker.record_operation("add_column_with_default");
        self.tracker.track_column_addition(&name);
        Ok(())
    }

    pub fn drop_column_safe(&mut self, name: &str) -> SyncResult<()> {
        self.frame.drop_column(name)?;
        self.tracker.record_operation("drop_column_safe");
        self.tracker.track_column_drop(name);
        Ok(())
    }

    /// Rename a column; a key column rename updates the key spec too.
    pub fn rename_column_safe(&mut self, old: &str, new: &str) -> SyncResult<()> {
        self.frame.rename_column(old, new)?;
        self.tracker.record_operation("rename_column_safe");
        self.tracker.track_column_rename(old, new);
        Ok(())
    }

    pub fn change_column_type(&mut self, column: &str, ty: DataType) -> SyncResult<()> {
        self.frame.cast_column(column, ty)?;
        self.tracker.record_operation("change_column_type");
        self.tracker.track_column_type_change(column, ty);
        Ok(())
    }

    // ---- tracking and sync --------------------------------------------

    pub fn has_changes(&mut self) -> bool {
        self.tracker.has_changes(Some(&self.frame))
    }

    pub fn changes_summary(&mut self) -> ChangeSummary {
        self.tracker.summary(Some(&self.frame))
    }

    /// Build (without executing) the plan the next push would run.
    pub fn plan(&mut self) -> SyncResult<ExecutionPlan> {
        ExecutionPlan::build(&mut self.tracker, &self.frame)
    }

    /// Check the frame against the table invariants. Returns one message per
    /// problem; an empty list means the next push will not fail validation.
    pub fn validate(&self) -> Vec<String> {
        let (mut issues, data) = self.validate_issues();
        issues.extend(data);
        issues
    }

    /// (schema issues, data issues) split, so `push` can raise the right
    /// fault kind.
    fn validate_issues(&self) -> (Vec<String>, Vec<String>) {
        let mut schema_issues = Vec::new();
        let mut data_issues = Vec::new();
        let pk_spec = self.tracker.pk();

        let missing = pk::missing_pk_columns(self.frame.schema(), pk_spec);
        if !missing.is_empty() {
            schema_issues.push(format!("primary key column(s) {missing:?} have been dropped"));
        }

        let duplicates = self.frame.schema().duplicate_names();
        if !duplicates.is_empty() {
            data_issues.push(format!("duplicate column name(s) {duplicates:?}"));
        }

        if let Ok(positions) = pk::pk_positions(self.frame.schema(), pk_spec) {
            let mut seen: HashSet<PkValue> = HashSet::with_capacity(self.frame.num_rows());
            for row in self.frame.rows() {
                let key = pk::pk_of_row(row, &positions);
                if key.contains_null() {
                    data_issues.push(format!("primary key {pk_spec} contains NULL values"));
                    break;
                }
                if !seen.insert(key.clone()) {
                    data_issues.push(format!("primary key {pk_spec} contains duplicate value {key}"));
                    break;
                }
            }
        }

        (schema_issues, data_issues)
    }

    /// Push local changes: validate, create the table if missing, otherwise
    /// plan, reconcile conflicts, execute, and rebaseline via pull. A failed
    /// push leaves the frame and tracker untouched so the user can fix the
    /// data and retry; a later pull discards local changes instead.
    pub async fn push(&mut self) -> SyncResult<()> {
        let (schema_issues, data_issues) = self.validate_issues();
        if !schema_issues.is_empty() {
            return Err(Fault::schema_with(
                format!("cannot push table '{}': {}", self.name, schema_issues.join("; ")),
                json!({ "table": self.name, "errors": schema_issues }),
            ));
        }
        if !data_issues.is_empty() {
            return Err(Fault::validation_with(
                format!("cannot push table '{}': {}", self.name, data_issues.join("; ")),
                json!({ "table": self.name, "errors": data_issues }),
            ));
        }

        let schema = self.schema.clone();
        if !ops::table_exists(&*self.engine, &self.name, schema.as_deref()).await? {
            info!(table = %self.name, "table does not exist, creating");
            ops::create_table_from_frame(
                &*self.engine,
                &self.name,
                &self.frame,
                self.tracker.pk(),
                schema.as_deref(),
                IfExists::Fail,
            )
            .await?;
            return self.pull().await;
        }

        let mut plan = self.plan()?;
        if plan.is_empty() {
            debug!(table = %self.name, "no changes to push");
            return Ok(());
        }

        self.reconcile_remote(&mut plan).await?;

        executor::execute_plan(
            &*self.engine,
            &self.name,
            &plan,
            schema.as_deref(),
            self.tracker.pk(),
            &self.config,
        )
        .await?;

        self.pull().await
    }

    /// Refresh the frame (and the tracker's baseline) from the database,
    /// discarding local changes.
    pub async fn pull(&mut self) -> SyncResult<()> {
        let pk_spec = self.tracker.pk().clone();
        let frame =
            ops::pull_table(&*self.engine, &self.name, self.schema.as_deref(), Some(&pk_spec))
                .await?;
        debug!(table = %self.name, rows = frame.num_rows(), "pulled");
        self.frame = frame.clone();
        self.tracker.reset(frame);
        Ok(())
    }

    /// Detect concurrent remote modifications of the rows this push updates
    /// and revise the plan per the configured strategy. Inserts and deletes
    /// are never touched.
    async fn reconcile_remote(&mut self, plan: &mut ExecutionPlan) -> SyncResult<()> {
        // Under last-writer-wins resolution is the identity, so the remote
        // read is skipped entirely.
        if matches!(self.config.conflict_strategy, ConflictStrategy::LastWriterWins) {
            return Ok(());
        }

        let records = match plan
            .steps()
            .iter()
            .find(|s| s.kind == StepKind::Update)
            .map(|s| &s.payload)
        {
            Some(StepPayload::UpdateRecords(records)) => records.clone(),
            _ => return Ok(()),
        };

        let pk_spec = self.tracker.pk().clone();

        // Local change sets come from the tracker (changed cells only); the
        // plan's records bind full rows and would read as all-conflicting.
        self.tracker.compute_row_changes(&self.frame);
        let mut local_changes: Vec<(PkValue, BTreeMap<String, Value>)> = Vec::new();
        for rc in self.tracker.updates() {
            let RowChange::Update { pk: key, old, new } = rc else { continue };
            let changed: BTreeMap<String, Value> = new
                .iter()
                .filter(|(col, value)| old.get(col.as_str()) != Some(value) && !pk_spec.contains(col))
                .map(|(col, value)| (col.clone(), value.clone()))
                .collect();
            if !changed.is_empty() {
                local_changes.push((key.clone(), changed));
            }
        }
        if local_changes.is_empty() {
            return Ok(());
        }

        // Cheap remote read: only the touched columns that exist remotely,
        // only the updated keys.
        let touched: Vec<String> = {
            let remote_columns: HashSet<String> = self
                .engine
                .columns(&self.name, self.schema.as_deref())
                .await?
                .into_iter()
                .map(|c| c.name)
                .collect();
            let mut cols: Vec<String> = local_changes
                .iter()
                .flat_map(|(_, changes)| changes.keys().cloned())
                .filter(|c| remote_columns.contains(c))
                .collect();
            cols.sort();
            cols.dedup();
            cols
        };
        if touched.is_empty() {
            return Ok(());
        }

        let keys: Vec<PkValue> = local_changes.iter().map(|(k, _)| k.clone()).collect();
        let mut remote = ops::read_remote_columns(
            &*self.engine,
            &self.name,
            self.schema.as_deref(),
            &pk_spec,
            &touched,
            &keys,
        )
        .await?;
        if remote.num_rows() == 0 {
            // Every locally updated row is gone remotely; remote deletes are
            // not conflicts.
            return Ok(());
        }

        // Align remote column types with the local frame so equality does
        // not trip over driver typing (SQLite hands back integers for
        // booleans, text for timestamps).
        for column in remote.schema().names().map(str::to_owned).collect::<Vec<_>>() {
            if let Some(local) = self.frame.schema().column(&column) {
                remote.cast_column(&column, local.ty)?;
            }
        }

        let conflicts =
            detect_conflicts(&local_changes, &remote, &pk_spec, Some(self.tracker.baseline()))?;
        if conflicts.is_empty() {
            return Ok(());
        }
        info!(
            table = %self.name,
            conflicts = conflicts.len(),
            strategy = ?self.config.conflict_strategy,
            "resolving concurrent modifications"
        );

        let resolved = resolve_conflicts(
            &conflicts,
            &self.config.conflict_strategy,
            Some(&self.name),
        )?;
        let resolved_map: HashMap<PkValue, BTreeMap<String, Value>> =
            resolved.into_iter().collect();

        let mut revised: Vec<BTreeMap<String, Value>> = Vec::with_capacity(records.len());
        for record in records {
            let key =
                PkValue::composite(pk_spec.columns().iter().map(|c| record[c].clone()));
            match resolved_map.get(&key) {
                None => revised.push(record),
                Some(replacement) if replacement.is_empty() => {
                    debug!(table = %self.name, key = %key, "dropping local update after conflict");
                }
                Some(replacement) => {
                    let mut rebuilt: BTreeMap<String, Value> = replacement.clone();
                    for (col, v) in pk_spec.columns().iter().zip(key.values()) {
                        rebuilt.insert(col.clone(), v.clone());
                    }
                    revised.push(rebuilt);
                }
            }
        }
        plan.replace_update_records(revised);
        Ok(())
    }
}
