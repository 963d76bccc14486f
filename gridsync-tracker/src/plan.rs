//! Execution planning: tracked changes become an ordered, priority-sorted
//! sequence of SQL steps.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use gridsync_data::{pk, DataType, Frame, PkValue, Value};
use gridsync_errors::SyncResult;

use crate::tracker::{ChangeTracker, RowChange};

/// The kind of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepKind {
    SchemaChange,
    Delete,
    Update,
    Insert,
}

/// A single schema modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    RenameColumn { old: String, new: String },
    DropColumn { name: String },
    AddColumn { name: String, ty: DataType },
    AlterColumnType { name: String, ty: DataType },
}

/// Step payload: what the executor needs to run it.
#[derive(Debug, Clone, PartialEq)]
pub enum StepPayload {
    Schema(SchemaChange),
    /// Key values to delete, in baseline order.
    DeleteKeys(Vec<PkValue>),
    /// Update records, each containing its key columns plus every bound
    /// column value.
    UpdateRecords(Vec<BTreeMap<String, Value>>),
    /// Insert records in current-frame column order.
    InsertRecords {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

/// Priorities group steps into phases; ties keep insertion order.
/// Renames run before drops so a column being kept under a new name is never
/// dropped; schema before DML so DML binds against the current shape; deletes
/// before inserts so a delete+insert "move" never collides on the key.
pub mod priority {
    pub const RENAME: u8 = 1;
    pub const DROP: u8 = 2;
    pub const ADD: u8 = 3;
    pub const ALTER_TYPE: u8 = 4;
    pub const DELETE: u8 = 10;
    pub const UPDATE: u8 = 20;
    pub const INSERT: u8 = 30;
}

/// One step of an execution plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub kind: StepKind,
    pub description: String,
    pub payload: StepPayload,
    pub priority: u8,
}

/// Step counts by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub total_steps: usize,
    pub schema_changes: usize,
    pub delete_operations: usize,
    pub update_operations: usize,
    pub insert_operations: usize,
}

/// An ordered sequence of steps derived deterministically from a tracker and
/// the current frame. Built once per push and discarded after execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPlan {
    steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    /// Build the plan. Recomputes the tracker's row diffs first, then emits
    /// schema steps (renames, drops, adds, type changes), one delete step,
    /// one update step, and one insert step, sorted by priority.
    pub fn build(tracker: &mut ChangeTracker, current: &Frame) -> SyncResult<ExecutionPlan> {
        tracker.compute_row_changes(current);

        let mut plan = ExecutionPlan::default();
        plan.add_schema_changes(tracker, current);
        plan.add_deletes(tracker);
        plan.add_updates(tracker, current)?;
        plan.add_inserts(tracker, current);

        // Stable: equal priorities keep insertion order.
        plan.steps.sort_by_key(|s| s.priority);
        Ok(plan)
    }

    fn push(&mut self, kind: StepKind, priority: u8, description: String, payload: StepPayload) {
        self.steps.push(PlanStep { kind, description, payload, priority });
    }

    fn add_schema_changes(&mut self, tracker: &ChangeTracker, current: &Frame) {
        for (old, new) in tracker.renamed_columns() {
            self.push(
                StepKind::SchemaChange,
                priority::RENAME,
                format!("rename column '{old}' to '{new}'"),
                StepPayload::Schema(SchemaChange::RenameColumn {
                    old: old.clone(),
                    new: new.clone(),
                }),
            );
        }

        for name in tracker.dropped_columns() {
            // A column covered by a rename is being kept, not dropped.
            if tracker.renamed_columns().contains_key(name) {
                continue;
            }
            self.push(
                StepKind::SchemaChange,
                priority::DROP,
                format!("drop column '{name}'"),
                StepPayload::Schema(SchemaChange::DropColumn { name: name.clone() }),
            );
        }

        for name in tracker.added_columns() {
            let ty = current
                .schema()
                .column(name)
                .map(|c| c.ty)
                .or_else(|| {
                    current
                        .column_values(name)
                        .ok()
                        .map(|vs| DataType::infer(vs.into_iter()))
                })
                .unwrap_or(DataType::Text);
            self.push(
                StepKind::SchemaChange,
                priority::ADD,
                format!("add column '{name}'"),
                StepPayload::Schema(SchemaChange::AddColumn { name: name.clone(), ty }),
            );
        }

        for (name, ty) in tracker.altered_column_types() {
            self.push(
                StepKind::SchemaChange,
                priority::ALTER_TYPE,
                format!("alter column '{name}' type to {ty}"),
                StepPayload::Schema(SchemaChange::AlterColumnType { name: name.clone(), ty: *ty }),
            );
        }
    }

    fn add_deletes(&mut self, tracker: &ChangeTracker) {
        let keys: Vec<PkValue> = tracker.deletes().iter().map(|rc| rc.pk().clone()).collect();
        if !keys.is_empty() {
            self.push(
                StepKind::Delete,
                priority::DELETE,
                format!("delete {} row(s)", keys.len()),
                StepPayload::DeleteKeys(keys),
            );
        }
    }

    /// Update records for changed rows, plus records binding values of newly
    /// added columns for existing rows the diff did not touch. Without the
    /// latter, an added column would land in the database all-NULL for rows
    /// that changed nothing else.
    fn add_updates(&mut self, tracker: &ChangeTracker, current: &Frame) -> SyncResult<()> {
        let pk_spec = tracker.pk().clone();
        let mut records: Vec<BTreeMap<String, Value>> = Vec::new();
        let mut keyed: HashSet<PkValue> = HashSet::new();

        for rc in tracker.updates() {
            let RowChange::Update { pk: key, new, .. } = rc else { continue };
            let mut record = new.clone();
            for (col, v) in pk_spec.columns().iter().zip(key.values()) {
                record.insert(col.clone(), v.clone());
            }
            // Added columns are not part of the baseline diff; bind them too.
            for col in tracker.added_columns() {
                if let Some(idx) = current_row_index(current, tracker, key) {
                    if let Some(v) = current.cell_by_name(idx, col) {
                        record.insert(col.clone(), v.clone());
                    }
                }
            }
            keyed.insert(key.clone());
            records.push(record);
        }

        if !tracker.added_columns().is_empty() {
            let positions = pk::pk_positions(current.schema(), &pk_spec)?;
            for (idx, row) in current.rows().iter().enumerate() {
                let key = pk::pk_of_row(row, &positions);
                // Existing rows only: inserts already carry the new columns.
                if keyed.contains(&key) || !tracker.baseline_pks().contains(&key) {
                    continue;
                }
                let mut record: BTreeMap<String, Value> = BTreeMap::new();
                for (col, v) in pk_spec.columns().iter().zip(key.values()) {
                    record.insert(col.clone(), v.clone());
                }
                for col in tracker.added_columns() {
                    if let Some(v) = current.cell_by_name(idx, col) {
                        record.insert(col.clone(), v.clone());
                    }
                }
                if record.len() > pk_spec.width() {
                    records.push(record);
                }
            }
        }

        if !records.is_empty() {
            self.push(
                StepKind::Update,
                priority::UPDATE,
                format!("update {} row(s)", records.len()),
                StepPayload::UpdateRecords(records),
            );
        }
        Ok(())
    }

    fn add_inserts(&mut self, tracker: &ChangeTracker, current: &Frame) {
        let inserts = tracker.inserts();
        if inserts.is_empty() {
            return;
        }

        let columns: Vec<String> = current.schema().names().map(str::to_owned).collect();
        let rows: Vec<Vec<Value>> = inserts
            .iter()
            .filter_map(|rc| match rc {
                RowChange::Insert { pk: key, .. } => {
                    current_row_index(current, tracker, key)
                        .map(|idx| current.rows()[idx].clone())
                }
                _ => None,
            })
            .collect();

        self.push(
            StepKind::Insert,
            priority::INSERT,
            format!("insert {} row(s)", rows.len()),
            StepPayload::InsertRecords { columns, rows },
        );
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// An empty plan is a successful no-op.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Replace the update step's records, used by conflict resolution to
    /// revise pending updates just before execution. An empty replacement
    /// removes the step.
    pub fn replace_update_records(&mut self, records: Vec<BTreeMap<String, Value>>) {
        self.steps.retain(|s| s.kind != StepKind::Update);
        if !records.is_empty() {
            let step = PlanStep {
                kind: StepKind::Update,
                description: format!("update {} row(s)", records.len()),
                payload: StepPayload::UpdateRecords(records),
                priority: priority::UPDATE,
            };
            // Keep priority order: updates sit between deletes and inserts.
            let pos = self
                .steps
                .iter()
                .position(|s| s.priority > priority::UPDATE)
                .unwrap_or(self.steps.len());
            self.steps.insert(pos, step);
        }
    }

    pub fn summary(&self) -> PlanSummary {
        let count = |kind: StepKind| self.steps.iter().filter(|s| s.kind == kind).count();
        PlanSummary {
            total_steps: self.steps.len(),
            schema_changes: count(StepKind::SchemaChange),
            delete_operations: count(StepKind::Delete),
            update_operations: count(StepKind::Update),
            insert_operations: count(StepKind::Insert),
        }
    }
}

fn current_row_index(current: &Frame, tracker: &ChangeTracker, key: &PkValue) -> Option<usize> {
    let positions = pk::pk_positions(current.schema(), tracker.pk()).ok()?;
    current
        .rows()
        .iter()
        .position(|row| &pk::pk_of_row(row, &positions) == key)
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ExecutionPlan:")?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "  {}. [{:?}] {}", i + 1, step.kind, step.description)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use gridsync_data::{Column, PkSpec, Schema};
    use pretty_assertions::assert_eq;

    use crate::tracker::TrackingMode;

    use super::*;

    fn users() -> Frame {
        Frame::from_rows(
            Schema::new(vec![
                Column::new("id", DataType::Int),
                Column::new("name", DataType::Text),
                Column::new("age", DataType::Int),
            ]),
            vec![
                vec![Value::Int(1), "Alice".into(), Value::Int(25)],
                vec![Value::Int(2), "Bob".into(), Value::Int(30)],
                vec![Value::Int(3), "Charlie".into(), Value::Int(35)],
            ],
        )
        .unwrap()
    }

    fn tracker() -> ChangeTracker {
        ChangeTracker::new(PkSpec::single("id"), users(), TrackingMode::Incremental)
    }

    #[test]
    fn empty_plan_for_unchanged_frame() {
        let mut t = tracker();
        let current = users();
        let plan = ExecutionPlan::build(&mut t, &current).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn schema_steps_precede_dml_in_priority_order() {
        let mut t = tracker();
        let mut current = users();

        current.rename_column("name", "full_name").unwrap();
        t.track_column_rename("name", "full_name");
        current.drop_column("age").unwrap();
        t.track_column_drop("age");
        current.add_column("email", DataType::Text, Value::Null).unwrap();
        t.track_column_addition("email");
        t.track_column_type_change("full_name", DataType::Text);
        current.remove_row(2);
        current.push_row(vec![Value::Int(9), "Zed".into(), Value::Null]).unwrap();
        t.record_operation("edits");

        let plan = ExecutionPlan::build(&mut t, &current).unwrap();
        let priorities: Vec<u8> = plan.steps().iter().map(|s| s.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_unstable();
        assert_eq!(priorities, sorted);

        let kinds: Vec<StepKind> = plan.steps().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::SchemaChange, // rename
                StepKind::SchemaChange, // drop
                StepKind::SchemaChange, // add
                StepKind::SchemaChange, // alter type
                StepKind::Delete,
                StepKind::Update, // email backfill for existing rows
                StepKind::Insert,
            ]
        );
    }

    #[test]
    fn renamed_column_is_not_dropped() {
        let mut t = tracker();
        let mut current = users();
        current.rename_column("age", "years").unwrap();
        t.track_column_rename("age", "years");
        t.track_column_drop("age");

        let plan = ExecutionPlan::build(&mut t, &current).unwrap();
        let drops: Vec<&PlanStep> =
            plan.steps().iter().filter(|s| s.priority == priority::DROP).collect();
        assert!(drops.is_empty(), "rename must shadow the drop: {plan}");
    }

    #[test]
    fn delete_step_carries_all_keys() {
        let mut t = tracker();
        let mut current = users();
        current.remove_row(2);
        current.remove_row(0);
        t.record_operation("deletes");

        let plan = ExecutionPlan::build(&mut t, &current).unwrap();
        assert_eq!(plan.steps().len(), 1);
        match &plan.steps()[0].payload {
            StepPayload::DeleteKeys(keys) => {
                assert_eq!(keys, &vec![PkValue::scalar(1), PkValue::scalar(3)]);
            }
            other => panic!("expected delete keys, got {other:?}"),
        }
    }

    #[test]
    fn update_records_key_all_bound_columns() {
        let mut t = tracker();
        let mut current = users();
        current.set_cell(1, "age", Value::Int(31)).unwrap();
        t.record_operation("edit");

        let plan = ExecutionPlan::build(&mut t, &current).unwrap();
        match &plan.steps()[0].payload {
            StepPayload::UpdateRecords(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0]["id"], Value::Int(2));
                assert_eq!(records[0]["age"], Value::Int(31));
                assert_eq!(records[0]["name"], Value::Text("Bob".into()));
            }
            other => panic!("expected update records, got {other:?}"),
        }
    }

    #[test]
    fn added_column_backfills_existing_rows_only() {
        let mut t = tracker();
        let mut current = users();
        current.add_column("email", DataType::Text, Value::Text("x@y".into())).unwrap();
        t.track_column_addition("email");
        current
            .push_row(vec![Value::Int(4), "Dina".into(), Value::Int(20), "d@y".into()])
            .unwrap();
        t.record_operation("add row");

        let plan = ExecutionPlan::build(&mut t, &current).unwrap();
        let update = plan
            .steps()
            .iter()
            .find(|s| s.kind == StepKind::Update)
            .expect("backfill update step");
        match &update.payload {
            StepPayload::UpdateRecords(records) => {
                // Three existing rows get the new column; the insert carries
                // its own value.
                assert_eq!(records.len(), 3);
                assert!(records.iter().all(|r| r.contains_key("email")));
            }
            other => panic!("expected update records, got {other:?}"),
        }
    }

    #[test]
    fn insert_rows_follow_current_column_order() {
        let mut t = tracker();
        let mut current = users();
        current
            .push_row(vec![Value::Int(4), "David".into(), Value::Int(40)])
            .unwrap();
        t.record_operation("add");

        let plan = ExecutionPlan::build(&mut t, &current).unwrap();
        match &plan.steps()[0].payload {
            StepPayload::InsertRecords { columns, rows } => {
                assert_eq!(columns, &vec!["id".to_owned(), "name".to_owned(), "age".to_owned()]);
                assert_eq!(rows, &vec![vec![Value::Int(4), "David".into(), Value::Int(40)]]);
            }
            other => panic!("expected insert records, got {other:?}"),
        }
    }

    #[test]
    fn replace_update_records_can_drop_the_step() {
        let mut t = tracker();
        let mut current = users();
        current.set_cell(0, "age", Value::Int(26)).unwrap();
        t.record_operation("edit");
        let mut plan = ExecutionPlan::build(&mut t, &current).unwrap();
        assert_eq!(plan.summary().update_operations, 1);

        plan.replace_update_records(Vec::new());
        assert!(plan.is_empty());
    }
}
