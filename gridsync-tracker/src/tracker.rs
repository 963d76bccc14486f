//! The change tracker: baseline vs current diffing with lazy recomputation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use indexmap::IndexMap;
use serde::Serialize;

use gridsync_data::{pk, DataType, Frame, PkSpec, PkValue, Value};

/// How much baseline state the tracker retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    /// Keep the full baseline frame for the tracker's lifetime.
    Full,
    /// Additionally maintain per-row [`RowState`] records holding only the
    /// changed cells, which is what summaries and conflict detection read.
    #[default]
    Incremental,
}

/// A recorded table operation. Only the name is kept; recording exists to
/// mark the diff as stale and to feed the summary's operation count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    pub name: String,
}

/// A derived row-level difference between baseline and current.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert {
        pk: PkValue,
        new: BTreeMap<String, Value>,
    },
    Update {
        pk: PkValue,
        old: BTreeMap<String, Value>,
        new: BTreeMap<String, Value>,
    },
    Delete {
        pk: PkValue,
        old: BTreeMap<String, Value>,
    },
}

impl RowChange {
    pub fn pk(&self) -> &PkValue {
        match self {
            RowChange::Insert { pk, .. } | RowChange::Update { pk, .. } | RowChange::Delete { pk, .. } => pk,
        }
    }
}

/// Row status in incremental tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowStatus {
    Inserted,
    Updated,
    Deleted,
}

/// Incremental-mode per-row state: only the changed cells, not full copies.
#[derive(Debug, Clone, PartialEq)]
pub struct RowState {
    pub status: RowStatus,
    pub changed_columns: BTreeSet<String>,
    pub old_values: BTreeMap<String, Value>,
    pub new_values: BTreeMap<String, Value>,
}

/// Counts of everything tracked, plus the single `has_changes` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub total_operations: usize,
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
    pub columns_added: usize,
    pub columns_dropped: usize,
    pub columns_renamed: usize,
    pub columns_type_changed: usize,
    pub has_changes: bool,
}

#[derive(Debug, Default)]
struct DiffCache {
    /// Mutation counter value this cache was computed at.
    at: u64,
    inserts: Vec<RowChange>,
    updates: Vec<RowChange>,
    deletes: Vec<RowChange>,
    row_states: HashMap<PkValue, RowState>,
}

/// Tracks changes made to a frame at both operation and row level.
///
/// Row diffs are lazy: mutations only bump a counter, and the diff is
/// recomputed on demand when the counter has advanced past the cached value.
#[derive(Debug)]
pub struct ChangeTracker {
    pk: PkSpec,
    mode: TrackingMode,
    baseline: Frame,
    baseline_pks: HashSet<PkValue>,
    original_columns: HashSet<String>,
    operations: Vec<Operation>,
    added_columns: BTreeSet<String>,
    dropped_columns: BTreeSet<String>,
    renamed_columns: IndexMap<String, String>,
    altered_column_types: IndexMap<String, DataType>,
    mutations: u64,
    cache: DiffCache,
}

impl ChangeTracker {
    pub fn new(pk: PkSpec, baseline: Frame, mode: TrackingMode) -> Self {
        let baseline_pks = pk::extract_pk_values(&baseline, &pk).unwrap_or_default();
        let original_columns = baseline.schema().names().map(str::to_owned).collect();
        ChangeTracker {
            pk,
            mode,
            baseline,
            baseline_pks,
            original_columns,
            operations: Vec::new(),
            added_columns: BTreeSet::new(),
            dropped_columns: BTreeSet::new(),
            renamed_columns: IndexMap::new(),
            altered_column_types: IndexMap::new(),
            // Start dirty so the first consumer computes against the baseline.
            mutations: 1,
            cache: DiffCache::default(),
        }
    }

    pub fn pk(&self) -> &PkSpec {
        &self.pk
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn baseline(&self) -> &Frame {
        &self.baseline
    }

    pub fn baseline_pks(&self) -> &HashSet<PkValue> {
        &self.baseline_pks
    }

    pub fn added_columns(&self) -> &BTreeSet<String> {
        &self.added_columns
    }

    pub fn dropped_columns(&self) -> &BTreeSet<String> {
        &self.dropped_columns
    }

    pub fn renamed_columns(&self) -> &IndexMap<String, String> {
        &self.renamed_columns
    }

    pub fn altered_column_types(&self) -> &IndexMap<String, DataType> {
        &self.altered_column_types
    }

    /// Record a free-form operation marker. The diff is marked stale; nothing
    /// else is interpreted from the name.
    pub fn record_operation(&mut self, name: &str) {
        self.operations.push(Operation { name: name.to_owned() });
        self.invalidate();
    }

    pub fn track_column_addition(&mut self, column: &str) {
        if self.original_columns.contains(column) {
            // Re-adding a column dropped earlier this session nets out.
            self.dropped_columns.remove(column);
        } else {
            self.added_columns.insert(column.to_owned());
        }
        self.invalidate();
    }

    pub fn track_column_drop(&mut self, column: &str) {
        if self.added_columns.remove(column) {
            // Added then dropped in the same session nets out.
        } else if self.original_columns.contains(column) {
            self.dropped_columns.insert(column.to_owned());
        }
        self.altered_column_types.shift_remove(column);
        self.invalidate();
    }

    /// Track a rename, collapsing chains: after `a -> b` then `b -> c` the
    /// map holds `a -> c`. A rename back to the original name nets out. A
    /// rename of a key column updates the key spec.
    pub fn track_column_rename(&mut self, old: &str, new: &str) {
        if self.added_columns.remove(old) {
            // Renaming a column added this session just renames the addition.
            self.added_columns.insert(new.to_owned());
        } else if let Some(origin) = self
            .renamed_columns
            .iter()
            .find(|(_, to)| to.as_str() == old)
            .map(|(from, _)| from.clone())
        {
            if origin == new {
                self.renamed_columns.shift_remove(&origin);
            } else {
                self.renamed_columns.insert(origin, new.to_owned());
            }
        } else {
            self.renamed_columns.insert(old.to_owned(), new.to_owned());
        }

        if let Some(ty) = self.altered_column_types.shift_remove(old) {
            self.altered_column_types.insert(new.to_owned(), ty);
        }
        self.pk.rename(old, new);
        self.invalidate();
    }

    pub fn track_column_type_change(&mut self, column: &str, ty: DataType) {
        self.altered_column_types.insert(column.to_owned(), ty);
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.mutations += 1;
    }

    /// Recompute row diffs against `current` if any mutation happened since
    /// the cached computation.
    ///
    /// Never fails: a frame whose key columns are missing simply yields no
    /// row diffs (the missing key surfaces at validation time instead).
    pub fn compute_row_changes(&mut self, current: &Frame) {
        if self.cache.at == self.mutations {
            return;
        }

        self.cache = DiffCache { at: self.mutations, ..DiffCache::default() };

        let Ok(current_positions) = pk::pk_positions(current.schema(), &self.pk) else {
            return;
        };
        // The baseline may predate a key-column rename; map the spec through
        // the recorded renames when locating it there.
        let baseline_spec = self.baseline_pk_spec();
        let Ok(baseline_positions) = pk::pk_positions(self.baseline.schema(), &baseline_spec) else {
            return;
        };

        let current_index: Vec<(PkValue, usize)> = current
            .rows()
            .iter()
            .enumerate()
            .map(|(i, r)| (pk::pk_of_row(r, &current_positions), i))
            .collect();
        let current_keys: HashSet<PkValue> = current_index.iter().map(|(k, _)| k.clone()).collect();
        let baseline_index: HashMap<PkValue, usize> = self
            .baseline
            .rows()
            .iter()
            .enumerate()
            .map(|(i, r)| (pk::pk_of_row(r, &baseline_positions), i))
            .collect();

        // Columns comparable between the two shapes, honoring renames: the
        // baseline column `old` corresponds to the current column `new`.
        let comparable: Vec<(String, String)> = current
            .schema()
            .names()
            .filter_map(|cur| {
                let base = self
                    .renamed_columns
                    .iter()
                    .find(|(_, to)| to.as_str() == cur)
                    .map(|(from, _)| from.as_str())
                    .unwrap_or(cur);
                self.baseline
                    .schema()
                    .contains(base)
                    .then(|| (base.to_owned(), cur.to_owned()))
            })
            .collect();

        // Inserts, in current row order.
        for (key, row_idx) in &current_index {
            if !baseline_index.contains_key(key) {
                let new = current.row_map(*row_idx);
                if self.mode == TrackingMode::Incremental {
                    self.cache.row_states.insert(
                        key.clone(),
                        RowState {
                            status: RowStatus::Inserted,
                            changed_columns: BTreeSet::new(),
                            old_values: BTreeMap::new(),
                            new_values: new.clone(),
                        },
                    );
                }
                self.cache.inserts.push(RowChange::Insert { pk: key.clone(), new });
            }
        }

        // Deletes, in baseline row order.
        let mut deleted: Vec<(usize, PkValue)> = baseline_index
            .iter()
            .filter(|(k, _)| !current_keys.contains(*k))
            .map(|(k, &i)| (i, k.clone()))
            .collect();
        deleted.sort_by_key(|(i, _)| *i);
        for (row_idx, key) in deleted {
            let old = self.baseline.row_map(row_idx);
            if self.mode == TrackingMode::Incremental {
                self.cache.row_states.insert(
                    key.clone(),
                    RowState {
                        status: RowStatus::Deleted,
                        changed_columns: BTreeSet::new(),
                        old_values: old.clone(),
                        new_values: BTreeMap::new(),
                    },
                );
            }
            self.cache.deletes.push(RowChange::Delete { pk: key, old });
        }

        // Updates: keys present on both sides whose comparable columns differ.
        for (key, cur_idx) in &current_index {
            let Some(&base_idx) = baseline_index.get(key) else { continue };

            let mut changed_columns = BTreeSet::new();
            let mut old_values = BTreeMap::new();
            let mut new_values = BTreeMap::new();
            let mut old_row = BTreeMap::new();
            let mut new_row = BTreeMap::new();

            for (base_col, cur_col) in &comparable {
                let old_v = self
                    .baseline
                    .cell_by_name(base_idx, base_col)
                    .cloned()
                    .unwrap_or(Value::Null);
                let new_v = current
                    .cell_by_name(*cur_idx, cur_col)
                    .cloned()
                    .unwrap_or(Value::Null);
                // Value equality is NaN-aware; a type mismatch counts as a
                // difference.
                if old_v != new_v {
                    changed_columns.insert(cur_col.clone());
                    old_values.insert(cur_col.clone(), old_v.clone());
                    new_values.insert(cur_col.clone(), new_v.clone());
                }
                old_row.insert(cur_col.clone(), old_v);
                new_row.insert(cur_col.clone(), new_v);
            }

            if !changed_columns.is_empty() {
                if self.mode == TrackingMode::Incremental {
                    self.cache.row_states.insert(
                        key.clone(),
                        RowState {
                            status: RowStatus::Updated,
                            changed_columns,
                            old_values,
                            new_values,
                        },
                    );
                }
                self.cache.updates.push(RowChange::Update {
                    pk: key.clone(),
                    old: old_row,
                    new: new_row,
                });
            }
        }
    }

    /// The key spec as it applied to the baseline, i.e. with this session's
    /// renames undone.
    fn baseline_pk_spec(&self) -> PkSpec {
        let mut spec = self.pk.clone();
        for (old, new) in &self.renamed_columns {
            spec.rename(new, old);
        }
        spec
    }

    pub fn inserts(&self) -> &[RowChange] {
        &self.cache.inserts
    }

    pub fn updates(&self) -> &[RowChange] {
        &self.cache.updates
    }

    pub fn deletes(&self) -> &[RowChange] {
        &self.cache.deletes
    }

    /// Incremental-mode row states for all changed rows. Empty in full mode.
    pub fn row_states(&self) -> &HashMap<PkValue, RowState> {
        &self.cache.row_states
    }

    /// Whether anything (row or schema level) differs from the baseline.
    /// Recomputes row diffs when `current` is provided and the diff is stale.
    pub fn has_changes(&mut self, current: Option<&Frame>) -> bool {
        if let Some(current) = current {
            self.compute_row_changes(current);
        }
        !self.cache.inserts.is_empty()
            || !self.cache.updates.is_empty()
            || !self.cache.deletes.is_empty()
            || !self.added_columns.is_empty()
            || !self.dropped_columns.is_empty()
            || !self.renamed_columns.is_empty()
            || !self.altered_column_types.is_empty()
    }

    /// Replace the baseline and clear every tracked change.
    pub fn reset(&mut self, new_baseline: Frame) {
        self.baseline_pks = pk::extract_pk_values(&new_baseline, &self.pk).unwrap_or_default();
        self.original_columns = new_baseline.schema().names().map(str::to_owned).collect();
        self.baseline = new_baseline;
        self.operations.clear();
        self.added_columns.clear();
        self.dropped_columns.clear();
        self.renamed_columns.clear();
        self.altered_column_types.clear();
        self.mutations += 1;
        self.cache = DiffCache { at: self.mutations, ..DiffCache::default() };
    }

    pub fn summary(&mut self, current: Option<&Frame>) -> ChangeSummary {
        let has_changes = self.has_changes(current);
        ChangeSummary {
            total_operations: self.operations.len(),
            inserts: self.cache.inserts.len(),
            updates: self.cache.updates.len(),
            deletes: self.cache.deletes.len(),
            columns_added: self.added_columns.len(),
            columns_dropped: self.dropped_columns.len(),
            columns_renamed: self.renamed_columns.len(),
            columns_type_changed: self.altered_column_types.len(),
            has_changes,
        }
    }
}
