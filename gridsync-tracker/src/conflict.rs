//! Concurrent-modification detection and policy-driven resolution.
//!
//! Only pending updates participate: inserts and deletes are the planner's
//! concern. The caller pulls a fresh remote snapshot (restricted to touched
//! columns), hands it here together with the shared baseline, and applies the
//! resolved change sets back onto the plan.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::json;

use gridsync_data::{pk, Frame, PkSpec, PkValue, Value};
use gridsync_errors::{Fault, SyncResult};

/// A caller-supplied resolver for the `Custom` strategy: given the key, the
/// local change set, and the remote change set, produce the change set to
/// apply.
pub type CustomResolver = Arc<
    dyn Fn(&PkValue, &BTreeMap<String, Value>, &BTreeMap<String, Value>) -> BTreeMap<String, Value>
        + Send
        + Sync,
>;

/// How to resolve a row both sides changed since the shared baseline.
#[derive(Clone, Default)]
pub enum ConflictStrategy {
    /// Keep the local change set unchanged (the push overwrites).
    #[default]
    LastWriterWins,
    /// Drop the local update for the conflicting row.
    FirstWriterWins,
    /// Raise a conflict fault; nothing is written.
    Abort,
    /// Take remote values for remote-only changed columns, keep local values
    /// for conflicting columns.
    Merge,
    Custom(CustomResolver),
}

impl fmt::Debug for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictStrategy::LastWriterWins => "LastWriterWins",
            ConflictStrategy::FirstWriterWins => "FirstWriterWins",
            ConflictStrategy::Abort => "Abort",
            ConflictStrategy::Merge => "Merge",
            ConflictStrategy::Custom(_) => "Custom(..)",
        };
        f.write_str(name)
    }
}

impl FromStr for ConflictStrategy {
    type Err = Fault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_writer_wins" => Ok(ConflictStrategy::LastWriterWins),
            "first_writer_wins" => Ok(ConflictStrategy::FirstWriterWins),
            "abort" => Ok(ConflictStrategy::Abort),
            "merge" => Ok(ConflictStrategy::Merge),
            other => Err(Fault::validation(format!(
                "unknown conflict strategy '{other}' (custom strategies are supplied as values)"
            ))),
        }
    }
}

/// A detected conflict for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub pk: PkValue,
    /// The local pending change set (non-key columns only).
    pub local: BTreeMap<String, Value>,
    /// Remote columns that changed since the baseline, with remote's values.
    pub remote: BTreeMap<String, Value>,
    /// The subset where local and remote disagree.
    pub conflicting_columns: Vec<String>,
}

/// Compare pending updates against the remote snapshot.
///
/// For each updated row present remotely, a column conflicts when the remote
/// value moved away from the shared baseline *and* disagrees with the local
/// value. Without a baseline row the remote value is compared against the
/// local one directly. Rows absent remotely are skipped (a remote delete is
/// not a conflict; the executor handles it per plan).
pub fn detect_conflicts(
    updates: &[(PkValue, BTreeMap<String, Value>)],
    remote: &Frame,
    pk_spec: &PkSpec,
    baseline: Option<&Frame>,
) -> SyncResult<Vec<Conflict>> {
    let remote_index = pk::build_pk_index(remote, pk_spec)?;
    let baseline_index = match baseline {
        Some(b) => Some(pk::build_pk_index(b, pk_spec)?),
        None => None,
    };

    let mut conflicts = Vec::new();
    for (key, local_changes) in updates {
        let Some(&remote_row) = remote_index.get(key) else {
            continue;
        };
        let baseline_row = baseline_index
            .as_ref()
            .and_then(|idx| idx.get(key).copied());

        let mut conflicting = Vec::new();
        let mut remote_changes = BTreeMap::new();

        for (col, local_value) in local_changes {
            if pk_spec.contains(col) {
                continue;
            }
            let Some(remote_value) = remote.cell_by_name(remote_row, col) else {
                // Column missing remotely: a schema change, not a conflict.
                continue;
            };

            let remote_moved = match (baseline_row, baseline) {
                (Some(bi), Some(b)) => match b.cell_by_name(bi, col) {
                    Some(baseline_value) => remote_value != baseline_value,
                    None => remote_value != local_value,
                },
                _ => remote_value != local_value,
            };
            if !remote_moved {
                continue;
            }

            remote_changes.insert(col.clone(), remote_value.clone());
            if remote_value != local_value {
                conflicting.push(col.clone());
            }
        }

        if !conflicting.is_empty() {
            conflicts.push(Conflict {
                pk: key.clone(),
                local: local_changes.clone(),
                remote: remote_changes,
                conflicting_columns: conflicting,
            });
        }
    }
    Ok(conflicts)
}

/// Apply the strategy to each conflict, producing the replacement change set
/// per key. A missing key keeps its original change set; an empty change set
/// means "drop the local update for this row".
pub fn resolve_conflicts(
    conflicts: &[Conflict],
    strategy: &ConflictStrategy,
    table: Option<&str>,
) -> SyncResult<Vec<(PkValue, BTreeMap<String, Value>)>> {
    let mut resolved = Vec::with_capacity(conflicts.len());

    for conflict in conflicts {
        let replacement = match strategy {
            ConflictStrategy::LastWriterWins => conflict.local.clone(),
            ConflictStrategy::FirstWriterWins => BTreeMap::new(),
            ConflictStrategy::Abort => {
                return Err(Fault::Conflict {
                    table: table.map(str::to_owned),
                    pk: conflict.pk.to_string(),
                    local: json!(conflict.local),
                    remote: json!(conflict.remote),
                    conflicting_columns: conflict.conflicting_columns.clone(),
                    suggested_fix: "pull the latest data, review the conflicting columns, \
                                    and push again"
                        .to_owned(),
                });
            }
            ConflictStrategy::Merge => {
                let mut merged = conflict.local.clone();
                for (col, remote_value) in &conflict.remote {
                    if !conflict.conflicting_columns.contains(col) {
                        merged.insert(col.clone(), remote_value.clone());
                    }
                }
                merged
            }
            ConflictStrategy::Custom(resolver) => {
                resolver(&conflict.pk, &conflict.local, &conflict.remote)
            }
        };
        resolved.push((conflict.pk.clone(), replacement));
    }
    Ok(resolved)
}
