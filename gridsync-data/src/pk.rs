//! Primary-key handling: the key spec, per-row key values, and the helpers
//! that locate and extract keys from a [`Frame`].
//!
//! Composite keys are ordered tuples; tuple ordering always follows the spec,
//! not the frame's column order. After a pull the engine canonicalizes frames
//! so the key columns lead, but nothing here requires that.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use gridsync_errors::{Fault, SyncResult};

use crate::frame::{Frame, Schema};
use crate::value::Value;

/// One or more column names that together identify a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkSpec {
    columns: Vec<String>,
}

impl PkSpec {
    pub fn single(name: impl Into<String>) -> Self {
        PkSpec { columns: vec![name.into()] }
    }

    pub fn composite(names: impl IntoIterator<Item = impl Into<String>>) -> SyncResult<Self> {
        let columns: Vec<String> = names.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(Fault::validation("a primary key needs at least one column"));
        }
        Ok(PkSpec { columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_composite(&self) -> bool {
        self.columns.len() > 1
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Follow a column rename. A rename of a key column must update the spec
    /// so later pushes bind against the new name.
    pub fn rename(&mut self, old: &str, new: &str) {
        for c in &mut self.columns {
            if c == old {
                *c = new.to_owned();
            }
        }
    }
}

impl fmt::Display for PkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_composite() {
            write!(f, "({})", self.columns.join(", "))
        } else {
            write!(f, "{}", self.columns[0])
        }
    }
}

/// A row's key value: a scalar for single-column keys, an ordered tuple for
/// composite keys. Tuple order follows the [`PkSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PkValue(Vec<Value>);

impl PkValue {
    pub fn scalar(value: impl Into<Value>) -> Self {
        PkValue(vec![value.into()])
    }

    pub fn composite(values: impl IntoIterator<Item = Value>) -> Self {
        PkValue(values.into_iter().collect())
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn width(&self) -> usize {
        self.0.len()
    }

    pub fn contains_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }
}

impl fmt::Display for PkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            write!(f, "{}", self.0[0])
        } else {
            let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
            write!(f, "({})", parts.join(", "))
        }
    }
}

/// Key columns missing from `schema`, in spec order. Empty means the key is
/// fully present.
pub fn missing_pk_columns(schema: &Schema, pk: &PkSpec) -> Vec<String> {
    pk.columns()
        .iter()
        .filter(|c| !schema.contains(c))
        .cloned()
        .collect()
}

/// Positions of the key columns within `schema`, in spec order. Fails with a
/// schema fault naming the missing columns.
pub fn pk_positions(schema: &Schema, pk: &PkSpec) -> SyncResult<Vec<usize>> {
    let missing = missing_pk_columns(schema, pk);
    if !missing.is_empty() {
        return Err(Fault::schema_with(
            format!("primary key column(s) {missing:?} are missing"),
            json!({ "primary_key": pk.columns(), "missing": missing }),
        ));
    }
    Ok(pk
        .columns()
        .iter()
        .map(|c| schema.position(c).expect("presence checked above"))
        .collect())
}

/// The key value of one row given precomputed column positions.
pub fn pk_of_row(row: &[Value], positions: &[usize]) -> PkValue {
    PkValue::composite(positions.iter().map(|&i| row[i].clone()))
}

/// Every key value in the frame.
pub fn extract_pk_values(frame: &Frame, pk: &PkSpec) -> SyncResult<HashSet<PkValue>> {
    let positions = pk_positions(frame.schema(), pk)?;
    Ok(frame.rows().iter().map(|r| pk_of_row(r, &positions)).collect())
}

/// Key value -> row index. With duplicate keys the later row wins; duplicates
/// are a validation concern, not a lookup concern.
pub fn build_pk_index(frame: &Frame, pk: &PkSpec) -> SyncResult<HashMap<PkValue, usize>> {
    let positions = pk_positions(frame.schema(), pk)?;
    Ok(frame
        .rows()
        .iter()
        .enumerate()
        .map(|(i, r)| (pk_of_row(r, &positions), i))
        .collect())
}

/// Reorder the frame so the key columns lead, in spec order. This is the
/// canonical presentation after a pull.
pub fn canonicalize_pk_front(frame: &mut Frame, pk: &PkSpec) -> SyncResult<()> {
    let missing = missing_pk_columns(frame.schema(), pk);
    if !missing.is_empty() {
        return Err(Fault::schema_with(
            format!("primary key column(s) {missing:?} are missing"),
            json!({ "primary_key": pk.columns(), "missing": missing }),
        ));
    }
    frame.move_columns_front(pk.columns())
}
