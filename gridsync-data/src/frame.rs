//! The tabular value: an ordered schema plus rows of [`Value`]s.
//!
//! A [`Frame`] makes no assumptions beyond column-indexed access; primary-key
//! addressing is layered on top by [`crate::pk`]. Mutation helpers keep the
//! schema and every row in lockstep, so a frame can never hold a ragged row.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;

use gridsync_errors::{Fault, SyncResult};

use crate::kind::DataType;
use crate::value::Value;

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Column { name: name.into(), ty }
    }
}

/// An ordered list of columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Schema { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|i| &self.columns[i])
    }

    /// Column names that appear more than once, in first-seen order.
    pub fn duplicate_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dups = Vec::new();
        for c in &self.columns {
            if !seen.insert(c.name.as_str()) && !dups.contains(&c.name) {
                dups.push(c.name.clone());
            }
        }
        dups
    }
}

/// An in-memory table: schema plus rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    schema: Schema,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(schema: Schema) -> Self {
        Frame { schema, rows: Vec::new() }
    }

    /// Build a frame from rows, rejecting any row whose arity disagrees with
    /// the schema.
    pub fn from_rows(schema: Schema, rows: Vec<Vec<Value>>) -> SyncResult<Self> {
        let width = schema.len();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(Fault::schema_with(
                    format!("row {i} has {} values but the schema has {width} columns", row.len()),
                    json!({ "row": i, "row_width": row.len(), "schema_width": width }),
                ));
            }
        }
        Ok(Frame { schema, rows })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column position, or a schema fault naming the column.
    pub fn position_of(&self, name: &str) -> SyncResult<usize> {
        self.schema.position(name).ok_or_else(|| {
            Fault::schema_with(
                format!("column '{name}' does not exist"),
                json!({ "column": name }),
            )
        })
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn cell_by_name(&self, row: usize, name: &str) -> Option<&Value> {
        let col = self.schema.position(name)?;
        self.cell(row, col)
    }

    pub fn set_cell(&mut self, row: usize, name: &str, value: Value) -> SyncResult<()> {
        let col = self.position_of(name)?;
        let rows = self.rows.len();
        match self.rows.get_mut(row) {
            Some(r) => {
                r[col] = value;
                Ok(())
            }
            None => Err(Fault::schema_with(
                format!("row index {row} out of bounds"),
                json!({ "row": row, "rows": rows }),
            )),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> SyncResult<()> {
        if row.len() != self.schema.len() {
            return Err(Fault::schema_with(
                format!(
                    "row has {} values but the schema has {} columns",
                    row.len(),
                    self.schema.len()
                ),
                json!({ "row_width": row.len(), "schema_width": self.schema.len() }),
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn remove_row(&mut self, row: usize) {
        if row < self.rows.len() {
            self.rows.remove(row);
        }
    }

    /// All values of one column, in row order.
    pub fn column_values(&self, name: &str) -> SyncResult<Vec<&Value>> {
        let col = self.position_of(name)?;
        Ok(self.rows.iter().map(|r| &r[col]).collect())
    }

    /// One row as a column-name -> value map.
    pub fn row_map(&self, row: usize) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        if let Some(r) = self.rows.get(row) {
            for (c, v) in self.schema.columns().iter().zip(r) {
                map.insert(c.name.clone(), v.clone());
            }
        }
        map
    }

    pub fn add_column(&mut self, name: impl Into<String>, ty: DataType, default: Value) -> SyncResult<()> {
        let name = name.into();
        if self.schema.contains(&name) {
            return Err(Fault::schema_with(
                format!("column '{name}' already exists"),
                json!({ "column": name }),
            ));
        }
        self.schema.columns.push(Column::new(name, ty));
        for row in &mut self.rows {
            row.push(default.clone());
        }
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> SyncResult<()> {
        let col = self.position_of(name)?;
        self.schema.columns.remove(col);
        for row in &mut self.rows {
            row.remove(col);
        }
        Ok(())
    }

    pub fn rename_column(&mut self, old: &str, new: impl Into<String>) -> SyncResult<()> {
        let new = new.into();
        if self.schema.contains(&new) {
            return Err(Fault::schema_with(
                format!("column '{new}' already exists"),
                json!({ "column": new }),
            ));
        }
        let col = self.position_of(old)?;
        self.schema.columns[col].name = new;
        Ok(())
    }

    /// Change a column's declared type and coerce every value toward it.
    pub fn cast_column(&mut self, name: &str, ty: DataType) -> SyncResult<()> {
        let col = self.position_of(name)?;
        self.schema.columns[col].ty = ty;
        for row in &mut self.rows {
            row[col] = row[col].coerce_to(ty);
        }
        Ok(())
    }

    /// Reorder columns so the named ones come first, in the given order.
    /// Unnamed columns keep their relative order after them.
    pub fn move_columns_front(&mut self, names: &[String]) -> SyncResult<()> {
        let mut order = Vec::with_capacity(self.schema.len());
        for name in names {
            order.push(self.position_of(name)?);
        }
        for i in 0..self.schema.len() {
            if !order.contains(&i) {
                order.push(i);
            }
        }
        self.schema.columns = order.iter().map(|&i| self.schema.columns[i].clone()).collect();
        for row in &mut self.rows {
            *row = order.iter().map(|&i| row[i].clone()).collect();
        }
        Ok(())
    }
}
