//! Parameterized DML rendering: batched deletes, per-row updates, and
//! multi-row inserts, plus the deterministic batch-size heuristic.

use std::collections::BTreeMap;

use itertools::Itertools;

use gridsync_data::{PkSpec, PkValue, Value};
use gridsync_errors::{Fault, SyncResult};

use crate::Dialect;

/// A rendered statement and the values to bind, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// DML operation kinds, used to pick batch sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlKind {
    Delete,
    Update,
    Insert,
}

/// The tightest bound-parameter budget across supported dialects (SQLite's
/// historical 999-variable limit). Batch sizes are derived from it so one
/// heuristic works everywhere.
const PARAM_BUDGET: usize = 999;

/// Rows (or keys, for deletes) per statement batch.
///
/// Deterministic in `(kind, width)` so tests can assert exact chunking:
/// deletes carry only key columns and batch widest; inserts pack as many rows
/// as the parameter budget allows; updates run one statement per row inside
/// the transaction and cap lower to bound statement count per batch.
pub fn batch_size(kind: DmlKind, width: usize) -> usize {
    let width = width.max(1);
    match kind {
        DmlKind::Delete => (PARAM_BUDGET / width).clamp(1, 500),
        DmlKind::Insert => (PARAM_BUDGET / width).max(1),
        DmlKind::Update => (PARAM_BUDGET / width).clamp(1, 200),
    }
}

/// `SELECT * FROM <t>`, used by pull.
pub fn select_all(dialect: Dialect, table: &str, schema: Option<&str>) -> String {
    format!("SELECT * FROM {}", dialect.table_ref(table, schema))
}

/// A keyed predicate over one batch of key values, appended to `sql`,
/// pushing bound values onto `params`.
///
/// Single-column keys render `pk IN (?, ?, ...)`; composite keys render
/// `(a = ? AND b = ?) OR (...)`.
fn push_pk_predicate(
    dialect: Dialect,
    pk: &PkSpec,
    keys: &[PkValue],
    sql: &mut String,
    params: &mut Vec<Value>,
) {
    if !pk.is_composite() {
        let col = dialect.quote_identifier(&pk.columns()[0]);
        let placeholders = keys
            .iter()
            .enumerate()
            .map(|(i, _)| dialect.placeholder(params.len() + i + 1))
            .join(", ");
        sql.push_str(&format!("{col} IN ({placeholders})"));
        params.extend(keys.iter().map(|k| k.values()[0].clone()));
    } else {
        let groups = keys
            .iter()
            .map(|key| {
                let group = pk
                    .columns()
                    .iter()
                    .zip(key.values())
                    .map(|(col, v)| {
                        params.push(v.clone());
                        format!(
                            "{} = {}",
                            dialect.quote_identifier(col),
                            dialect.placeholder(params.len())
                        )
                    })
                    .join(" AND ");
                format!("({group})")
            })
            .join(" OR ");
        sql.push_str(&groups);
    }
}

/// `DELETE FROM <t> WHERE <keys>` for one batch of key values.
pub fn delete_batch(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    pk: &PkSpec,
    keys: &[PkValue],
) -> Statement {
    let mut sql = format!("DELETE FROM {} WHERE ", dialect.table_ref(table, schema));
    let mut params = Vec::with_capacity(keys.len() * pk.width());
    push_pk_predicate(dialect, pk, keys, &mut sql, &mut params);
    Statement { sql, params }
}

/// `UPDATE <t> SET c = ?, ... WHERE <pk> = ?` for one record. The record maps
/// column name to new value and must contain every key column; key columns go
/// to the WHERE clause, everything else to SET.
pub fn update_row(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    pk: &PkSpec,
    record: &BTreeMap<String, Value>,
) -> SyncResult<Statement> {
    let missing: Vec<&String> = pk.columns().iter().filter(|c| !record.contains_key(*c)).collect();
    if !missing.is_empty() {
        return Err(Fault::schema(format!(
            "update record is missing primary key column(s) {missing:?}"
        )));
    }

    let mut params = Vec::new();
    let assignments = record
        .iter()
        .filter(|(col, _)| !pk.contains(col))
        .map(|(col, v)| {
            params.push(v.clone());
            format!(
                "{} = {}",
                dialect.quote_identifier(col),
                dialect.placeholder(params.len())
            )
        })
        .join(", ");
    if assignments.is_empty() {
        return Err(Fault::schema("update record contains no non-key columns"));
    }

    let predicate = pk
        .columns()
        .iter()
        .map(|col| {
            params.push(record[col].clone());
            format!(
                "{} = {}",
                dialect.quote_identifier(col),
                dialect.placeholder(params.len())
            )
        })
        .join(" AND ");

    Ok(Statement {
        sql: format!(
            "UPDATE {} SET {assignments} WHERE {predicate}",
            dialect.table_ref(table, schema)
        ),
        params,
    })
}

/// `INSERT INTO <t> (cols) VALUES (...), (...)` for one batch of rows. Every
/// row must match `columns` in arity and order.
pub fn insert_batch(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    columns: &[String],
    rows: &[Vec<Value>],
) -> SyncResult<Statement> {
    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let mut groups = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != columns.len() {
            return Err(Fault::schema(format!(
                "insert row has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        let group = row
            .iter()
            .map(|v| {
                params.push(v.clone());
                dialect.placeholder(params.len())
            })
            .join(", ");
        groups.push(format!("({group})"));
    }

    let cols = columns.iter().map(|c| dialect.quote_identifier(c)).join(", ");
    Ok(Statement {
        sql: format!(
            "INSERT INTO {} ({cols}) VALUES {}",
            dialect.table_ref(table, schema),
            groups.join(", ")
        ),
        params,
    })
}

/// `SELECT <pk, cols> FROM <t> WHERE <keys>`: the cheap remote read used by
/// conflict detection, restricted to the touched columns.
pub fn select_columns_by_keys(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    pk: &PkSpec,
    columns: &[String],
    keys: &[PkValue],
) -> Statement {
    let selected = pk
        .columns()
        .iter()
        .chain(columns.iter().filter(|c| !pk.contains(c)))
        .map(|c| dialect.quote_identifier(c))
        .join(", ");
    let mut sql = format!(
        "SELECT {selected} FROM {} WHERE ",
        dialect.table_ref(table, schema)
    );
    let mut params = Vec::new();
    push_pk_predicate(dialect, pk, keys, &mut sql, &mut params);
    Statement { sql, params }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn delete_single_key_uses_in_list() {
        let pk = PkSpec::single("id");
        let stmt = delete_batch(
            Dialect::Sqlite,
            "users",
            None,
            &pk,
            &[PkValue::scalar(1), PkValue::scalar(3)],
        );
        assert_eq!(stmt.sql, "DELETE FROM \"users\" WHERE \"id\" IN (?, ?)");
        assert_eq!(stmt.params, vec![Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn delete_composite_key_ors_and_groups() {
        let pk = PkSpec::composite(["student_id", "course_id"]).unwrap();
        let stmt = delete_batch(
            Dialect::PostgreSql,
            "enrollment",
            None,
            &pk,
            &[
                PkValue::composite([Value::Int(101), "CS101".into()]),
                PkValue::composite([Value::Int(102), "CS102".into()]),
            ],
        );
        assert_eq!(
            stmt.sql,
            "DELETE FROM \"enrollment\" WHERE (\"student_id\" = $1 AND \"course_id\" = $2) \
             OR (\"student_id\" = $3 AND \"course_id\" = $4)"
        );
        assert_eq!(stmt.params.len(), 4);
    }

    #[test]
    fn update_binds_set_then_key() {
        let pk = PkSpec::single("id");
        let record: BTreeMap<String, Value> = [
            ("id".to_owned(), Value::Int(2)),
            ("age".to_owned(), Value::Int(31)),
        ]
        .into();
        let stmt = update_row(Dialect::MySql, "users", None, &pk, &record).unwrap();
        assert_eq!(stmt.sql, "UPDATE `users` SET `age` = ? WHERE `id` = ?");
        assert_eq!(stmt.params, vec![Value::Int(31), Value::Int(2)]);
    }

    #[test]
    fn update_without_key_columns_faults() {
        let pk = PkSpec::single("id");
        let record: BTreeMap<String, Value> = [("age".to_owned(), Value::Int(31))].into();
        assert!(update_row(Dialect::Sqlite, "users", None, &pk, &record).is_err());
    }

    #[test]
    fn insert_batch_numbers_postgres_placeholders() {
        let cols = vec!["id".to_owned(), "name".to_owned()];
        let stmt = insert_batch(
            Dialect::PostgreSql,
            "users",
            Some("app"),
            &cols,
            &[
                vec![Value::Int(1), "Alice".into()],
                vec![Value::Int(2), "Bob".into()],
            ],
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"app\".\"users\" (\"id\", \"name\") VALUES ($1, $2), ($3, $4)"
        );
        assert_eq!(stmt.params.len(), 4);
    }

    #[test]
    fn batch_sizes_are_deterministic() {
        assert_eq!(batch_size(DmlKind::Delete, 1), 500);
        assert_eq!(batch_size(DmlKind::Delete, 2), 499);
        assert_eq!(batch_size(DmlKind::Insert, 3), 333);
        assert_eq!(batch_size(DmlKind::Insert, 2000), 1);
        assert_eq!(batch_size(DmlKind::Update, 4), 200);
        assert_eq!(batch_size(DmlKind::Update, 10), 99);
    }

    #[test]
    fn conflict_read_selects_key_then_touched_columns() {
        let pk = PkSpec::single("id");
        let stmt = select_columns_by_keys(
            Dialect::Sqlite,
            "users",
            None,
            &pk,
            &["name".to_owned()],
            &[PkValue::scalar(1)],
        );
        assert_eq!(stmt.sql, "SELECT \"id\", \"name\" FROM \"users\" WHERE \"id\" IN (?)");
    }
}
