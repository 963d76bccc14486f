//! DDL rendering: column add/drop/rename/retype and table creation.
//!
//! This is where dialect divergence concentrates. MySQL renames re-state the
//! column type (`CHANGE COLUMN`), SQLite cannot retype a column at all (its
//! columns are dynamically typed, so a retype is a rendering no-op), and
//! composite primary keys are created through a named table constraint.

use itertools::Itertools;

use gridsync_data::{DataType, PkSpec, Schema};
use gridsync_errors::{Fault, SyncResult};

use crate::Dialect;

/// The SQL type a [`DataType`] renders as, per dialect.
pub fn sql_type(dialect: Dialect, ty: DataType) -> &'static str {
    match (dialect, ty) {
        (Dialect::Sqlite, DataType::Int) => "INTEGER",
        (Dialect::Sqlite, DataType::Float) => "REAL",
        (Dialect::Sqlite, DataType::Bool) => "BOOLEAN",
        (Dialect::Sqlite, DataType::Text) => "TEXT",
        (Dialect::Sqlite, DataType::Timestamp) => "TIMESTAMP",

        (Dialect::PostgreSql, DataType::Int) => "BIGINT",
        (Dialect::PostgreSql, DataType::Float) => "DOUBLE PRECISION",
        (Dialect::PostgreSql, DataType::Bool) => "BOOLEAN",
        (Dialect::PostgreSql, DataType::Text) => "TEXT",
        (Dialect::PostgreSql, DataType::Timestamp) => "TIMESTAMPTZ",

        (Dialect::MySql, DataType::Int) => "BIGINT",
        (Dialect::MySql, DataType::Float) => "DOUBLE",
        (Dialect::MySql, DataType::Bool) => "BOOLEAN",
        // MySQL cannot index a bare TEXT column, and key columns must be
        // indexable, so text renders with an explicit length.
        (Dialect::MySql, DataType::Text) => "VARCHAR(255)",
        (Dialect::MySql, DataType::Timestamp) => "DATETIME(6)",
    }
}

pub fn add_column(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    column: &str,
    ty: DataType,
) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        dialect.table_ref(table, schema),
        dialect.quote_identifier(column),
        sql_type(dialect, ty)
    )
}

pub fn drop_column(dialect: Dialect, table: &str, schema: Option<&str>, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        dialect.table_ref(table, schema),
        dialect.quote_identifier(column)
    )
}

/// Render a column rename.
///
/// MySQL's `CHANGE COLUMN` re-states the column type, which the caller must
/// have introspected first; passing `None` there is an error. Other dialects
/// ignore `current_type`.
pub fn rename_column(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    old: &str,
    new: &str,
    current_type: Option<&str>,
) -> SyncResult<String> {
    match dialect {
        Dialect::MySql => {
            let ty = current_type.ok_or_else(|| {
                Fault::schema(format!(
                    "renaming '{old}' on mysql requires the current column type"
                ))
            })?;
            Ok(format!(
                "ALTER TABLE {} CHANGE COLUMN {} {} {ty}",
                dialect.table_ref(table, schema),
                dialect.quote_identifier(old),
                dialect.quote_identifier(new)
            ))
        }
        Dialect::Sqlite | Dialect::PostgreSql => Ok(format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            dialect.table_ref(table, schema),
            dialect.quote_identifier(old),
            dialect.quote_identifier(new)
        )),
    }
}

/// Render a column type change, or `None` when the dialect has nothing to do
/// (SQLite columns are dynamically typed).
pub fn change_column_type(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    column: &str,
    ty: DataType,
) -> Option<String> {
    let target = sql_type(dialect, ty);
    match dialect {
        Dialect::Sqlite => None,
        Dialect::PostgreSql => {
            let col = dialect.quote_identifier(column);
            Some(format!(
                "ALTER TABLE {} ALTER COLUMN {col} TYPE {target} USING {col}::{target}",
                dialect.table_ref(table, schema)
            ))
        }
        Dialect::MySql => Some(format!(
            "ALTER TABLE {} MODIFY COLUMN {} {target}",
            dialect.table_ref(table, schema),
            dialect.quote_identifier(column)
        )),
    }
}

/// `CREATE TABLE` with the primary-key constraint baked in. Single-column
/// keys render inline; composite keys render a named constraint
/// (`<table>_pk`) listing the key columns in spec order.
pub fn create_table(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    frame_schema: &Schema,
    pk: &PkSpec,
) -> String {
    let mut defs: Vec<String> = frame_schema
        .columns()
        .iter()
        .map(|c| {
            let mut def = format!(
                "{} {}",
                dialect.quote_identifier(&c.name),
                sql_type(dialect, c.ty)
            );
            if !pk.is_composite() && pk.contains(&c.name) {
                def.push_str(" PRIMARY KEY");
            } else if pk.contains(&c.name) {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();

    if pk.is_composite() {
        let cols = pk.columns().iter().map(|c| dialect.quote_identifier(c)).join(", ");
        defs.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({cols})",
            dialect.quote_identifier(&format!("{table}_pk"))
        ));
    }

    format!(
        "CREATE TABLE {} ({})",
        dialect.table_ref(table, schema),
        defs.join(", ")
    )
}

pub fn drop_table(dialect: Dialect, table: &str, schema: Option<&str>) -> String {
    format!("DROP TABLE IF EXISTS {}", dialect.table_ref(table, schema))
}
