//! Dialect-aware SQL rendering.
//!
//! Everything that differs between SQLite, PostgreSQL, and MySQL — identifier
//! quoting, parameter placeholders, DDL syntax, capability flags — lives
//! behind [`Dialect`] so the executor never branches on database flavor
//! itself. All statements are parameterized; user values are never spliced
//! into SQL text.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use gridsync_errors::Fault;

pub mod ddl;
pub mod dml;

pub use dml::{DmlKind, Statement};

/// The SQL flavor of a target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    Sqlite,
    PostgreSql,
    MySql,
}

impl Dialect {
    /// Quote an identifier: backticks for MySQL, double quotes otherwise.
    /// Embedded quote characters are doubled.
    pub fn quote_identifier(self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Sqlite | Dialect::PostgreSql => {
                format!("\"{}\"", ident.replace('"', "\"\""))
            }
        }
    }

    /// A quoted table reference with an optional schema prefix.
    pub fn table_ref(self, table: &str, schema: Option<&str>) -> String {
        match schema {
            Some(s) if !s.is_empty() => {
                format!("{}.{}", self.quote_identifier(s), self.quote_identifier(table))
            }
            _ => self.quote_identifier(table),
        }
    }

    /// The placeholder for the `n`-th bound parameter (1-based). PostgreSQL
    /// numbers its placeholders; SQLite and MySQL use positional `?`.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::PostgreSql => format!("${n}"),
            Dialect::Sqlite | Dialect::MySql => "?".to_owned(),
        }
    }

    /// Whether `SET TRANSACTION ISOLATION LEVEL ...` may be issued inside a
    /// transaction.
    pub fn supports_isolation_level(self) -> bool {
        matches!(self, Dialect::PostgreSql | Dialect::MySql)
    }

    /// Whether DDL statements may safely share a transaction with DML. MySQL
    /// commits implicitly on DDL, so schema steps there always run alone.
    pub fn supports_transactional_ddl(self) -> bool {
        matches!(self, Dialect::PostgreSql | Dialect::Sqlite)
    }

    /// Whether concurrent write transactions from separate connections are
    /// tolerated. SQLite serializes writers, so parallel multi-table pushes
    /// are downgraded to sequential there.
    pub fn supports_concurrent_writes(self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Sqlite => "sqlite",
            Dialect::PostgreSql => "postgresql",
            Dialect::MySql => "mysql",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Dialect {
    type Err = Fault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgresql" | "postgres" => Ok(Dialect::PostgreSql),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            other => Err(Fault::connection(format!("unknown dialect '{other}'"))),
        }
    }
}
