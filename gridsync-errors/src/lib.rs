//! The closed error taxonomy shared by every gridsync crate.
//!
//! Every fallible operation in the workspace returns [`SyncResult`], and every
//! failure is one of the five [`Fault`] variants. Each variant carries a human
//! message plus a structured details map so callers (and logs) can act on the
//! failure without parsing the message text.

use std::fmt;

use serde_json::{json, Value as Json};
use thiserror::Error;

/// Result type used throughout the workspace.
pub type SyncResult<T> = Result<T, Fault>;

/// The closed set of failures a synchronization can surface.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Fault {
    /// Local data is not pushable: PK null/duplicate/missing, an attempt to
    /// mutate a PK value, duplicate column names, or auto-increment requested
    /// on a non-qualifying key. Surfaced before any SQL runs.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        details: Json,
    },

    /// A column or key mismatch: column does not exist, column already
    /// exists, a PK column was dropped, or the PK spec disagrees with the
    /// database. Raised at validation time or while executing a schema step.
    #[error("schema error: {message}")]
    Schema {
        message: String,
        details: Json,
    },

    /// Raised only under the `Abort` conflict strategy (or by a custom
    /// resolver): both sides changed the same row since the shared baseline.
    #[error("conflict on {pk}: columns {conflicting_columns:?} changed both locally and remotely")]
    Conflict {
        table: Option<String>,
        /// Display form of the conflicting primary key value.
        pk: String,
        /// Local pending changes, column -> value.
        local: Json,
        /// Remote current values for the conflicting columns.
        remote: Json,
        conflicting_columns: Vec<String>,
        suggested_fix: String,
    },

    /// A data-step execution failure: not retryable, retries exhausted, or
    /// the wall-clock timeout elapsed. Wraps the driver message.
    #[error("transaction failed: {message}")]
    Transaction {
        message: String,
        details: Json,
    },

    /// The engine could not be reached or the health probe failed. Carries a
    /// pool-status snapshot when the driver exposes one.
    #[error("connection error: {message}")]
    Connection {
        message: String,
        pool_status: Json,
    },
}

impl Fault {
    pub fn validation(message: impl Into<String>) -> Self {
        Fault::Validation {
            message: message.into(),
            details: Json::Null,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Json) -> Self {
        Fault::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Fault::Schema {
            message: message.into(),
            details: Json::Null,
        }
    }

    pub fn schema_with(message: impl Into<String>, details: Json) -> Self {
        Fault::Schema {
            message: message.into(),
            details,
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Fault::Transaction {
            message: message.into(),
            details: Json::Null,
        }
    }

    pub fn transaction_with(message: impl Into<String>, details: Json) -> Self {
        Fault::Transaction {
            message: message.into(),
            details,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Fault::Connection {
            message: message.into(),
            pool_status: Json::Null,
        }
    }

    pub fn connection_with(message: impl Into<String>, pool_status: Json) -> Self {
        Fault::Connection {
            message: message.into(),
            pool_status,
        }
    }

    /// Wrap a driver error as a transaction fault, preserving its message and
    /// tagging the failed table.
    pub fn from_driver(table: &str, err: impl fmt::Display) -> Self {
        Fault::Transaction {
            message: err.to_string(),
            details: json!({ "table": table }),
        }
    }

    /// The structured details carried by this fault, if any.
    pub fn details(&self) -> &Json {
        match self {
            Fault::Validation { details, .. }
            | Fault::Schema { details, .. }
            | Fault::Transaction { details, .. } => details,
            Fault::Connection { pool_status, .. } => pool_status,
            Fault::Conflict { local, .. } => local,
        }
    }

    /// Whether this failure is transient and safe to retry.
    ///
    /// Connection failures and driver errors whose message indicates a
    /// dropped connection, server-side timeout, deadlock, or serialization
    /// failure are retryable. Validation, schema, and conflict faults never
    /// are: retrying them repeats the same outcome.
    pub fn is_retryable(&self) -> bool {
        match self {
            Fault::Connection { .. } => true,
            Fault::Transaction { message, .. } => {
                let msg = message.to_lowercase();
                RETRYABLE_PHRASES.iter().any(|p| msg.contains(p))
            }
            Fault::Validation { .. } | Fault::Schema { .. } | Fault::Conflict { .. } => false,
        }
    }

    /// Whether this failure is a deadlock or serialization failure. The
    /// executor adds an extra backoff before retrying these.
    pub fn is_deadlock(&self) -> bool {
        let msg = match self {
            Fault::Transaction { message, .. } => message.to_lowercase(),
            _ => return false,
        };
        DEADLOCK_PHRASES.iter().any(|p| msg.contains(p))
    }
}

/// Driver message fragments that mark an error as transient. Collected from
/// the error vocabularies of SQLite, PostgreSQL, and MySQL.
const RETRYABLE_PHRASES: &[&str] = &[
    "connection",
    "timeout",
    "timed out",
    "deadlock",
    "lock wait",
    "database is locked",
    "temporary",
    "network",
    "broken pipe",
    "could not serialize",
    "serialization failure",
];

const DEADLOCK_PHRASES: &[&str] = &[
    "deadlock detected",
    "deadlock found",
    "could not serialize access",
    "serialization failure",
];
