//! Change tracking and push planning.
//!
//! [`ChangeTracker`] watches a tabular value against a baseline snapshot and
//! derives the minimal row- and schema-level differences. [`ExecutionPlan`]
//! turns those differences into an ordered sequence of SQL steps, and
//! [`conflict`] revises pending updates against concurrent remote writes.

pub mod conflict;
pub mod plan;
pub mod tracker;

pub use conflict::{detect_conflicts, resolve_conflicts, Conflict, ConflictStrategy};
pub use plan::{ExecutionPlan, PlanStep, SchemaChange, StepKind, StepPayload};
pub use tracker::{ChangeSummary, ChangeTracker, RowChange, RowState, RowStatus, TrackingMode};
