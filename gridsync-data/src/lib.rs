//! In-memory tabular data for gridsync: the [`Value`] scalar variant, the
//! abstract [`DataType`] set that bridges in-memory and SQL column types, the
//! [`Frame`] row-set container, and primary-key utilities.
//!
//! The database side of the type bridge (rendering a [`DataType`] as a
//! dialect-specific SQL type) lives in `gridsync-sql`; this crate owns the
//! in-memory side and the scalar coercions.

pub mod frame;
pub mod kind;
pub mod pk;
pub mod value;

pub use frame::{Column, Frame, Schema};
pub use kind::DataType;
pub use pk::{PkSpec, PkValue};
pub use value::Value;
