//! The abstract column-type set bridging in-memory values and SQL types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Abstract column type.
///
/// Every in-memory column and every introspected SQL column maps onto this
/// set; dialect-specific renderings live in `gridsync-sql`. Types we cannot
/// classify default to [`DataType::Text`], which every dialect can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Float,
    Bool,
    Text,
    Timestamp,
}

impl DataType {
    /// Classify a raw SQL type string as reported by driver introspection.
    ///
    /// Matches loosely on purpose: `INTEGER`, `BIGINT`, `int(11)`,
    /// `TINYINT(1)` (MySQL's boolean), `DOUBLE PRECISION`, `NUMERIC(10,2)`,
    /// `VARCHAR(255)`, `timestamp with time zone`, and friends all classify.
    pub fn from_sql_type(raw: &str) -> DataType {
        let ty = raw.trim().to_ascii_lowercase();

        if ty.starts_with("tinyint(1)") || ty.starts_with("bool") {
            return DataType::Bool;
        }
        if ty.contains("int") || ty == "serial" || ty == "bigserial" {
            return DataType::Int;
        }
        if ty.contains("float")
            || ty.contains("double")
            || ty.contains("real")
            || ty.contains("numeric")
            || ty.contains("decimal")
        {
            return DataType::Float;
        }
        if ty.contains("timestamp") || ty.contains("datetime") || ty == "date" {
            return DataType::Timestamp;
        }
        DataType::Text
    }

    /// Infer a column type from its values, used when planning an ADD COLUMN
    /// for a column that exists only in memory. Nulls are skipped; an
    /// all-null or empty column infers as text.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> DataType {
        let mut inferred = None;
        for v in values {
            let Some(ty) = v.data_type() else { continue };
            inferred = match (inferred, ty) {
                (None, ty) => Some(ty),
                (Some(a), b) if a == b => Some(a),
                // Mixed ints and floats widen to float.
                (Some(DataType::Int), DataType::Float) | (Some(DataType::Float), DataType::Int) => {
                    Some(DataType::Float)
                }
                // Any other mix degrades to text.
                (Some(_), _) => return DataType::Text,
            };
        }
        inferred.unwrap_or(DataType::Text)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Bool => "bool",
            DataType::Text => "text",
            DataType::Timestamp => "timestamp",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_sql_types() {
        assert_eq!(DataType::from_sql_type("INTEGER"), DataType::Int);
        assert_eq!(DataType::from_sql_type("bigint"), DataType::Int);
        assert_eq!(DataType::from_sql_type("int(11)"), DataType::Int);
        assert_eq!(DataType::from_sql_type("TINYINT(1)"), DataType::Bool);
        assert_eq!(DataType::from_sql_type("DOUBLE PRECISION"), DataType::Float);
        assert_eq!(DataType::from_sql_type("NUMERIC(10,2)"), DataType::Float);
        assert_eq!(DataType::from_sql_type("VARCHAR(255)"), DataType::Text);
        assert_eq!(DataType::from_sql_type("timestamp with time zone"), DataType::Timestamp);
        assert_eq!(DataType::from_sql_type("DATETIME"), DataType::Timestamp);
    }

    #[test]
    fn unknown_types_default_to_text() {
        assert_eq!(DataType::from_sql_type("tsvector"), DataType::Text);
        assert_eq!(DataType::from_sql_type(""), DataType::Text);
    }

    #[test]
    fn inference_widens_and_degrades() {
        let ints = [Value::Int(1), Value::Null, Value::Int(2)];
        assert_eq!(DataType::infer(&ints), DataType::Int);

        let mixed_numeric = [Value::Int(1), Value::Float(2.5)];
        assert_eq!(DataType::infer(&mixed_numeric), DataType::Float);

        let mixed = [Value::Int(1), Value::Text("x".into())];
        assert_eq!(DataType::infer(&mixed), DataType::Text);

        let empty: [Value; 0] = [];
        assert_eq!(DataType::infer(&empty), DataType::Text);
    }
}
