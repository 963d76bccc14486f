//! The scalar value variant stored in every [`Frame`](crate::Frame) cell and
//! bound to every SQL parameter.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, SecondsFormat, Utc};
use postgres_types::{to_sql_checked, IsNull, ToSql, Type};
use serde::{Deserialize, Serialize};

use crate::kind::DataType;

/// A single cell value.
///
/// The variant set is deliberately small: integers are always `i64`, floats
/// always `f64`, and timestamps always UTC. Engines widen or narrow at the
/// driver boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    TimestampTz(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The abstract type of this value, or `None` for nulls.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(DataType::Int),
            Value::Float(_) => Some(DataType::Float),
            Value::Bool(_) => Some(DataType::Bool),
            Value::Text(_) => Some(DataType::Text),
            Value::TimestampTz(_) => Some(DataType::Timestamp),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce this value toward `target`, used when rehydrating rows from
    /// drivers that return everything as text (SQLite in particular) and when
    /// a column's declared type changes.
    ///
    /// Nulls stay null. A value that cannot be represented in the target type
    /// falls back to its textual form rather than erroring: the database is
    /// the final authority on whether the bind is acceptable.
    pub fn coerce_to(&self, target: DataType) -> Value {
        match (self, target) {
            (Value::Null, _) => Value::Null,
            (Value::Int(i), DataType::Int) => Value::Int(*i),
            (Value::Int(i), DataType::Float) => Value::Float(*i as f64),
            (Value::Int(i), DataType::Bool) => Value::Bool(*i != 0),
            (Value::Float(f), DataType::Float) => Value::Float(*f),
            (Value::Float(f), DataType::Int) if f.fract() == 0.0 => Value::Int(*f as i64),
            (Value::Bool(b), DataType::Bool) => Value::Bool(*b),
            (Value::Bool(b), DataType::Int) => Value::Int(i64::from(*b)),
            (Value::Text(s), DataType::Int) => match s.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Text(s.clone()),
            },
            (Value::Text(s), DataType::Float) => match s.parse::<f64>() {
                Ok(f) => Value::Float(f),
                Err(_) => Value::Text(s.clone()),
            },
            (Value::Text(s), DataType::Bool) => match s.as_str() {
                "1" | "true" | "TRUE" | "t" => Value::Bool(true),
                "0" | "false" | "FALSE" | "f" => Value::Bool(false),
                _ => Value::Text(s.clone()),
            },
            (Value::Text(s), DataType::Timestamp) => match DateTime::parse_from_rfc3339(s) {
                Ok(dt) => Value::TimestampTz(dt.with_timezone(&Utc)),
                Err(_) => Value::Text(s.clone()),
            },
            (Value::TimestampTz(ts), DataType::Timestamp) => Value::TimestampTz(*ts),
            (v, DataType::Text) => Value::Text(v.to_string()),
            (v, _) => v.clone(),
        }
    }
}

/// Equality respects NaN-equals-NaN so that a pulled NaN does not register as
/// a change against a local NaN. Variants never compare equal across types;
/// a type mismatch counts as "different", which is what the change tracker
/// wants.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                (a.is_nan() && b.is_nan()) || a == b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::TimestampTz(a), Value::TimestampTz(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Int(i) => i.hash(state),
            // All NaNs hash alike so Hash stays consistent with Eq.
            Value::Float(f) => {
                let bits = if f.is_nan() { f64::NAN.to_bits() } else { f.to_bits() };
                bits.hash(state);
            }
            Value::Bool(b) => b.hash(state),
            Value::Text(s) => s.hash(state),
            Value::TimestampTz(ts) => ts.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::TimestampTz(ts) => {
                write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::TimestampTz(ts)
    }
}

impl<T> From<Option<T>> for Value
where
    Value: From<T>,
{
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => Value::from(v),
            None => Value::Null,
        }
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Int(i) => {
                if *ty == Type::INT2 {
                    (*i as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*i as i32).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*i as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (*i != 0).to_sql(ty, out)
                } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
                    i.to_string().to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            Value::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
                    f.to_string().to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            Value::Bool(b) => {
                if *ty == Type::INT2 {
                    i16::from(*b).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::from(*b).to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    i64::from(*b).to_sql(ty, out)
                } else {
                    b.to_sql(ty, out)
                }
            }
            Value::Text(s) => s.to_sql(ty, out),
            Value::TimestampTz(ts) => {
                if *ty == Type::TEXT || *ty == Type::VARCHAR {
                    ts.to_rfc3339_opts(SecondsFormat::Micros, true).to_sql(ty, out)
                } else if *ty == Type::TIMESTAMP {
                    ts.naive_utc().to_sql(ty, out)
                } else {
                    ts.to_sql(ty, out)
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // The variant decides at bind time; unsupported combinations surface
        // as driver errors with the column name attached.
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use chrono::TimeZone;

    use super::*;

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn nan_equals_nan() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(hash_of(&Value::Float(f64::NAN)), hash_of(&Value::Float(f64::NAN)));
    }

    #[test]
    fn cross_type_values_differ() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Text("1".into()));
        assert_ne!(Value::Null, Value::Int(0));
    }

    #[test]
    fn text_coerces_to_numeric_kinds() {
        assert_eq!(Value::Text("42".into()).coerce_to(DataType::Int), Value::Int(42));
        assert_eq!(
            Value::Text("2.5".into()).coerce_to(DataType::Float),
            Value::Float(2.5)
        );
        assert_eq!(
            Value::Text("not a number".into()).coerce_to(DataType::Int),
            Value::Text("not a number".into())
        );
    }

    #[test]
    fn timestamp_round_trips_through_text() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).unwrap();
        let as_text = Value::TimestampTz(ts).coerce_to(DataType::Text);
        assert_eq!(as_text.coerce_to(DataType::Timestamp), Value::TimestampTz(ts));
    }

    #[test]
    fn null_coerces_to_null() {
        assert_eq!(Value::Null.coerce_to(DataType::Int), Value::Null);
        assert_eq!(Value::Null.coerce_to(DataType::Text), Value::Null);
    }
}
