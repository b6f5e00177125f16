//! Typed column values and the equality rules used when comparing rows.
//!
//! Reference and target drivers may surface the "same" value as different
//! native types (an `INT` on one side, a `NUMERIC(10,0)` on the other, a
//! `DATE` against a `TIMESTAMP` at midnight). [`value_equals`] compares across
//! those representations instead of requiring identical variants.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single column value as read from a database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one
    fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int(v) => Some(Decimal::from(*v)),
            Value::Decimal(v) => Some(*v),
            Value::Float(v) => Decimal::from_f64(*v),
            Value::Bool(v) => Some(Decimal::from(*v as i64)),
            Value::Text(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }

    fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v.normalize()),
            Value::Text(v) => write!(f, "{}", v),
            Value::Bytes(v) => {
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
            Value::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Uuid(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn float_equals(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    // Values that went through a float column rarely survive exactly
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= scale * 1e-12
}

/// Value-equality: NULL equals NULL, numbers compare by magnitude regardless
/// of representation, dates compare against timestamps at midnight and text
/// is compared exactly.
pub fn value_equals(left: &Value, right: &Value) -> bool {
    use Value::*;

    match (left, right) {
        (Null, Null) => true,
        (Null, _) | (_, Null) => false,
        (Text(a), Text(b)) => a == b,
        (Bytes(a), Bytes(b)) => a == b,
        (Bool(a), Bool(b)) => a == b,
        (Int(a), Int(b)) => a == b,
        (Float(a), Float(b)) => float_equals(*a, *b),
        (Float(a), other) | (other, Float(a)) => match other.as_decimal().and_then(|d| d.to_f64()) {
            Some(b) => float_equals(*a, b),
            None => false,
        },
        (Uuid(a), Uuid(b)) => a == b,
        (Uuid(a), Text(b)) | (Text(b), Uuid(a)) => uuid::Uuid::parse_str(b.trim())
            .map(|b| &b == a)
            .unwrap_or(false),
        (Time(a), Time(b)) => a == b,
        (Time(a), Text(b)) | (Text(b), Time(a)) => NaiveTime::parse_from_str(b.trim(), "%H:%M:%S%.f")
            .map(|b| &b == a)
            .unwrap_or(false),
        (Date(_) | Timestamp(_), _) | (_, Date(_) | Timestamp(_)) => {
            match (left.as_timestamp(), right.as_timestamp()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => match (left.as_decimal(), right.as_decimal()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// Key-equality: like [`value_equals`] except that NULL never matches
pub fn key_equals(left: &Value, right: &Value) -> bool {
    !left.is_null() && !right.is_null() && value_equals(left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_null_semantics() {
        assert!(value_equals(&Value::Null, &Value::Null));
        assert!(!key_equals(&Value::Null, &Value::Null));
        assert!(!value_equals(&Value::Null, &Value::Int(0)));
        assert!(!value_equals(&Value::Text(String::new()), &Value::Null));
    }

    #[test]
    fn test_cross_type_numbers() {
        assert!(value_equals(&Value::Int(1), &Value::Decimal(dec("1.00"))));
        assert!(value_equals(&Value::Decimal(dec("42")), &Value::Int(42)));
        assert!(value_equals(&Value::Float(2.5), &Value::Decimal(dec("2.50"))));
        assert!(value_equals(&Value::Int(7), &Value::Text("7".into())));
        assert!(value_equals(&Value::Bool(true), &Value::Int(1)));
        assert!(!value_equals(&Value::Int(1), &Value::Int(2)));
        assert!(!value_equals(&Value::Int(1), &Value::Text("one".into())));
    }

    #[test]
    fn test_dates() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let midnight = date.and_hms_opt(0, 0, 0).unwrap();
        assert!(value_equals(&Value::Date(date), &Value::Timestamp(midnight)));
        assert!(value_equals(&Value::Date(date), &Value::Text("2024-03-01".into())));
        let noon = date.and_hms_opt(12, 0, 0).unwrap();
        assert!(!value_equals(&Value::Date(date), &Value::Timestamp(noon)));
    }

    #[test]
    fn test_text_is_exact() {
        assert!(!value_equals(&Value::Text("Arthur".into()), &Value::Text("arthur".into())));
        assert!(!value_equals(&Value::Text("a ".into()), &Value::Text("a".into())));
    }

    #[test]
    fn test_uuid_against_text() {
        let id = Uuid::new_v4();
        assert!(value_equals(&Value::Uuid(id), &Value::Text(id.to_string())));
    }
}
