//! Column values bound into statements or compared in memory.
//!
//! [`Value`] is the common currency between an entity and a storage
//! engine: entities describe their columns as values, the `PostgreSQL`
//! engine binds them as statement parameters, and the in-memory engine
//! compares them when evaluating a [`crate::Filter`].

use core::cmp::Ordering;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::EntityId;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// `BOOLEAN`.
    Bool(bool),
    /// `INTEGER`.
    Int(i32),
    /// `BIGINT`.
    BigInt(i64),
    /// `DOUBLE PRECISION`.
    Double(f64),
    /// `TEXT` / `VARCHAR`.
    Text(String),
    /// `NUMERIC`.
    Decimal(Decimal),
    /// `TIMESTAMPTZ`.
    Timestamp(DateTime<Utc>),
    /// `UUID`.
    Uuid(Uuid),
}

impl Value {
    /// Whether this is SQL `NULL`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name used in error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Decimal(_) => "decimal",
            Self::Timestamp(_) => "timestamp",
            Self::Uuid(_) => "uuid",
        }
    }

    /// Borrow the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Order two values the way SQL would.
    ///
    /// Returns `None` when either side is `NULL` or the types are not
    /// comparable. Integer, floating point and decimal values compare
    /// across widths.
    #[allow(clippy::cast_precision_loss)]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Uuid(a), Self::Uuid(b)) => Some(a.cmp(b)),
            (Self::Decimal(a), Self::Decimal(b)) => Some(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Double(a), _) => other.as_f64().and_then(|b| a.partial_cmp(&b)),
            (_, Self::Double(b)) => self.as_f64().and_then(|a| a.partial_cmp(b)),
            (Self::Decimal(a), _) => other.as_i64().map(|b| a.cmp(&Decimal::from(b))),
            (_, Self::Decimal(b)) => self.as_i64().map(|a| Decimal::from(a).cmp(b)),
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => None,
            },
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(f64::from(*v)),
            Self::BigInt(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Decimal(v) => v.to_f64(),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Self::BigInt(id.into_inner())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_never_compares() {
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert_eq!(Value::Int(1).compare(&Value::Null), None);
    }

    #[test]
    fn integers_compare_across_widths() {
        assert_eq!(Value::Int(3).compare(&Value::BigInt(3)), Some(Ordering::Equal));
        assert_eq!(Value::BigInt(2).compare(&Value::Int(5)), Some(Ordering::Less));
        assert_eq!(
            Value::Decimal(Decimal::new(25, 1)).compare(&Value::Int(2)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Double(1.5).compare(&Value::BigInt(1)), Some(Ordering::Greater));
    }

    #[test]
    fn mismatched_types_are_incomparable() {
        assert_eq!(Value::from("1").compare(&Value::Int(1)), None);
        assert_eq!(Value::Bool(true).compare(&Value::Int(1)), None);
    }

    #[test]
    fn option_maps_none_to_null() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_owned()));
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(Value::from("abc")).ok();
        assert_eq!(
            json,
            Some(serde_json::json!({ "type": "text", "value": "abc" }))
        );
    }
}
