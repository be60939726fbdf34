use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;

/// An in-flight message: insertion-ordered mapping from field name to its
/// decoded value. Group occurrences nest further maps.
pub type FieldMap = IndexMap<String, FieldValue>;

/// Runtime value of a field, shaped by the field's declared semantic type.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Decimal(Decimal),
    Float(f64),
    Str(String),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    TimeOfDay(NaiveTime),
    StringList(Vec<String>),
    Group(Vec<FieldMap>),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::DateTime(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&[FieldMap]> {
        match self {
            FieldValue::Group(occurrences) => Some(occurrences),
            _ => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> FieldValue {
        FieldValue::Int(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> FieldValue {
        FieldValue::Int(value as i64)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> FieldValue {
        FieldValue::Str(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> FieldValue {
        FieldValue::Str(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> FieldValue {
        FieldValue::Bool(value)
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> FieldValue {
        FieldValue::Decimal(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> FieldValue {
        FieldValue::DateTime(value)
    }
}

impl From<Vec<FieldMap>> for FieldValue {
    fn from(occurrences: Vec<FieldMap>) -> FieldValue {
        FieldValue::Group(occurrences)
    }
}
