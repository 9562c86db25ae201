//! Predicate DSL for filtering, ordering and limiting collection queries.
//!
//! A query is described by an ordered list of [`Predicate`] values. Order is
//! significant: filters are applied to the backend query in exactly the order
//! they appear in the list, matching the composition rules of the backend's
//! own query API.
//!
//! Filter operands are [`FieldValue`], a closed set of the types the backend
//! query layer accepts. There is deliberately no "any JSON value" escape
//! hatch.
//!
//! # Example
//!
//! ```rust
//! use doclink::Predicate;
//!
//! let predicates = vec![
//!     Predicate::equals("type", "Indian"),
//!     Predicate::order_by("name", false),
//!     Predicate::limit(5),
//! ];
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// A filter operand value.
///
/// Closed variant set: strings, integers, doubles, booleans, timestamps
/// (milliseconds since the Unix epoch) and homogeneous-or-mixed lists of
/// these. Converts losslessly into a JSON value for query evaluation and
/// wire transport (timestamps become plain numbers).
///
/// Serialization is untagged, so a `Timestamp` read back from JSON comes
/// back as `Int`. The JSON representation and all comparison semantics are
/// identical either way; only the variant identity differs after a
/// round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// UTF-8 string.
    String(String),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    /// List of field values.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Construct a timestamp operand from epoch milliseconds.
    pub fn timestamp_millis(millis: i64) -> Self {
        FieldValue::Timestamp(millis)
    }

    /// Convert into the JSON representation used on the wire and by query
    /// evaluation. Timestamps serialize as numbers.
    pub fn into_json(self) -> JsonValue {
        match self {
            FieldValue::String(s) => JsonValue::String(s),
            FieldValue::Int(n) => JsonValue::from(n),
            FieldValue::Double(d) => {
                serde_json::Number::from_f64(d).map(JsonValue::Number).unwrap_or(JsonValue::Null)
            },
            FieldValue::Bool(b) => JsonValue::Bool(b),
            FieldValue::Timestamp(ms) => JsonValue::from(ms),
            FieldValue::List(items) => {
                JsonValue::Array(items.into_iter().map(FieldValue::into_json).collect())
            },
        }
    }

    /// Borrowing variant of [`into_json`](Self::into_json).
    pub fn to_json(&self) -> JsonValue {
        self.clone().into_json()
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        FieldValue::Int(n as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(d: f64) -> Self {
        FieldValue::Double(d)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl<V: Into<FieldValue>> From<Vec<V>> for FieldValue {
    fn from(items: Vec<V>) -> Self {
        FieldValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// Opaque identifier for a backend collection.
///
/// The library does not interpret the path beyond passing it to the backend;
/// building paths (e.g. `restaurant/{id}/menu`) is the caller's concern,
/// typically via a small path factory next to the domain models.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Wrap a backend collection path.
    pub fn new(path: impl Into<String>) -> Self {
        CollectionPath(path.into())
    }

    /// The raw path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the path is empty (rejected by client-side validation).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionPath {
    fn from(s: &str) -> Self {
        CollectionPath::new(s)
    }
}

impl From<String> for CollectionPath {
    fn from(s: String) -> Self {
        CollectionPath::new(s)
    }
}

/// One filter, ordering or limit clause.
///
/// Immutable value type. A list of predicates describes a complete query; see
/// [`compile`](crate::query::compile) for how the list is folded onto a
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// `field == value`
    Equals { field: String, value: FieldValue },
    /// `field != value`
    NotEquals { field: String, value: FieldValue },
    /// `field` is one of `values`
    In { field: String, values: Vec<FieldValue> },
    /// `field` is none of `values`
    NotIn { field: String, values: Vec<FieldValue> },
    /// array field contains `value`
    ArrayContains { field: String, value: FieldValue },
    /// array field contains at least one of `values`
    ArrayContainsAny { field: String, values: Vec<FieldValue> },
    /// `field < value`
    LessThan { field: String, value: FieldValue },
    /// `field > value`
    GreaterThan { field: String, value: FieldValue },
    /// `field <= value`
    LessThanOrEqual { field: String, value: FieldValue },
    /// `field >= value`
    GreaterThanOrEqual { field: String, value: FieldValue },
    /// Sort by `field`, ascending unless `descending` is set.
    OrderBy { field: String, descending: bool },
    /// Return at most the first `count` results.
    Limit { count: u32 },
    /// Return at most the last `count` results of the ordered set.
    LimitToLast { count: u32 },
}

impl Predicate {
    /// `field == value`
    pub fn equals(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Equals { field: field.into(), value: value.into() }
    }

    /// `field != value`
    pub fn not_equals(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::NotEquals { field: field.into(), value: value.into() }
    }

    /// `field` is one of `values`
    pub fn is_in<V: Into<FieldValue>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Predicate::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `field` is none of `values`
    pub fn is_not_in<V: Into<FieldValue>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Predicate::NotIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// array field contains `value`
    pub fn array_contains(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::ArrayContains { field: field.into(), value: value.into() }
    }

    /// array field contains at least one of `values`
    pub fn array_contains_any<V: Into<FieldValue>>(
        field: impl Into<String>,
        values: Vec<V>,
    ) -> Self {
        Predicate::ArrayContainsAny {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `field < value`
    pub fn less_than(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::LessThan { field: field.into(), value: value.into() }
    }

    /// `field > value`
    pub fn greater_than(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::GreaterThan { field: field.into(), value: value.into() }
    }

    /// `field <= value`
    pub fn less_than_or_equal(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::LessThanOrEqual { field: field.into(), value: value.into() }
    }

    /// `field >= value`
    pub fn greater_than_or_equal(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::GreaterThanOrEqual { field: field.into(), value: value.into() }
    }

    /// Sort by `field`. `descending = false` sorts ascending.
    pub fn order_by(field: impl Into<String>, descending: bool) -> Self {
        Predicate::OrderBy { field: field.into(), descending }
    }

    /// Return at most the first `count` results.
    pub fn limit(count: u32) -> Self {
        Predicate::Limit { count }
    }

    /// Return at most the last `count` results of the ordered set.
    pub fn limit_to_last(count: u32) -> Self {
        Predicate::LimitToLast { count }
    }
}
