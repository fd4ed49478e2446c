//! Value: the in-memory graph that flows through the serializer.
//!
//! Containers are reference counted so that the same allocation can appear at
//! several places in a graph. The serializer uses that identity to encode a
//! shared container once. Cycles are expressed with [`Value::Ref`], a pointer
//! to an ancestor path.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::path::Path;

/// A value as held by a query or mutation cache.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(BigIntValue),
    String(String),
    Date(DateTime<Utc>),
    RegExp(RegExpValue),
    Error(ErrorValue),
    Array(Arc<Vec<Value>>),
    Object(Arc<BTreeMap<String, Value>>),
    Map(Arc<Vec<(Value, Value)>>),
    Set(Arc<Vec<Value>>),
    /// Back-reference to an ancestor container.
    Ref(Path),
    /// Marker left where a non-serializable value used to be.
    Placeholder(String),
    /// A host value with no serializable form (function, symbol, live handle).
    ///
    /// The string names what it was. It encodes as a [`Value::Placeholder`].
    Unsupported(String),
}

/// An arbitrary-precision integer, kept as its canonical decimal form.
///
/// Canonical means no leading zeros, no `+` sign and no `-0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BigIntValue(String);

impl BigIntValue {
    /// Parse a decimal integer with an optional leading `-`.
    pub fn parse(s: &str) -> Option<Self> {
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let trimmed = digits.trim_start_matches('0');
        if trimmed.is_empty() {
            return Some(Self("0".to_string()));
        }
        Some(Self(if negative {
            format!("-{}", trimmed)
        } else {
            trimmed.to_string()
        }))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The value as `i128`, if it fits.
    pub fn to_i128(&self) -> Option<i128> {
        self.0.parse().ok()
    }
}

impl From<i128> for BigIntValue {
    fn from(n: i128) -> Self {
        Self(n.to_string())
    }
}

impl From<i64> for BigIntValue {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl fmt::Display for BigIntValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A regular expression literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegExpValue {
    pub source: String,
    pub flags: String,
}

/// An error object. Only the name, message and stack survive transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl Value {
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(Arc::new(items.into_iter().collect()))
    }

    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Value::Map(Arc::new(entries.into_iter().collect()))
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Set(Arc::new(items.into_iter().collect()))
    }

    pub fn regexp(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Value::RegExp(RegExpValue {
            source: source.into(),
            flags: flags.into(),
        })
    }

    pub fn date_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(Value::Date)
    }

    /// An empty object.
    pub fn empty_object() -> Self {
        Value::Object(Arc::new(BTreeMap::new()))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Non-negative integral numbers as `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 => Some(*n as u64),
            Value::BigInt(i) => i.to_i128().and_then(|n| u64::try_from(n).ok()),
            _ => None,
        }
    }

    /// Integral numbers as `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i64),
            Value::BigInt(i) => i.to_i128().and_then(|n| i64::try_from(n).ok()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up an object member.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Short type name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::RegExp(_) => "regexp",
            Value::Error(_) => "error",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Ref(_) => "reference",
            Value::Placeholder(_) => "placeholder",
            Value::Unsupported(_) => "unsupported",
        }
    }

    /// Identity of the underlying container allocation, if any.
    pub(crate) fn container_ptr(&self) -> Option<*const ()> {
        match self {
            Value::Array(items) => Some(Arc::as_ptr(items) as *const ()),
            Value::Object(map) => Some(Arc::as_ptr(map) as *const ()),
            Value::Map(entries) => Some(Arc::as_ptr(entries) as *const ()),
            Value::Set(items) => Some(Arc::as_ptr(items) as *const ()),
            _ => None,
        }
    }

    /// Follow `path` from this value.
    pub fn at(&self, path: &Path) -> Option<&Value> {
        let mut current = self;
        let mut segments = path.segments().iter();
        while let Some(segment) = segments.next() {
            current = match current {
                Value::Array(items) | Value::Set(items) => items.get(segment.parse::<usize>().ok()?)?,
                Value::Object(map) => map.get(segment)?,
                Value::Map(entries) => {
                    let entry = entries.get(segment.parse::<usize>().ok()?)?;
                    match segments.next()?.as_str() {
                        "0" => &entry.0,
                        "1" => &entry.1,
                        _ => return None,
                    }
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Mutable access along `path`, copying shared containers on the way.
    pub(crate) fn at_mut(&mut self, path: &Path) -> Option<&mut Value> {
        let mut current = self;
        let mut segments = path.segments().iter();
        while let Some(segment) = segments.next() {
            current = match current {
                Value::Array(items) | Value::Set(items) => {
                    Arc::make_mut(items).get_mut(segment.parse::<usize>().ok()?)?
                }
                Value::Object(map) => Arc::make_mut(map).get_mut(segment)?,
                Value::Map(entries) => {
                    let entry = Arc::make_mut(entries).get_mut(segment.parse::<usize>().ok()?)?;
                    match segments.next()?.as_str() {
                        "0" => &mut entry.0,
                        "1" => &mut entry.1,
                        _ => return None,
                    }
                }
                _ => return None,
            };
        }
        Some(current)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::RegExp(a), Value::RegExp(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            (Value::Placeholder(a), Value::Placeholder(b)) => a == b,
            (Value::Unsupported(a), Value::Unsupported(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<ErrorValue> for Value {
    fn from(e: ErrorValue) -> Self {
        Value::Error(e)
    }
}

impl From<serde_json::Value> for Value {
    /// Plain JSON maps one-to-one onto the JSON subset of [`Value`].
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::array(items.into_iter().map(Value::from)),
            serde_json::Value::Object(map) => {
                Value::object(map.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}
