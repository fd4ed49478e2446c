//! Query keys and their stable hash.
//!
//! The hash is the key rendered as stable JSON: object members sorted by
//! name, array order kept. Two keys that are deep-equal after that
//! normalization hash identically, regardless of object insertion order.

use std::fmt;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// An ordered key identifying a query or mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryKey(pub Vec<Value>);

impl QueryKey {
    pub fn new(segments: impl IntoIterator<Item = Value>) -> Self {
        Self(segments.into_iter().collect())
    }

    pub fn segments(&self) -> &[Value] {
        &self.0
    }

    /// The first segment, if it is a string.
    pub fn head(&self) -> Option<&str> {
        self.0.first().and_then(Value::as_str)
    }

    pub fn hash(&self) -> QueryHash {
        hash_query_key(self)
    }

    pub fn to_value(&self) -> Value {
        Value::array(self.0.iter().cloned())
    }
}

impl<const N: usize> From<[&str; N]> for QueryKey {
    fn from(segments: [&str; N]) -> Self {
        Self(segments.iter().map(|s| Value::from(*s)).collect())
    }
}

/// Canonical hash of a query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHash(pub String);

impl QueryHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Hash a query key.
pub fn hash_query_key(key: &QueryKey) -> QueryHash {
    let mut out = String::new();
    write_array(&mut out, &key.0);
    QueryHash(out)
}

fn write_array(out: &mut String, items: &[Value]) {
    out.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if is_omitted(item) {
            out.push_str("null");
        } else {
            write_value(out, item);
        }
    }
    out.push(']');
}

/// Members that stable JSON drops from objects and nulls out in arrays.
fn is_omitted(value: &Value) -> bool {
    matches!(
        value,
        Value::Undefined | Value::Unsupported(_) | Value::Placeholder(_)
    )
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Undefined | Value::Null | Value::Unsupported(_) | Value::Placeholder(_) | Value::Ref(_) => {
            out.push_str("null")
        }
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(out, *n),
        Value::BigInt(i) => write_string(out, i.as_str()),
        Value::String(s) => write_string(out, s),
        Value::Date(d) => write_string(out, &d.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::RegExp(_) | Value::Error(_) | Value::Map(_) | Value::Set(_) => out.push_str("{}"),
        Value::Array(items) => write_array(out, items),
        Value::Object(map) => {
            out.push('{');
            let mut first = true;
            // BTreeMap iterates in sorted key order.
            for (key, item) in map.iter() {
                if is_omitted(item) {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                write_string(out, key);
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, n: f64) {
    if !n.is_finite() {
        out.push_str("null");
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        out.push_str(&format!("{}", n as i128));
    } else {
        out.push_str(&format!("{}", n));
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push_str(&serde_json::Value::String(s.to_string()).to_string());
}
