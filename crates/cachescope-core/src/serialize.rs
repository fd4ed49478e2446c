//! Deep serialization of value graphs into `{ json, meta }` payloads.
//!
//! The `json` half is plain JSON. Anything JSON cannot express is written in a
//! JSON-compatible form and its original type is recorded in `meta.values`
//! under the node's path:
//!
//! | Value       | json                     | tag           |
//! |-------------|--------------------------|---------------|
//! | undefined   | `null`                   | `undefined`   |
//! | bigint      | decimal string           | `bigint`      |
//! | date        | RFC 3339 string (ms)     | `Date`        |
//! | regexp      | `"/source/flags"`        | `regexp`      |
//! | error       | `{name, message, stack}` | `Error`       |
//! | map         | `[[k, v], ...]`          | `map`         |
//! | set         | `[v, ...]`               | `set`         |
//! | NaN, ±∞, -0 | string                   | `number`      |
//! | unsupported | description string       | `placeholder` |
//!
//! A container reachable a second time (shared allocation or an explicit
//! [`Value::Ref`] cycle) is written as `null` and listed in
//! `meta.referentialEqualities` under the path of its first occurrence.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as Json};

use crate::error::{Result, SerializationError};
use crate::path::Path;
use crate::value::{BigIntValue, ErrorValue, RegExpValue, Value};

/// Largest integer that survives a round trip through an IEEE double.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A serialized value graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedPayload {
    pub json: Json,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PayloadMeta>,
}

/// Type annotations and back-references for a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMeta {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, TypeTag>,
    #[serde(
        default,
        rename = "referentialEqualities",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub referential_equalities: BTreeMap<String, Vec<String>>,
}

impl PayloadMeta {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.referential_equalities.is_empty()
    }
}

/// The original type of a node whose JSON form is lossy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    #[serde(rename = "undefined")]
    Undefined,
    #[serde(rename = "bigint")]
    BigInt,
    #[serde(rename = "Date")]
    Date,
    #[serde(rename = "regexp")]
    RegExp,
    #[serde(rename = "Error")]
    Error,
    #[serde(rename = "map")]
    Map,
    #[serde(rename = "set")]
    Set,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "placeholder")]
    Placeholder,
    /// A tag this version does not know. The node decodes as plain JSON.
    #[serde(other)]
    Unknown,
}

impl TypeTag {
    /// The wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Undefined => "undefined",
            TypeTag::BigInt => "bigint",
            TypeTag::Date => "Date",
            TypeTag::RegExp => "regexp",
            TypeTag::Error => "Error",
            TypeTag::Map => "map",
            TypeTag::Set => "set",
            TypeTag::Number => "number",
            TypeTag::Placeholder => "placeholder",
            TypeTag::Unknown => "unknown",
        }
    }
}

/// Serialize a value graph. Never fails.
pub fn serialize(value: &Value) -> SerializedPayload {
    let mut encoder = Encoder::default();
    let mut path = Path::root();
    let json = encoder.encode(value, &mut path);

    let meta = PayloadMeta {
        values: encoder.values,
        referential_equalities: encoder.references,
    };

    SerializedPayload {
        json,
        meta: if meta.is_empty() { None } else { Some(meta) },
    }
}

/// Reconstruct a value graph from a payload.
///
/// Fails with [`SerializationError`] when a tag does not fit the JSON it
/// annotates or a back-reference points at a path that does not exist.
pub fn deserialize(payload: &SerializedPayload) -> Result<Value> {
    let mut decoder = Decoder::new(payload.meta.as_ref())?;
    let mut path = Path::root();
    let mut root = decoder.decode(&payload.json, &mut path)?;

    if decoder.consumed_tags != decoder.tags.len() {
        let unused = decoder
            .tags
            .keys()
            .find(|key| !decoder.visited_tags.contains(*key))
            .cloned()
            .unwrap_or_default();
        return Err(SerializationError::MalformedMeta(format!(
            "tag for nonexistent path {:?}",
            unused
        )));
    }

    if decoder.pending.len() != decoder.sites.len() {
        let seen: HashSet<String> = decoder.pending.iter().map(|(s, _)| s.to_string()).collect();
        let missing = decoder
            .sites
            .keys()
            .find(|site| !seen.contains(*site))
            .cloned()
            .unwrap_or_default();
        return Err(SerializationError::UnresolvedReference { path: missing });
    }

    // Sites were collected in pre-order, so any site nested inside a shared
    // target is filled before that target is copied elsewhere.
    for (site, target) in decoder.pending {
        let resolved = if target.is_strict_ancestor_of(&site) {
            Value::Ref(target)
        } else {
            if decoder.sites.contains_key(&target.to_string()) {
                return Err(SerializationError::MalformedMeta(format!(
                    "reference target {:?} is itself a reference",
                    target.to_string()
                )));
            }
            root.at(&target)
                .cloned()
                .ok_or_else(|| SerializationError::UnresolvedReference {
                    path: target.to_string(),
                })?
        };

        let slot = root
            .at_mut(&site)
            .ok_or_else(|| SerializationError::UnresolvedReference {
                path: site.to_string(),
            })?;
        *slot = resolved;
    }

    Ok(root)
}

#[derive(Default)]
struct Encoder {
    values: BTreeMap<String, TypeTag>,
    references: BTreeMap<String, Vec<String>>,
    seen: HashMap<*const (), Path>,
}

impl Encoder {
    fn encode(&mut self, value: &Value, path: &mut Path) -> Json {
        match value {
            Value::Undefined => {
                self.tag(path, TypeTag::Undefined);
                Json::Null
            }
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => match json_number(*n) {
                Some(number) => Json::Number(number),
                None => {
                    self.tag(path, TypeTag::Number);
                    Json::String(special_number_repr(*n).to_string())
                }
            },
            Value::BigInt(i) => {
                self.tag(path, TypeTag::BigInt);
                Json::String(i.to_string())
            }
            Value::String(s) => Json::String(s.clone()),
            Value::Date(d) => {
                self.tag(path, TypeTag::Date);
                Json::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::RegExp(r) => {
                self.tag(path, TypeTag::RegExp);
                Json::String(format!("/{}/{}", r.source, r.flags))
            }
            Value::Error(e) => {
                self.tag(path, TypeTag::Error);
                let mut obj = JsonMap::new();
                obj.insert("name".into(), Json::String(e.name.clone()));
                obj.insert("message".into(), Json::String(e.message.clone()));
                if let Some(stack) = &e.stack {
                    obj.insert("stack".into(), Json::String(stack.clone()));
                }
                Json::Object(obj)
            }
            Value::Array(items) => {
                if self.back_reference(value, path) {
                    return Json::Null;
                }
                Json::Array(self.encode_items(items, path))
            }
            Value::Set(items) => {
                if self.back_reference(value, path) {
                    return Json::Null;
                }
                self.tag(path, TypeTag::Set);
                Json::Array(self.encode_items(items, path))
            }
            Value::Object(map) => {
                if self.back_reference(value, path) {
                    return Json::Null;
                }
                let mut obj = JsonMap::new();
                for (key, item) in map.iter() {
                    path.push(key.clone());
                    let encoded = self.encode(item, path);
                    path.pop();
                    obj.insert(key.clone(), encoded);
                }
                Json::Object(obj)
            }
            Value::Map(entries) => {
                if self.back_reference(value, path) {
                    return Json::Null;
                }
                self.tag(path, TypeTag::Map);
                let mut pairs = Vec::with_capacity(entries.len());
                for (i, (key, item)) in entries.iter().enumerate() {
                    path.push(i.to_string());
                    path.push("0");
                    let k = self.encode(key, path);
                    path.pop();
                    path.push("1");
                    let v = self.encode(item, path);
                    path.pop();
                    path.pop();
                    pairs.push(Json::Array(vec![k, v]));
                }
                Json::Array(pairs)
            }
            Value::Ref(target) => {
                if target.is_strict_ancestor_of(path) {
                    self.reference(target, path);
                    Json::Null
                } else {
                    tracing::debug!(path = %path, target = %target, "dangling reference degraded to placeholder");
                    self.tag(path, TypeTag::Placeholder);
                    Json::String("dangling reference".into())
                }
            }
            Value::Placeholder(kind) | Value::Unsupported(kind) => {
                self.tag(path, TypeTag::Placeholder);
                Json::String(kind.clone())
            }
        }
    }

    fn encode_items(&mut self, items: &[Value], path: &mut Path) -> Vec<Json> {
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            path.push(i.to_string());
            out.push(self.encode(item, path));
            path.pop();
        }
        out
    }

    /// Record the container on first sight; on a repeat, emit a reference.
    fn back_reference(&mut self, value: &Value, path: &Path) -> bool {
        let Some(ptr) = value.container_ptr() else {
            return false;
        };
        match self.seen.get(&ptr) {
            Some(first) => {
                let first = first.clone();
                self.reference(&first, path);
                true
            }
            None => {
                self.seen.insert(ptr, path.clone());
                false
            }
        }
    }

    fn reference(&mut self, target: &Path, site: &Path) {
        self.references
            .entry(target.to_string())
            .or_default()
            .push(site.to_string());
    }

    fn tag(&mut self, path: &Path, tag: TypeTag) {
        self.values.insert(path.to_string(), tag);
    }
}

struct Decoder {
    tags: HashMap<String, TypeTag>,
    /// Reference site -> target path.
    sites: HashMap<String, Path>,
    visited_tags: HashSet<String>,
    consumed_tags: usize,
    pending: Vec<(Path, Path)>,
}

impl Decoder {
    fn new(meta: Option<&PayloadMeta>) -> Result<Self> {
        let mut sites = HashMap::new();
        let mut tags = HashMap::new();

        if let Some(meta) = meta {
            tags.extend(meta.values.iter().map(|(k, v)| (k.clone(), *v)));
            for (target, refs) in &meta.referential_equalities {
                for site in refs {
                    if sites.insert(site.clone(), Path::parse(target)).is_some() {
                        return Err(SerializationError::MalformedMeta(format!(
                            "path {:?} referenced twice",
                            site
                        )));
                    }
                }
            }
        }

        Ok(Self {
            tags,
            sites,
            visited_tags: HashSet::new(),
            consumed_tags: 0,
            pending: Vec::new(),
        })
    }

    fn decode(&mut self, json: &Json, path: &mut Path) -> Result<Value> {
        let key = path.to_string();

        if let Some(target) = self.sites.get(&key) {
            self.pending.push((path.clone(), target.clone()));
            return Ok(Value::Null);
        }

        match self.tags.get(&key).copied() {
            Some(tag) => {
                self.consumed_tags += 1;
                self.visited_tags.insert(key.clone());
                self.decode_tagged(json, tag, path, key)
            }
            None => self.decode_plain(json, path),
        }
    }

    fn decode_tagged(&mut self, json: &Json, tag: TypeTag, path: &mut Path, key: String) -> Result<Value> {
        let mismatch = |found: &Json| SerializationError::TypeMismatch {
            path: key.clone(),
            tag,
            found: json_kind(found).to_string(),
        };

        match tag {
            TypeTag::Undefined => Ok(Value::Undefined),
            TypeTag::BigInt => json
                .as_str()
                .and_then(BigIntValue::parse)
                .map(Value::BigInt)
                .ok_or_else(|| mismatch(json)),
            TypeTag::Date => json
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| Value::Date(d.with_timezone(&Utc)))
                .ok_or_else(|| mismatch(json)),
            TypeTag::RegExp => json
                .as_str()
                .and_then(parse_regexp)
                .map(Value::RegExp)
                .ok_or_else(|| mismatch(json)),
            TypeTag::Error => {
                let obj = json.as_object().ok_or_else(|| mismatch(json))?;
                let field = |name: &str| obj.get(name).and_then(Json::as_str).map(str::to_string);
                Ok(Value::Error(ErrorValue {
                    name: field("name").unwrap_or_else(|| "Error".to_string()),
                    message: field("message").unwrap_or_default(),
                    stack: field("stack"),
                }))
            }
            TypeTag::Number => json
                .as_str()
                .and_then(parse_special_number)
                .map(Value::Number)
                .ok_or_else(|| mismatch(json)),
            TypeTag::Placeholder => json
                .as_str()
                .map(|s| Value::Placeholder(s.to_string()))
                .ok_or_else(|| mismatch(json)),
            TypeTag::Set => {
                let items = json.as_array().ok_or_else(|| mismatch(json))?;
                Ok(Value::set(self.decode_items(items, path)?))
            }
            TypeTag::Map => {
                let pairs = json.as_array().ok_or_else(|| mismatch(json))?;
                let mut entries = Vec::with_capacity(pairs.len());
                for (i, pair) in pairs.iter().enumerate() {
                    let (k, v) = match pair.as_array().map(Vec::as_slice) {
                        Some([k, v]) => (k, v),
                        _ => return Err(mismatch(pair)),
                    };
                    path.push(i.to_string());
                    path.push("0");
                    let entry_key = self.decode(k, path)?;
                    path.pop();
                    path.push("1");
                    let entry_value = self.decode(v, path)?;
                    path.pop();
                    path.pop();
                    entries.push((entry_key, entry_value));
                }
                Ok(Value::map(entries))
            }
            TypeTag::Unknown => {
                tracing::debug!(path = %key, "unknown type tag, keeping plain JSON");
                self.decode_plain(json, path)
            }
        }
    }

    fn decode_plain(&mut self, json: &Json, path: &mut Path) -> Result<Value> {
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::array(self.decode_items(items, path)?),
            Json::Object(obj) => {
                let mut map = BTreeMap::new();
                for (key, item) in obj {
                    path.push(key.clone());
                    let decoded = self.decode(item, path)?;
                    path.pop();
                    map.insert(key.clone(), decoded);
                }
                Value::Object(map.into())
            }
        })
    }

    fn decode_items(&mut self, items: &[Json], path: &mut Path) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            path.push(i.to_string());
            out.push(self.decode(item, path)?);
            path.pop();
        }
        Ok(out)
    }
}

/// JSON form of a finite number; integral values are written without a fraction.
fn json_number(n: f64) -> Option<JsonNumber> {
    if !n.is_finite() || (n == 0.0 && n.is_sign_negative()) {
        return None;
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Some(JsonNumber::from(n as i64));
    }
    JsonNumber::from_f64(n)
}

fn special_number_repr(n: f64) -> &'static str {
    if n.is_nan() {
        "NaN"
    } else if n == f64::INFINITY {
        "Infinity"
    } else if n == f64::NEG_INFINITY {
        "-Infinity"
    } else {
        "-0"
    }
}

fn parse_special_number(s: &str) -> Option<f64> {
    match s {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        "-0" => Some(-0.0),
        _ => None,
    }
}

fn parse_regexp(s: &str) -> Option<RegExpValue> {
    let body = s.strip_prefix('/')?;
    let end = body.rfind('/')?;
    Some(RegExpValue {
        source: body[..end].to_string(),
        flags: body[end + 1..].to_string(),
    })
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
