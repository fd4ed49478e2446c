//! Dehydrated snapshots of a query cache.
//!
//! A [`DehydratedState`] is converted to a [`Value`] graph with camelCase
//! field names and then deep-serialized, so field values keep their
//! non-JSON types (dates inside `data`, `undefined` variables, errors) across
//! the wire.
//!
//! Decoding is lenient about optional fields: a missing counter is zero, a
//! missing status is the initial status. A counter, flag or status that is
//! present but unreadable is logged and read as if it were missing. A query
//! without `queryHash` or `queryKey`, or a mutation without `mutationId`, is
//! [`SerializationError::MalformedState`] on its own and is skipped when it
//! appears inside a [`DehydratedState`]. Only a snapshot that is not an
//! object, or whose `queries`/`mutations` are not arrays, fails as a whole.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::{Result, SerializationError};
use crate::key::{QueryHash, QueryKey};
use crate::serialize::{deserialize, serialize, SerializedPayload};
use crate::value::Value;

/// Status of a query's data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    #[default]
    Pending,
    Error,
    Success,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Error => "error",
            QueryStatus::Success => "success",
        }
    }

    /// Parse a status name. `loading` is the older name for `pending`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" | "loading" => Some(QueryStatus::Pending),
            "error" => Some(QueryStatus::Error),
            "success" => Some(QueryStatus::Success),
            _ => None,
        }
    }
}

/// Whether a query is currently fetching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    Fetching,
    Paused,
    #[default]
    Idle,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Fetching => "fetching",
            FetchStatus::Paused => "paused",
            FetchStatus::Idle => "idle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fetching" => Some(FetchStatus::Fetching),
            "paused" => Some(FetchStatus::Paused),
            "idle" => Some(FetchStatus::Idle),
            _ => None,
        }
    }
}

/// Status of a mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MutationStatus {
    #[default]
    Idle,
    Pending,
    Success,
    Error,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Idle => "idle",
            MutationStatus::Pending => "pending",
            MutationStatus::Success => "success",
            MutationStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(MutationStatus::Idle),
            "pending" | "loading" => Some(MutationStatus::Pending),
            "success" => Some(MutationStatus::Success),
            "error" => Some(MutationStatus::Error),
            _ => None,
        }
    }
}

/// State of a single query.
///
/// Timestamps are milliseconds since the Unix epoch, as the remote reports
/// them.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    /// `None` means the query holds no data. It is never `Some(Undefined)`
    /// after decoding.
    pub data: Option<Value>,
    pub data_update_count: u64,
    pub data_updated_at: i64,
    pub error: Value,
    pub error_update_count: u64,
    pub error_updated_at: i64,
    pub fetch_failure_count: u64,
    pub fetch_failure_reason: Value,
    pub fetch_meta: Value,
    pub is_invalidated: bool,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            data: None,
            data_update_count: 0,
            data_updated_at: 0,
            error: Value::Null,
            error_update_count: 0,
            error_updated_at: 0,
            fetch_failure_count: 0,
            fetch_failure_reason: Value::Null,
            fetch_meta: Value::Null,
            is_invalidated: false,
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
        }
    }
}

impl QueryState {
    /// A successful state holding `data`.
    pub fn success(data: Value, updated_at: i64) -> Self {
        Self {
            data: Some(data).filter(|d| !d.is_undefined()),
            data_update_count: 1,
            data_updated_at: updated_at,
            status: QueryStatus::Success,
            ..Self::default()
        }
    }

    pub fn to_value(&self) -> Value {
        let mut fields = BTreeMap::new();
        if let Some(data) = &self.data {
            fields.insert("data".to_string(), data.clone());
        }
        fields.insert("dataUpdateCount".to_string(), Value::from(self.data_update_count));
        fields.insert("dataUpdatedAt".to_string(), Value::from(self.data_updated_at));
        fields.insert("error".to_string(), self.error.clone());
        fields.insert("errorUpdateCount".to_string(), Value::from(self.error_update_count));
        fields.insert("errorUpdatedAt".to_string(), Value::from(self.error_updated_at));
        fields.insert("fetchFailureCount".to_string(), Value::from(self.fetch_failure_count));
        fields.insert("fetchFailureReason".to_string(), self.fetch_failure_reason.clone());
        fields.insert("fetchMeta".to_string(), self.fetch_meta.clone());
        fields.insert("isInvalidated".to_string(), Value::from(self.is_invalidated));
        fields.insert("status".to_string(), Value::from(self.status.as_str()));
        fields.insert("fetchStatus".to_string(), Value::from(self.fetch_status.as_str()));
        Value::Object(fields.into())
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(value, "query state")?;

        Ok(Self {
            data: fields.get("data").filter(|d| !d.is_undefined()).cloned(),
            data_update_count: fields.u64("dataUpdateCount"),
            data_updated_at: fields.i64("dataUpdatedAt"),
            error: fields.value_or_null("error"),
            error_update_count: fields.u64("errorUpdateCount"),
            error_updated_at: fields.i64("errorUpdatedAt"),
            fetch_failure_count: fields.u64("fetchFailureCount"),
            fetch_failure_reason: fields.value_or_null("fetchFailureReason"),
            fetch_meta: fields.value_or_null("fetchMeta"),
            is_invalidated: fields.bool("isInvalidated"),
            status: fields.status("status", QueryStatus::parse),
            fetch_status: fields.status("fetchStatus", FetchStatus::parse),
        })
    }
}

/// State of a single mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationState {
    pub context: Value,
    pub data: Value,
    pub error: Value,
    pub failure_count: u64,
    pub failure_reason: Value,
    pub is_paused: bool,
    pub status: MutationStatus,
    pub variables: Value,
    pub submitted_at: i64,
}

impl Default for MutationState {
    fn default() -> Self {
        Self {
            context: Value::Undefined,
            data: Value::Undefined,
            error: Value::Null,
            failure_count: 0,
            failure_reason: Value::Null,
            is_paused: false,
            status: MutationStatus::Idle,
            variables: Value::Undefined,
            submitted_at: 0,
        }
    }
}

impl MutationState {
    pub fn to_value(&self) -> Value {
        Value::object([
            ("context", self.context.clone()),
            ("data", self.data.clone()),
            ("error", self.error.clone()),
            ("failureCount", Value::from(self.failure_count)),
            ("failureReason", self.failure_reason.clone()),
            ("isPaused", Value::from(self.is_paused)),
            ("status", Value::from(self.status.as_str())),
            ("variables", self.variables.clone()),
            ("submittedAt", Value::from(self.submitted_at)),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(value, "mutation state")?;

        Ok(Self {
            context: fields.value_or_undefined("context"),
            data: fields.value_or_undefined("data"),
            error: fields.value_or_null("error"),
            failure_count: fields.u64("failureCount"),
            failure_reason: fields.value_or_null("failureReason"),
            is_paused: fields.bool("isPaused"),
            status: fields.status("status", MutationStatus::parse),
            variables: fields.value_or_undefined("variables"),
            submitted_at: fields.i64("submittedAt"),
        })
    }
}

/// Serializable observer options. Callables never appear here; the
/// dehydrator replaces them with placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObserverOptions(pub BTreeMap<String, Value>);

impl ObserverOptions {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// One observer subscribed to a query on the remote side.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverState {
    pub query_hash: QueryHash,
    pub options: ObserverOptions,
}

impl ObserverState {
    pub fn to_value(&self) -> Value {
        Value::object([
            ("queryHash", Value::from(self.query_hash.as_str())),
            ("options", Value::Object(self.options.0.clone().into())),
        ])
    }

    fn from_value(value: &Value, owner: &QueryHash) -> Result<Self> {
        let fields = Fields::new(value, "observer")?;
        let query_hash = fields
            .str("queryHash")
            .map(QueryHash::from)
            .unwrap_or_else(|| owner.clone());
        let options = match fields.get("options") {
            None | Some(Value::Undefined) | Some(Value::Null) => ObserverOptions::default(),
            Some(Value::Object(map)) => ObserverOptions(map.as_ref().clone()),
            Some(other) => {
                fields.ignored("options", "an object", other);
                ObserverOptions::default()
            }
        };
        Ok(Self { query_hash, options })
    }
}

/// A query in a dehydrated snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DehydratedQuery {
    pub query_hash: QueryHash,
    pub query_key: QueryKey,
    pub state: QueryState,
    pub observers: Vec<ObserverState>,
    pub meta: Option<Value>,
    pub gc_time: Option<Duration>,
}

impl DehydratedQuery {
    /// A query whose hash is derived from its key.
    pub fn new(query_key: QueryKey, state: QueryState) -> Self {
        Self {
            query_hash: query_key.hash(),
            query_key,
            state,
            observers: Vec::new(),
            meta: None,
            gc_time: None,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("queryHash".to_string(), Value::from(self.query_hash.as_str()));
        fields.insert("queryKey".to_string(), self.query_key.to_value());
        fields.insert("state".to_string(), self.state.to_value());
        fields.insert(
            "observers".to_string(),
            Value::array(self.observers.iter().map(ObserverState::to_value)),
        );
        if let Some(meta) = &self.meta {
            fields.insert("meta".to_string(), meta.clone());
        }
        if let Some(gc_time) = self.gc_time {
            fields.insert("gcTime".to_string(), duration_value(gc_time));
        }
        Value::Object(fields.into())
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(value, "query")?;
        let query_hash = QueryHash::from(fields.required_str("queryHash")?);
        let query_key = match fields.get("queryKey") {
            Some(Value::Array(items)) => QueryKey(items.as_ref().clone()),
            Some(other) => {
                return Err(malformed(format!(
                    "queryKey of {} must be an array, found {}",
                    query_hash,
                    other.kind()
                )))
            }
            None => return Err(malformed(format!("query {} has no queryKey", query_hash))),
        };
        let state = match fields.get("state") {
            Some(state) => QueryState::from_value(state)?,
            None => QueryState::default(),
        };
        let observers = fields
            .list("observers")
            .iter()
            .filter_map(|observer| match ObserverState::from_value(observer, &query_hash) {
                Ok(observer) => Some(observer),
                Err(e) => {
                    tracing::warn!(query_hash = %query_hash, error = %e, "skipping observer");
                    None
                }
            })
            .collect();

        Ok(Self {
            query_hash,
            query_key,
            state,
            observers,
            meta: fields.present("meta"),
            gc_time: fields.duration("gcTime"),
        })
    }
}

/// Identifier of a mutation, unique within its source cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(pub u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutations sharing a scope id run serially.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationScope {
    pub id: String,
}

/// A mutation in a dehydrated snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DehydratedMutation {
    pub mutation_id: MutationId,
    pub mutation_key: Option<QueryKey>,
    pub state: MutationState,
    pub meta: Option<Value>,
    pub scope: Option<MutationScope>,
    pub gc_time: Option<Duration>,
}

impl DehydratedMutation {
    pub fn new(mutation_id: MutationId, state: MutationState) -> Self {
        Self {
            mutation_id,
            mutation_key: None,
            state,
            meta: None,
            scope: None,
            gc_time: None,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("mutationId".to_string(), Value::from(self.mutation_id.0));
        if let Some(key) = &self.mutation_key {
            fields.insert("mutationKey".to_string(), key.to_value());
        }
        fields.insert("state".to_string(), self.state.to_value());
        if let Some(meta) = &self.meta {
            fields.insert("meta".to_string(), meta.clone());
        }
        if let Some(scope) = &self.scope {
            fields.insert(
                "scope".to_string(),
                Value::object([("id", Value::from(scope.id.as_str()))]),
            );
        }
        if let Some(gc_time) = self.gc_time {
            fields.insert("gcTime".to_string(), duration_value(gc_time));
        }
        Value::Object(fields.into())
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(value, "mutation")?;
        let mutation_id = fields
            .get("mutationId")
            .and_then(Value::as_u64)
            .map(MutationId)
            .ok_or_else(|| malformed("mutation has no numeric mutationId"))?;
        let mutation_key = match fields.get("mutationKey") {
            None | Some(Value::Undefined) => None,
            Some(Value::Array(items)) => Some(QueryKey(items.as_ref().clone())),
            Some(other) => {
                fields.ignored("mutationKey", "an array", other);
                None
            }
        };
        let state = match fields.get("state") {
            Some(state) => MutationState::from_value(state)?,
            None => MutationState::default(),
        };
        let scope = fields
            .get("scope")
            .and_then(|scope| scope.get("id"))
            .and_then(Value::as_str)
            .map(|id| MutationScope { id: id.to_string() });

        Ok(Self {
            mutation_id,
            mutation_key,
            state,
            meta: fields.present("meta"),
            scope,
            gc_time: fields.duration("gcTime"),
        })
    }
}

/// Snapshot of every query and mutation in a cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DehydratedState {
    pub mutations: Vec<DehydratedMutation>,
    pub queries: Vec<DehydratedQuery>,
}

impl DehydratedState {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty() && self.queries.is_empty()
    }

    /// Look up a query by hash.
    pub fn query(&self, hash: &QueryHash) -> Option<&DehydratedQuery> {
        self.queries.iter().find(|q| &q.query_hash == hash)
    }

    pub fn to_value(&self) -> Value {
        Value::object([
            (
                "mutations",
                Value::array(self.mutations.iter().map(DehydratedMutation::to_value)),
            ),
            (
                "queries",
                Value::array(self.queries.iter().map(DehydratedQuery::to_value)),
            ),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(value, "dehydrated state")?;
        let mutations = decode_entries(fields.array("mutations")?, DehydratedMutation::from_value);
        let queries = decode_entries(fields.array("queries")?, DehydratedQuery::from_value);
        Ok(Self { mutations, queries })
    }

    /// Deep-serialize for the wire.
    pub fn to_payload(&self) -> SerializedPayload {
        serialize(&self.to_value())
    }

    pub fn from_payload(payload: &SerializedPayload) -> Result<Self> {
        Self::from_value(&deserialize(payload)?)
    }
}

/// Decode each entry on its own, dropping the ones that fail.
fn decode_entries<T>(items: &[Value], decode: impl Fn(&Value) -> Result<T>) -> Vec<T> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match decode(item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping malformed snapshot entry");
                None
            }
        })
        .collect()
}

fn malformed(msg: impl Into<String>) -> SerializationError {
    SerializationError::MalformedState(msg.into())
}

fn duration_value(d: Duration) -> Value {
    Value::Number(d.as_millis() as f64)
}

/// Typed access to the members of a decoded object.
struct Fields<'a> {
    what: &'static str,
    map: &'a BTreeMap<String, Value>,
}

impl<'a> Fields<'a> {
    fn new(value: &'a Value, what: &'static str) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                what,
                map: map.as_ref(),
            }),
            other => Err(malformed(format!(
                "{} must be an object, found {}",
                what,
                other.kind()
            ))),
        }
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.map.get(name)
    }

    /// A member that is present and not `undefined`.
    fn present(&self, name: &str) -> Option<Value> {
        self.get(name).filter(|v| !v.is_undefined()).cloned()
    }

    fn value_or_null(&self, name: &str) -> Value {
        self.present(name).unwrap_or(Value::Null)
    }

    fn value_or_undefined(&self, name: &str) -> Value {
        self.present(name).unwrap_or(Value::Undefined)
    }

    fn str(&self, name: &str) -> Option<&'a str> {
        match self.get(name) {
            None | Some(Value::Undefined) | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(other) => {
                self.ignored(name, "a string", other);
                None
            }
        }
    }

    fn required_str(&self, name: &str) -> Result<&'a str> {
        self.str(name)
            .ok_or_else(|| malformed(format!("{} has no {}", self.what, name)))
    }

    /// A status name; unknown names read as the default status.
    fn status<T: Default>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> T {
        let Some(s) = self.str(name) else {
            return T::default();
        };
        parse(s).unwrap_or_else(|| {
            tracing::warn!(
                field = %format!("{}.{}", self.what, name),
                status = s,
                "unknown status, using default"
            );
            T::default()
        })
    }

    fn u64(&self, name: &str) -> u64 {
        match self.get(name) {
            None | Some(Value::Undefined) | Some(Value::Null) => 0,
            Some(v) => v.as_u64().unwrap_or_else(|| {
                self.ignored(name, "a non-negative integer", v);
                0
            }),
        }
    }

    fn i64(&self, name: &str) -> i64 {
        match self.get(name) {
            None | Some(Value::Undefined) | Some(Value::Null) => 0,
            Some(v) => v.as_i64().unwrap_or_else(|| {
                self.ignored(name, "an integer", v);
                0
            }),
        }
    }

    fn bool(&self, name: &str) -> bool {
        match self.get(name) {
            None | Some(Value::Undefined) | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                self.ignored(name, "a boolean", other);
                false
            }
        }
    }

    /// Like [`Fields::array`], but a member of the wrong type reads as empty.
    fn list(&self, name: &str) -> &'a [Value] {
        self.array(name).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring field");
            &[]
        })
    }

    fn array(&self, name: &str) -> Result<&'a [Value]> {
        match self.get(name) {
            None | Some(Value::Undefined) | Some(Value::Null) => Ok(&[]),
            Some(Value::Array(items)) => Ok(items.as_slice()),
            Some(other) => Err(self.wrong_type(name, "an array", other)),
        }
    }

    /// Non-negative finite milliseconds. `Infinity` and garbage read as absent.
    fn duration(&self, name: &str) -> Option<Duration> {
        let millis = self.get(name)?.as_f64()?;
        (millis.is_finite() && millis >= 0.0).then(|| Duration::from_millis(millis as u64))
    }

    fn ignored(&self, name: &str, expected: &str, found: &Value) {
        tracing::warn!(
            field = %format!("{}.{}", self.what, name),
            expected,
            found = found.kind(),
            "ignoring field of the wrong type"
        );
    }

    fn wrong_type(&self, name: &str, expected: &str, found: &Value) -> SerializationError {
        malformed(format!(
            "{}.{} must be {}, found {}",
            self.what,
            name,
            expected,
            found.kind()
        ))
    }
}
