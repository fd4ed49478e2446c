//! Wire message types.
//!
//! Devices send [`SyncMessage`]s to the inspector; the inspector sends
//! [`InspectorMessage`]s back. Both are internally tagged on `"type"` with
//! camelCase fields.

use std::collections::BTreeMap;
use std::fmt;

use cachescope_core::{QueryHash, SerializedPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Stable identity of a remote application instance, independent of its
/// current transport session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistentDeviceId(pub String);

impl PersistentDeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersistentDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersistentDeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Messages sent by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    /// A full snapshot of the device's cache.
    #[serde(rename = "dehydrated-state")]
    DehydratedState(StateEnvelope),
}

impl SyncMessage {
    pub fn persistent_device_id(&self) -> &PersistentDeviceId {
        match self {
            SyncMessage::DehydratedState(envelope) => &envelope.persistent_device_id,
        }
    }
}

/// Snapshot envelope.
///
/// `extraDeviceInfo` and `envVariables` are kept as raw JSON. Devices send
/// them as objects or as JSON-encoded strings; [`StateEnvelope::extra_device_info`]
/// and [`StateEnvelope::env_variables`] parse either form and treat anything
/// malformed as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEnvelope {
    pub state: SerializedPayload,
    pub is_online_manager_online: bool,
    pub persistent_device_id: PersistentDeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_device_info: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_variables: Option<Json>,
}

impl StateEnvelope {
    /// Parsed `extraDeviceInfo`, or `None` if the envelope does not carry it.
    pub fn extra_device_info(&self) -> Option<BTreeMap<String, String>> {
        self.extra_device_info
            .as_ref()
            .map(|raw| parse_info_map(raw, "extraDeviceInfo", &self.persistent_device_id))
    }

    /// Parsed `envVariables`, or `None` if the envelope does not carry it.
    pub fn env_variables(&self) -> Option<BTreeMap<String, String>> {
        self.env_variables
            .as_ref()
            .map(|raw| parse_info_map(raw, "envVariables", &self.persistent_device_id))
    }
}

/// Lenient parse of a free-form string map.
///
/// Accepts an object or a string holding a JSON object. Non-string values
/// are stringified and nulls dropped. Empty strings and the literal
/// `"undefined"` are an empty map. Anything else is logged and read as
/// empty.
pub fn parse_info_map(
    raw: &Json,
    field: &'static str,
    device: &PersistentDeviceId,
) -> BTreeMap<String, String> {
    let parsed;
    let object = match raw {
        Json::Null => return BTreeMap::new(),
        Json::Object(map) => map,
        Json::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed == "undefined" {
                return BTreeMap::new();
            }
            parsed = match serde_json::from_str::<Json>(trimmed) {
                Ok(Json::Object(map)) => map,
                Ok(other) => {
                    tracing::warn!(%device, field, found = json_kind(&other), "free-form field is not an object");
                    return BTreeMap::new();
                }
                Err(e) => {
                    tracing::warn!(%device, field, error = %e, "failed to parse free-form field");
                    return BTreeMap::new();
                }
            };
            &parsed
        }
        other => {
            tracing::warn!(%device, field, found = json_kind(other), "free-form field is not an object");
            return BTreeMap::new();
        }
    };

    object
        .iter()
        .filter_map(|(key, value)| match value {
            Json::Null => None,
            Json::String(s) => Some((key.clone(), s.clone())),
            other => Some((key.clone(), other.to_string())),
        })
        .collect()
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

/// Cache operation the inspector asks a device to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryAction {
    Invalidate,
    Refetch,
    Remove,
}

impl fmt::Display for QueryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryAction::Invalidate => "invalidate",
            QueryAction::Refetch => "refetch",
            QueryAction::Remove => "remove",
        })
    }
}

/// A query action addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryActionMessage {
    pub action: QueryAction,
    pub query_hash: QueryHash,
    pub persistent_device_id: PersistentDeviceId,
}

/// Messages sent by the inspector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InspectorMessage {
    #[serde(rename = "query-action")]
    QueryAction(QueryActionMessage),
}
