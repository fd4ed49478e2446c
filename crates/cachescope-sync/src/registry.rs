//! Device registry.
//!
//! Maps transport sessions to stable device identities. Records are keyed
//! by [`PersistentDeviceId`]; a reconnecting device keeps its record and
//! only its socket changes. Disconnection flips `is_connected` and keeps
//! everything else so the last-known state stays inspectable.
//!
//! Each record sits behind its own mutex, so upserts for one device apply
//! whole and in arrival order while different devices proceed independently.
//! Lock order is record before socket index; nothing takes a record lock
//! while holding the socket index.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::RegistryError;
use crate::messages::{PersistentDeviceId, StateEnvelope};
use crate::transport::SocketId;

/// A known remote application instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub socket_id: SocketId,
    pub persistent_device_id: PersistentDeviceId,
    pub device_name: String,
    pub platform: Option<String>,
    pub is_connected: bool,
    pub is_online_manager_online: bool,
    pub extra_device_info: BTreeMap<String, String>,
    pub env_variables: BTreeMap<String, String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Device {
    fn new(id: &PersistentDeviceId, socket_id: SocketId, now: DateTime<Utc>) -> Self {
        Self {
            socket_id,
            persistent_device_id: id.clone(),
            device_name: id.to_string(),
            platform: None,
            is_connected: false,
            is_online_manager_online: true,
            extra_device_info: BTreeMap::new(),
            env_variables: BTreeMap::new(),
            first_seen_at: now,
            last_seen_at: now,
        }
    }
}

/// Attributes carried by one envelope.
///
/// `None` fields leave the stored value alone.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAttributes {
    pub socket_id: SocketId,
    pub device_name: Option<String>,
    pub platform: Option<String>,
    pub is_online_manager_online: bool,
    pub extra_device_info: Option<BTreeMap<String, String>>,
    pub env_variables: Option<BTreeMap<String, String>>,
}

impl DeviceAttributes {
    pub fn new(socket_id: SocketId) -> Self {
        Self {
            socket_id,
            device_name: None,
            platform: None,
            is_online_manager_online: true,
            extra_device_info: None,
            env_variables: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    /// Attributes from a received envelope. Free-form fields are parsed
    /// leniently.
    pub fn from_envelope(envelope: &StateEnvelope, socket_id: SocketId) -> Self {
        Self {
            socket_id,
            device_name: envelope.device_name.clone(),
            platform: envelope.platform.clone(),
            is_online_manager_online: envelope.is_online_manager_online,
            extra_device_info: envelope.extra_device_info(),
            env_variables: envelope.env_variables(),
        }
    }
}

/// Registry of devices.
///
/// Constructed once and shared by reference; holds no global state.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<PersistentDeviceId, Arc<Mutex<Device>>>>,
    sockets: RwLock<HashMap<SocketId, PersistentDeviceId>>,
    target: Mutex<Option<PersistentDeviceId>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update the device record for `id`.
    ///
    /// The record's socket becomes `attrs.socket_id` and it is marked
    /// connected. Returns the record as it stands after the update.
    pub fn upsert(&self, id: &PersistentDeviceId, attrs: DeviceAttributes) -> Device {
        let now = Utc::now();
        let (entry, created) = self.entry(id, &attrs.socket_id, now);

        let mut device = entry.lock();
        let previous_socket = device.socket_id.clone();
        let reconnected = !created && (!device.is_connected || previous_socket != attrs.socket_id);

        device.socket_id = attrs.socket_id.clone();
        device.is_connected = true;
        device.is_online_manager_online = attrs.is_online_manager_online;
        device.last_seen_at = now;
        if let Some(name) = attrs.device_name {
            device.device_name = name;
        }
        if let Some(platform) = attrs.platform {
            device.platform = Some(platform);
        }
        if let Some(info) = attrs.extra_device_info {
            device.extra_device_info = info;
        }
        if let Some(env) = attrs.env_variables {
            device.env_variables = env;
        }

        self.sockets
            .write()
            .insert(attrs.socket_id.clone(), id.clone());

        if created {
            tracing::info!(device = %id, socket = %attrs.socket_id, name = %device.device_name, "device registered");
        } else if reconnected {
            tracing::info!(device = %id, socket = %attrs.socket_id, previous = %previous_socket, "device reconnected");
        } else {
            tracing::debug!(device = %id, socket = %attrs.socket_id, "device updated");
        }

        device.clone()
    }

    fn entry(
        &self,
        id: &PersistentDeviceId,
        socket: &SocketId,
        now: DateTime<Utc>,
    ) -> (Arc<Mutex<Device>>, bool) {
        if let Some(entry) = self.devices.read().get(id) {
            return (Arc::clone(entry), false);
        }
        let mut devices = self.devices.write();
        let mut created = false;
        let entry = devices.entry(id.clone()).or_insert_with(|| {
            created = true;
            Arc::new(Mutex::new(Device::new(id, socket.clone(), now)))
        });
        (Arc::clone(entry), created)
    }

    /// Mark the device on `socket` as disconnected.
    ///
    /// Returns the updated record, or `None` if the socket was superseded by
    /// a newer session of the same device (which stays connected).
    pub fn mark_disconnected(&self, socket: &SocketId) -> Result<Option<Device>, RegistryError> {
        let id = self
            .sockets
            .read()
            .get(socket)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownDevice(socket.to_string()))?;
        let entry = self
            .devices
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownDevice(id.to_string()))?;

        let mut device = entry.lock();
        self.sockets.write().remove(socket);

        if device.socket_id != *socket {
            tracing::debug!(device = %id, %socket, current = %device.socket_id, "ignoring disconnect of superseded socket");
            return Ok(None);
        }

        device.is_connected = false;
        tracing::info!(device = %id, %socket, "device disconnected");
        Ok(Some(device.clone()))
    }

    pub fn find_by_persistent_id(&self, id: &PersistentDeviceId) -> Option<Device> {
        let entry = self.devices.read().get(id).cloned()?;
        let device = entry.lock().clone();
        Some(device)
    }

    pub fn find_by_socket(&self, socket: &SocketId) -> Option<Device> {
        let id = self.sockets.read().get(socket).cloned()?;
        self.find_by_persistent_id(&id)
    }

    /// Connected devices, ordered by id.
    pub fn list_connected(&self) -> Vec<Device> {
        let mut devices: Vec<_> = self
            .list_all()
            .into_iter()
            .filter(|device| device.is_connected)
            .collect();
        devices.sort_by(|a, b| a.persistent_device_id.cmp(&b.persistent_device_id));
        devices
    }

    /// Every known device, ordered by id.
    pub fn list_all(&self) -> Vec<Device> {
        let entries: Vec<_> = self.devices.read().values().cloned().collect();
        let mut devices: Vec<Device> = entries.iter().map(|entry| entry.lock().clone()).collect();
        devices.sort_by(|a, b| a.persistent_device_id.cmp(&b.persistent_device_id));
        devices
    }

    /// Select the target device, or clear it with `None`.
    ///
    /// An unknown id is rejected and the current target is kept.
    pub fn set_target(&self, id: Option<&PersistentDeviceId>) -> Result<(), RegistryError> {
        let mut target = self.target.lock();
        match id {
            None => {
                *target = None;
            }
            Some(id) => {
                if !self.devices.read().contains_key(id) {
                    tracing::warn!(device = %id, "cannot target unknown device");
                    return Err(RegistryError::UnknownDevice(id.to_string()));
                }
                *target = Some(id.clone());
            }
        }
        tracing::debug!(selected = ?target.as_ref().map(PersistentDeviceId::as_str), "target changed");
        Ok(())
    }

    pub fn target_id(&self) -> Option<PersistentDeviceId> {
        self.target.lock().clone()
    }

    pub fn target(&self) -> Option<Device> {
        let id = self.target_id()?;
        self.find_by_persistent_id(&id)
    }

    /// Forget a device. Clears the target if it pointed at it.
    pub fn remove(&self, id: &PersistentDeviceId) -> Option<Device> {
        let entry = self.devices.write().remove(id)?;
        self.sockets.write().retain(|_, owner| owner != id);
        {
            let mut target = self.target.lock();
            if target.as_ref() == Some(id) {
                *target = None;
            }
        }
        tracing::info!(device = %id, "device removed");
        let device = entry.lock().clone();
        Some(device)
    }

    /// Forget every disconnected device. Returns the removed ids.
    pub fn prune_disconnected(&self) -> Vec<PersistentDeviceId> {
        let stale: Vec<_> = self
            .list_all()
            .into_iter()
            .filter(|device| !device.is_connected)
            .map(|device| device.persistent_device_id)
            .collect();
        stale
            .into_iter()
            .filter(|id| self.remove(id).is_some())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn id(s: &str) -> PersistentDeviceId {
        PersistentDeviceId::from(s)
    }

    fn socket(s: &str) -> SocketId {
        SocketId::new(s)
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let registry = DeviceRegistry::new();

        let first = registry.upsert(&id("dev-1"), DeviceAttributes::new(socket("s1")));
        assert_eq!(first.device_name, "dev-1");
        assert!(first.is_connected);

        let second = registry.upsert(
            &id("dev-1"),
            DeviceAttributes::new(socket("s1")).with_name("Pixel"),
        );
        assert_eq!(second.device_name, "Pixel");
        assert_eq!(second.first_seen_at, first.first_seen_at);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reconnect_resolves_to_same_record() {
        let registry = DeviceRegistry::new();
        registry.upsert(
            &id("dev-1"),
            DeviceAttributes::new(socket("s1")).with_name("Pixel"),
        );
        registry.mark_disconnected(&socket("s1")).unwrap();

        let device = registry.upsert(
            &id("dev-1"),
            DeviceAttributes::new(socket("s2")).with_name("Pixel 8"),
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(device.socket_id, socket("s2"));
        assert_eq!(device.device_name, "Pixel 8");
        assert!(device.is_connected);
        assert_eq!(
            registry.find_by_socket(&socket("s2")).unwrap().persistent_device_id,
            id("dev-1")
        );
    }

    #[test]
    fn test_disconnect_keeps_last_known_details() {
        let registry = DeviceRegistry::new();
        let mut attrs = DeviceAttributes::new(socket("s1"));
        attrs.env_variables = Some(BTreeMap::from([("API".to_string(), "x".to_string())]));
        registry.upsert(&id("dev-1"), attrs);

        let device = registry.mark_disconnected(&socket("s1")).unwrap().unwrap();
        assert!(!device.is_connected);
        assert_eq!(device.env_variables.get("API").map(String::as_str), Some("x"));
        assert!(registry.list_connected().is_empty());
        assert_eq!(registry.list_all().len(), 1);
    }

    #[test]
    fn test_absent_fields_keep_previous_values() {
        let registry = DeviceRegistry::new();
        let mut attrs = DeviceAttributes::new(socket("s1")).with_name("Pixel");
        attrs.platform = Some("android".into());
        attrs.extra_device_info = Some(BTreeMap::from([("model".to_string(), "8".to_string())]));
        registry.upsert(&id("dev-1"), attrs);

        let device = registry.upsert(&id("dev-1"), DeviceAttributes::new(socket("s1")));
        assert_eq!(device.device_name, "Pixel");
        assert_eq!(device.platform.as_deref(), Some("android"));
        assert_eq!(device.extra_device_info.len(), 1);
    }

    #[test]
    fn test_late_disconnect_of_superseded_socket() {
        let registry = DeviceRegistry::new();
        registry.upsert(&id("dev-1"), DeviceAttributes::new(socket("s1")));
        registry.upsert(&id("dev-1"), DeviceAttributes::new(socket("s2")));

        assert_eq!(registry.mark_disconnected(&socket("s1")).unwrap(), None);
        let device = registry.find_by_persistent_id(&id("dev-1")).unwrap();
        assert!(device.is_connected);
        assert_eq!(device.socket_id, socket("s2"));
    }

    #[test]
    fn test_unknown_socket_is_error() {
        let registry = DeviceRegistry::new();
        assert_eq!(
            registry.mark_disconnected(&socket("nope")),
            Err(RegistryError::UnknownDevice("nope".into()))
        );
    }

    #[test]
    fn test_targeting() {
        let registry = DeviceRegistry::new();
        registry.upsert(&id("dev-1"), DeviceAttributes::new(socket("s1")));

        registry.set_target(Some(&id("dev-1"))).unwrap();
        assert_eq!(registry.target_id(), Some(id("dev-1")));

        let err = registry.set_target(Some(&id("ghost"))).unwrap_err();
        assert_eq!(err, RegistryError::UnknownDevice("ghost".into()));
        assert_eq!(registry.target_id(), Some(id("dev-1")));

        registry.set_target(None).unwrap();
        assert!(registry.target().is_none());
    }

    #[test]
    fn test_remove_and_prune() {
        let registry = DeviceRegistry::new();
        registry.upsert(&id("dev-1"), DeviceAttributes::new(socket("s1")));
        registry.upsert(&id("dev-2"), DeviceAttributes::new(socket("s2")));
        registry.upsert(&id("dev-3"), DeviceAttributes::new(socket("s3")));
        registry.set_target(Some(&id("dev-1"))).unwrap();

        registry.remove(&id("dev-1")).unwrap();
        assert!(registry.target_id().is_none());
        assert!(registry.find_by_socket(&socket("s1")).is_none());

        registry.mark_disconnected(&socket("s2")).unwrap();
        assert_eq!(registry.prune_disconnected(), vec![id("dev-2")]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_upserts_keep_one_record() {
        let registry = Arc::new(DeviceRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..50 {
                        registry.upsert(
                            &id("dev-1"),
                            DeviceAttributes::new(socket(&format!("s{n}")))
                                .with_name(format!("name-{n}-{i}")),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 1);
        let device = registry.find_by_persistent_id(&id("dev-1")).unwrap();
        // Name and socket come from the same envelope.
        let n = device.socket_id.as_str().trim_start_matches('s');
        assert!(device.device_name.starts_with(&format!("name-{n}-")));
    }
}
