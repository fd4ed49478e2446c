//! Sending side: turns a live cache into envelopes and applies the
//! inspector's actions back onto it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use cachescope_core::{snapshot_digest, StateDigest};
use cachescope_store::{dehydrate, DehydrateOptions, MemoryCache, StoreError};
use parking_lot::Mutex;
use rand::RngCore;

use crate::codec::FrameCodec;
use crate::error::Result;
use crate::messages::{
    InspectorMessage, PersistentDeviceId, QueryAction, QueryActionMessage, StateEnvelope,
    SyncMessage,
};

/// Who a publisher says it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub persistent_device_id: PersistentDeviceId,
    pub device_name: String,
    pub platform: Option<String>,
    pub extra_device_info: BTreeMap<String, String>,
    pub env_variables: BTreeMap<String, String>,
}

impl DeviceIdentity {
    pub fn new(persistent_device_id: PersistentDeviceId, device_name: impl Into<String>) -> Self {
        Self {
            persistent_device_id,
            device_name: device_name.into(),
            platform: None,
            extra_device_info: BTreeMap::new(),
            env_variables: BTreeMap::new(),
        }
    }

    /// A fresh identity with a random 128-bit id.
    ///
    /// Callers persist the id themselves; generating again yields a new device.
    pub fn generate(device_name: impl Into<String>) -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(PersistentDeviceId(hex::encode(bytes)), device_name)
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }
}

/// Publisher configuration.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub codec: FrameCodec,
    pub identity: DeviceIdentity,
}

impl PublisherConfig {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            codec: FrameCodec::default(),
            identity,
        }
    }
}

/// Publishes snapshots of one cache.
pub struct Publisher {
    cache: Arc<MemoryCache>,
    options: DehydrateOptions,
    config: PublisherConfig,
    online: AtomicBool,
    last_sent: Mutex<Option<(StateDigest, bool)>>,
}

impl Publisher {
    pub fn new(cache: Arc<MemoryCache>, config: PublisherConfig) -> Self {
        Self {
            cache,
            options: DehydrateOptions::default(),
            config,
            online: AtomicBool::new(true),
            last_sent: Mutex::new(None),
        }
    }

    pub fn with_options(mut self, options: DehydrateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.config.identity
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Build an envelope for the cache as it is now.
    pub fn snapshot(&self) -> SyncMessage {
        let state = dehydrate(&*self.cache, &self.options);
        let identity = &self.config.identity;
        SyncMessage::DehydratedState(StateEnvelope {
            state: state.to_payload(),
            is_online_manager_online: self.online.load(Ordering::Acquire),
            persistent_device_id: identity.persistent_device_id.clone(),
            device_name: Some(identity.device_name.clone()),
            platform: identity.platform.clone(),
            extra_device_info: encode_info_map(&identity.extra_device_info),
            env_variables: encode_info_map(&identity.env_variables),
        })
    }

    /// Like [`Publisher::snapshot`], but `None` if neither the payload nor
    /// the online flag changed since the last envelope this returned.
    pub fn poll(&self) -> Option<SyncMessage> {
        let message = self.snapshot();
        let SyncMessage::DehydratedState(envelope) = &message;
        let current = (
            snapshot_digest(&envelope.state),
            envelope.is_online_manager_online,
        );

        let mut last = self.last_sent.lock();
        if last.as_ref() == Some(&current) {
            tracing::trace!(digest = %current.0, "snapshot unchanged");
            return None;
        }
        tracing::debug!(digest = %current.0, device = %self.config.identity.persistent_device_id, "snapshot changed");
        *last = Some(current);
        Some(message)
    }

    /// Forget the last sent digest so the next poll always yields.
    pub fn force_next(&self) {
        *self.last_sent.lock() = None;
    }

    pub fn encode(&self, message: &SyncMessage) -> Result<Bytes> {
        self.config.codec.encode(message)
    }

    /// [`Publisher::poll`] then encode.
    pub fn poll_frame(&self) -> Result<Option<Bytes>> {
        self.poll().map(|message| self.encode(&message)).transpose()
    }

    /// Decode a frame from the inspector and apply it.
    ///
    /// Returns the action if it was applied.
    pub fn handle_frame(&self, frame: &[u8]) -> Result<Option<QueryAction>> {
        let InspectorMessage::QueryAction(message) = self.config.codec.decode(frame)?;
        Ok(self.apply_action(&message)?.then_some(message.action))
    }

    /// Apply a query action to the local cache.
    ///
    /// Actions addressed to another device, or to a query that no longer
    /// exists, are ignored and return `false`.
    pub fn apply_action(&self, message: &QueryActionMessage) -> Result<bool> {
        let identity = &self.config.identity;
        if message.persistent_device_id != identity.persistent_device_id {
            tracing::debug!(device = %message.persistent_device_id, "action for another device");
            return Ok(false);
        }

        let hash = &message.query_hash;
        let applied = match message.action {
            QueryAction::Invalidate => self.cache.invalidate(hash),
            QueryAction::Remove => self.cache.remove_query(hash).is_some(),
            QueryAction::Refetch => match self.cache.refetch(hash) {
                Ok(status) => {
                    tracing::debug!(query_hash = %hash, status = status.as_str(), "refetched");
                    true
                }
                Err(StoreError::QueryNotFound(_)) => false,
                Err(e) => return Err(e.into()),
            },
        };
        tracing::debug!(query_hash = %hash, action = %message.action, applied, "applied inspector action");
        Ok(applied)
    }
}

/// Free-form maps travel as JSON-encoded strings.
fn encode_info_map(map: &BTreeMap<String, String>) -> Option<serde_json::Value> {
    if map.is_empty() {
        return None;
    }
    serde_json::to_string(map).ok().map(serde_json::Value::String)
}
