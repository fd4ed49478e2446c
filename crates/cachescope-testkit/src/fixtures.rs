//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: simulated devices that publish
//! a cache, and an inspector wired to an in-memory preference store.

use std::sync::Arc;

use cachescope::{DashboardAction, Inspector, InspectorConfig};
use cachescope_core::{QueryHash, QueryKey, QueryState, StorageCategory, Value};
use cachescope_store::{MemoryCache, MemoryPreferences};
use cachescope_sync::{
    DeviceIdentity, PersistentDeviceId, Publisher, PublisherConfig, SocketId, SyncMessage,
};
use tokio::sync::mpsc;

/// A simulated device: a live cache and the publisher over it.
pub struct DeviceFixture {
    pub cache: Arc<MemoryCache>,
    pub publisher: Publisher,
}

impl DeviceFixture {
    /// A device with a random persistent id.
    pub fn new(device_name: &str) -> Self {
        Self::with_identity(DeviceIdentity::generate(device_name))
    }

    /// A device with a fixed persistent id.
    pub fn with_id(id: &str, device_name: &str) -> Self {
        Self::with_identity(DeviceIdentity::new(PersistentDeviceId::from(id), device_name))
    }

    pub fn with_identity(identity: DeviceIdentity) -> Self {
        let cache = Arc::new(MemoryCache::new());
        let publisher = Publisher::new(Arc::clone(&cache), PublisherConfig::new(identity));
        Self { cache, publisher }
    }

    pub fn id(&self) -> &PersistentDeviceId {
        &self.publisher.identity().persistent_device_id
    }

    /// Add a successful query holding `data`.
    pub fn put_query(&self, key: QueryKey, data: impl Into<Value>) -> QueryHash {
        self.cache
            .add_query(key, QueryState::success(data.into(), now_millis()))
    }

    /// Add a successful storage query of `category`.
    pub fn put_storage(
        &self,
        category: StorageCategory,
        name: &str,
        data: impl Into<Value>,
    ) -> QueryHash {
        self.put_query(category.key(name), data)
    }

    /// The cache as an envelope, whether or not it changed.
    pub fn snapshot(&self) -> SyncMessage {
        self.publisher.snapshot()
    }

    /// The cache as an encoded frame, whether or not it changed.
    pub fn frame(&self) -> cachescope_sync::Result<Vec<u8>> {
        let frame = self.publisher.encode(&self.snapshot())?;
        Ok(frame.to_vec())
    }
}

impl Default for DeviceFixture {
    fn default() -> Self {
        Self::new("test-device")
    }
}

/// Create several devices with distinct ids.
pub fn multi_device_fixtures(count: usize) -> Vec<DeviceFixture> {
    (0..count)
        .map(|i| DeviceFixture::with_id(&format!("device-{i}"), &format!("Device {i}")))
        .collect()
}

/// An inspector over in-memory preferences with every category enabled.
pub async fn inspector() -> (Inspector, mpsc::Receiver<DashboardAction>) {
    Inspector::new(InspectorConfig::default(), Arc::new(MemoryPreferences::new())).await
}

/// A socket id for tests that feed frames by hand.
pub fn socket(n: u64) -> SocketId {
    SocketId::new(format!("test-{n}"))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachescope::IngestOutcome;

    #[tokio::test]
    async fn test_fixture_ingest() {
        let device = DeviceFixture::with_id("d1", "Pixel");
        device.put_query(QueryKey::from(["todos"]), 1);
        device.put_storage(StorageCategory::Mmkv, "token", "abc");

        let (inspector, _rx) = inspector().await;
        let outcome = inspector.ingest_frame(&socket(1), &device.frame().unwrap()).unwrap();
        assert!(matches!(outcome, IngestOutcome::Applied { .. }));
        assert_eq!(inspector.visible_queries(device.id()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_frame_unchanged() {
        let device = DeviceFixture::default();
        device.put_query(QueryKey::from(["todos"]), 1);

        let (inspector, _rx) = inspector().await;
        inspector.ingest_frame(&socket(1), &device.frame().unwrap()).unwrap();
        let outcome = inspector.ingest_frame(&socket(1), &device.frame().unwrap()).unwrap();
        assert!(matches!(outcome, IngestOutcome::Unchanged { .. }));
    }

    #[tokio::test]
    async fn test_multi_device() {
        let devices = multi_device_fixtures(3);
        let (inspector, _rx) = inspector().await;
        for (n, device) in devices.iter().enumerate() {
            inspector.ingest(&socket(n as u64), device.snapshot()).unwrap();
        }

        assert_eq!(inspector.connected_devices().len(), 3);
        assert!(inspector.device(&PersistentDeviceId::from("device-2")).is_some());
    }
}
