//! # Cachescope Sync
//!
//! Everything between a device's cache and the inspector: the wire
//! envelope, frame encoding, the transport seam and the device registry.
//!
//! ## Overview
//!
//! A device runs a [`Publisher`] over its cache. Whenever the cache
//! changes, the publisher emits a `dehydrated-state` envelope. The inspector
//! receives frames as [`TransportEvent`]s, resolves each envelope to a
//! [`Device`] in the [`DeviceRegistry`] and may send query actions back.
//!
//! ## Key Properties
//!
//! - **Stable identity**: devices are keyed by persistent id, never by socket
//! - **Soft disconnect**: a closed session keeps the device's last-known state
//! - **Lenient envelopes**: malformed free-form fields read as empty
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cachescope_store::MemoryCache;
//! use cachescope_sync::{DeviceIdentity, MemoryNetwork, Publisher, PublisherConfig};
//!
//! async fn example() -> cachescope_sync::Result<()> {
//!     let network = MemoryNetwork::new(64);
//!     let client = network.connect().await?;
//!
//!     let cache = Arc::new(MemoryCache::new());
//!     let publisher = Publisher::new(
//!         cache,
//!         PublisherConfig::new(DeviceIdentity::generate("Pixel")),
//!     );
//!
//!     if let Some(frame) = publisher.poll_frame()? {
//!         client.send(frame).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Device                              Inspector
//!   |-------- (connect) -------------->|  Connected(socket)
//!   |-------- dehydrated-state ------->|  registry upsert, rehydrate mirror
//!   |-------- dehydrated-state ------->|  (skipped if digest unchanged)
//!   |<------- query-action ------------|  invalidate / refetch / remove
//!   |-------- dehydrated-state ------->|
//!   |-------- (close) ---------------->|  Disconnected(socket)
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod publisher;
pub mod registry;
pub mod transport;

pub use codec::FrameCodec;
pub use error::{RegistryError, Result, SyncError};
pub use messages::{
    parse_info_map, InspectorMessage, PersistentDeviceId, QueryAction, QueryActionMessage,
    StateEnvelope, SyncMessage,
};
pub use publisher::{DeviceIdentity, Publisher, PublisherConfig};
pub use registry::{Device, DeviceAttributes, DeviceRegistry};
pub use transport::{
    memory::MemoryClient, memory::MemoryNetwork, memory::MemoryTransport, SocketId, Transport,
    TransportEvent,
};
