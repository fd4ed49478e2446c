//! Error types for the inspector.

use cachescope_core::{QueryHash, SerializationError};
use cachescope_store::StoreError;
use cachescope_sync::{PersistentDeviceId, RegistryError, SyncError};
use thiserror::Error;

/// Errors that can occur during inspector operations.
#[derive(Debug, Error)]
pub enum InspectorError {
    /// Snapshot payload could not be decoded. The envelope is dropped.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Frame or transport error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Unknown device or socket.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The device has no such query in its mirror.
    #[error("query {query_hash} not found on device {device}")]
    QueryNotFound {
        device: PersistentDeviceId,
        query_hash: QueryHash,
    },

    /// The device is known but has no open session to forward actions to.
    #[error("device {0} is offline")]
    DeviceOffline(PersistentDeviceId),

    /// Nobody is draining the dashboard action channel.
    #[error("dashboard action channel closed")]
    ActionChannelClosed,
}

/// Result type for inspector operations.
pub type Result<T> = std::result::Result<T, InspectorError>;
