//! Error types for the sync module.

use thiserror::Error;

/// Errors raised by the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No device is known under this persistent id or socket id.
    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Frame exceeds the configured size limit.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Message decoded but is not valid.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Snapshot payload is corrupt.
    #[error("serialization error: {0}")]
    Serialization(#[from] cachescope_core::SerializationError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] cachescope_store::StoreError),

    /// Registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
