//! Error types for cachescope core.

use thiserror::Error;

use crate::serialize::TypeTag;

/// Errors raised while decoding a serialized payload or a dehydrated snapshot.
///
/// Encoding never fails; every variant here describes a corrupt or
/// incompatible payload received from the other side of the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    #[error("unresolved reference at path {path:?}")]
    UnresolvedReference { path: String },

    #[error("malformed meta table: {0}")]
    MalformedMeta(String),

    #[error("value at path {path:?} does not match tag {tag:?}: found {found}")]
    TypeMismatch {
        path: String,
        tag: TypeTag,
        found: String,
    },

    #[error("malformed dehydrated state: {0}")]
    MalformedState(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, SerializationError>;
