//! # Cachescope Core
//!
//! Pure primitives for mirroring a remote query cache: the value model, the
//! deep serializer, query-key hashing, the dehydrated snapshot model and the
//! storage-category classifier.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Value`] - Closed tagged-variant model of a cache value graph
//! - [`SerializedPayload`] - `{ json, meta }` envelope carrying non-JSON values
//! - [`DehydratedState`] - Snapshot of every query and mutation in a cache
//! - [`QueryHash`] - Stable hash of a [`QueryKey`]
//! - [`StorageCategory`] - Classification of `#storage` query keys
//!
//! ## Serialization
//!
//! [`serialize`] never fails: values that cannot cross a process boundary
//! degrade to placeholders. [`deserialize`] fails only on a corrupt payload.
//! See the [`serialize`](mod@serialize) module.

pub mod category;
pub mod digest;
pub mod error;
pub mod key;
pub mod path;
pub mod serialize;
pub mod state;
pub mod value;

pub use category::{classify, is_visible, EnabledCategories, StorageCategory, STORAGE_KEY_PREFIX};
pub use digest::{snapshot_digest, StateDigest};
pub use error::{Result, SerializationError};
pub use key::{hash_query_key, QueryHash, QueryKey};
pub use path::Path;
pub use serialize::{deserialize, serialize, PayloadMeta, SerializedPayload, TypeTag};
pub use state::{
    DehydratedMutation, DehydratedQuery, DehydratedState, FetchStatus, MutationId, MutationScope,
    MutationState, MutationStatus, ObserverOptions, ObserverState, QueryState, QueryStatus,
};
pub use value::{BigIntValue, ErrorValue, RegExpValue, Value};
