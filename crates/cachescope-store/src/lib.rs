//! # Cachescope Store
//!
//! The live cache model and the two directions between it and a snapshot,
//! plus persistence for the inspector's storage-category preferences.
//!
//! ## Key Types
//!
//! - [`MemoryCache`] - Thread-safe query and mutation cache
//! - [`CacheSource`] / [`CacheSink`] - Read and write seams used by
//!   [`dehydrate`] and [`rehydrate`]
//! - [`DehydrateOptions`] - Query and mutation predicates
//! - [`PreferenceStore`] - Async trait for the enabled-category set
//! - [`SqlitePreferences`] - SQLite-backed preferences
//! - [`MemoryPreferences`] - In-memory preferences for tests
//!
//! ## Usage
//!
//! ```rust
//! use cachescope_core::{QueryKey, QueryState, Value};
//! use cachescope_store::{dehydrate, rehydrate, DehydrateOptions, MemoryCache};
//!
//! let source = MemoryCache::new();
//! source.add_query(QueryKey::from(["todos"]), QueryState::success(Value::from(1), 0));
//!
//! let snapshot = dehydrate(&source, &DehydrateOptions::default());
//!
//! let mirror = MemoryCache::new();
//! let report = rehydrate(&snapshot, &mirror);
//! assert_eq!(report.queries_inserted, 1);
//! ```
//!
//! ## Design Notes
//!
//! - **No fetch on hydrate**: only [`MemoryCache::refetch`] runs a fetcher
//! - **Idempotent hydrate**: re-applying a snapshot reports `Unchanged`
//! - **Tolerant reads**: entries removed mid-dehydrate are skipped

pub mod cache;
pub mod dehydrate;
pub mod error;
pub mod hydrate;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use cache::{LiveQuery, MemoryCache, QueryFn, SubscriberId};
pub use dehydrate::{
    dehydrate, dehydrate_mutation, dehydrate_query, DehydrateOptions, MutationPredicate,
    QueryPredicate,
};
pub use error::{Result, StoreError};
pub use hydrate::{rehydrate, HydrateReport};
pub use memory::MemoryPreferences;
pub use sqlite::SqlitePreferences;
pub use traits::{CacheSink, CacheSource, HydrateResult, PreferenceStore};
