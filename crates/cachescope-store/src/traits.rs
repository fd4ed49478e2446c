//! Seams between caches, snapshots and persisted preferences.
//!
//! The dehydrator reads through [`CacheSource`] and the rehydrator writes
//! through [`CacheSink`], so both work against any cache representation.
//! [`PreferenceStore`] persists the enabled storage categories.

use async_trait::async_trait;
use cachescope_core::{
    DehydratedMutation, DehydratedQuery, EnabledCategories, MutationId, QueryHash,
    StorageCategory,
};

use crate::cache::LiveQuery;
use crate::error::Result;

/// Outcome of applying one snapshot entry to a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrateResult {
    /// The entry was new.
    Inserted,
    /// An existing entry changed.
    Updated,
    /// The entry already held exactly this state (idempotent - not an error).
    Unchanged,
}

/// Read access to a live cache.
///
/// Enumeration and per-entry reads are separate calls. The cache may change
/// in between, so `query` and `mutation` return `None` for an entry that
/// has gone away.
pub trait CacheSource {
    /// Hashes of all resident queries, in a stable order.
    fn query_hashes(&self) -> Vec<QueryHash>;

    /// Snapshot of one query.
    fn query(&self, hash: &QueryHash) -> Option<LiveQuery>;

    /// Ids of all resident mutations, oldest first.
    fn mutation_ids(&self) -> Vec<MutationId>;

    /// Snapshot of one mutation.
    fn mutation(&self, id: MutationId) -> Option<DehydratedMutation>;
}

/// Write access used by rehydration.
///
/// Implementations must never run a query's fetcher from these methods.
pub trait CacheSink {
    /// Insert a query, or merge it into the entry with the same hash.
    fn upsert_query(&self, query: &DehydratedQuery) -> HydrateResult;

    /// Record a mutation. A mutation id already present is replaced, never
    /// duplicated.
    fn put_mutation(&self, mutation: &DehydratedMutation) -> HydrateResult;
}

/// Persistence for the enabled storage-category set.
///
/// A category with no saved value is enabled.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Load the saved set.
    async fn load_categories(&self) -> Result<EnabledCategories>;

    /// Save one category toggle.
    async fn save_category(&self, category: StorageCategory, enabled: bool) -> Result<()>;
}
