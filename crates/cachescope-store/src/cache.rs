//! In-memory query and mutation cache.
//!
//! Serves two roles: the live cache a publishing application dehydrates,
//! and the per-device mirror an inspector rehydrates snapshots into. Thread
//! safe via a `parking_lot::RwLock`. Fetchers are only ever run by
//! [`MemoryCache::refetch`], never while the lock is held.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cachescope_core::{
    DehydratedMutation, DehydratedQuery, ErrorValue, FetchStatus, MutationId, QueryHash, QueryKey,
    QueryState, QueryStatus, Value,
};
use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::traits::{CacheSink, CacheSource, HydrateResult};

/// A query's fetch function.
pub type QueryFn = Arc<dyn Fn(&QueryKey) -> std::result::Result<Value, ErrorValue> + Send + Sync>;

/// Handle for a local subscription to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

/// A query as held by a live cache.
#[derive(Clone)]
pub struct LiveQuery {
    pub query_hash: QueryHash,
    pub query_key: QueryKey,
    pub state: QueryState,
    /// Options of each observer as the host holds them. May contain
    /// callables ([`Value::Unsupported`]).
    pub observers: Vec<BTreeMap<String, Value>>,
    pub meta: Option<Value>,
    pub gc_time: Option<Duration>,
    /// Local subscriptions. Never part of a snapshot.
    pub subscribers: BTreeSet<SubscriberId>,
    pub query_fn: Option<QueryFn>,
}

impl LiveQuery {
    pub fn new(query_key: QueryKey, state: QueryState) -> Self {
        Self {
            query_hash: query_key.hash(),
            query_key,
            state,
            observers: Vec::new(),
            meta: None,
            gc_time: None,
            subscribers: BTreeSet::new(),
            query_fn: None,
        }
    }

    pub fn with_query_fn(mut self, query_fn: QueryFn) -> Self {
        self.query_fn = Some(query_fn);
        self
    }

    pub fn with_observer(mut self, options: BTreeMap<String, Value>) -> Self {
        self.observers.push(options);
        self
    }

    fn from_snapshot(query: &DehydratedQuery) -> Self {
        Self {
            query_hash: query.query_hash.clone(),
            query_key: query.query_key.clone(),
            state: query.state.clone(),
            observers: snapshot_observers(query),
            meta: query.meta.clone(),
            gc_time: query.gc_time,
            subscribers: BTreeSet::new(),
            query_fn: None,
        }
    }
}

impl fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQuery")
            .field("query_hash", &self.query_hash)
            .field("query_key", &self.query_key)
            .field("state", &self.state)
            .field("observers", &self.observers.len())
            .field("subscribers", &self.subscribers.len())
            .field("has_query_fn", &self.query_fn.is_some())
            .finish()
    }
}

fn snapshot_observers(query: &DehydratedQuery) -> Vec<BTreeMap<String, Value>> {
    query
        .observers
        .iter()
        .map(|observer| observer.options.0.clone())
        .collect()
}

/// In-memory cache.
#[derive(Default)]
pub struct MemoryCache {
    inner: RwLock<MemoryCacheInner>,
}

#[derive(Default)]
struct MemoryCacheInner {
    queries: BTreeMap<QueryHash, LiveQuery>,
    mutations: BTreeMap<MutationId, DehydratedMutation>,
    next_subscriber: u64,
}

impl MemoryCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a query. Returns the previous entry.
    pub fn insert_query(&self, query: LiveQuery) -> Option<LiveQuery> {
        let mut inner = self.inner.write();
        inner.queries.insert(query.query_hash.clone(), query)
    }

    /// Convenience for `insert_query(LiveQuery::new(key, state))`.
    pub fn add_query(&self, key: QueryKey, state: QueryState) -> QueryHash {
        let query = LiveQuery::new(key, state);
        let hash = query.query_hash.clone();
        self.insert_query(query);
        hash
    }

    pub fn set_query_fn(&self, hash: &QueryHash, query_fn: QueryFn) -> bool {
        self.with_query(hash, |query| query.query_fn = Some(query_fn))
            .is_some()
    }

    /// Write data from the host side, as a successful fetch would.
    pub fn set_query_data(&self, hash: &QueryHash, data: Value) -> bool {
        let now = now_millis();
        self.with_query(hash, |query| {
            let state = &mut query.state;
            state.data = Some(data).filter(|d| !d.is_undefined());
            state.data_update_count += 1;
            state.data_updated_at = now;
            state.status = QueryStatus::Success;
            state.is_invalidated = false;
        })
        .is_some()
    }

    pub fn get_query(&self, hash: &QueryHash) -> Option<LiveQuery> {
        self.inner.read().queries.get(hash).cloned()
    }

    pub fn query_state(&self, hash: &QueryHash) -> Option<QueryState> {
        self.inner.read().queries.get(hash).map(|q| q.state.clone())
    }

    pub fn contains_query(&self, hash: &QueryHash) -> bool {
        self.inner.read().queries.contains_key(hash)
    }

    pub fn query_count(&self) -> usize {
        self.inner.read().queries.len()
    }

    pub fn add_mutation(&self, mutation: DehydratedMutation) -> Option<DehydratedMutation> {
        let mut inner = self.inner.write();
        inner.mutations.insert(mutation.mutation_id, mutation)
    }

    pub fn mutation_count(&self) -> usize {
        self.inner.read().mutations.len()
    }

    /// Subscribe locally to a query.
    pub fn subscribe(&self, hash: &QueryHash) -> Option<SubscriberId> {
        let mut inner = self.inner.write();
        let id = SubscriberId(inner.next_subscriber);
        let query = inner.queries.get_mut(hash)?;
        query.subscribers.insert(id);
        inner.next_subscriber += 1;
        Some(id)
    }

    pub fn unsubscribe(&self, hash: &QueryHash, id: SubscriberId) -> bool {
        self.with_query(hash, |query| query.subscribers.remove(&id))
            .unwrap_or(false)
    }

    pub fn subscriber_count(&self, hash: &QueryHash) -> usize {
        self.inner
            .read()
            .queries
            .get(hash)
            .map_or(0, |q| q.subscribers.len())
    }

    /// Mark a query stale. Does not fetch.
    pub fn invalidate(&self, hash: &QueryHash) -> bool {
        self.with_query(hash, |query| query.state.is_invalidated = true)
            .is_some()
    }

    pub fn remove_query(&self, hash: &QueryHash) -> Option<LiveQuery> {
        self.inner.write().queries.remove(hash)
    }

    /// Run the query's fetcher and record the outcome.
    ///
    /// The lock is released while the fetcher runs. If the query is removed
    /// in the meantime the result is discarded.
    pub fn refetch(&self, hash: &QueryHash) -> Result<QueryStatus> {
        let (key, fetcher) = {
            let mut inner = self.inner.write();
            let query = inner
                .queries
                .get_mut(hash)
                .ok_or_else(|| StoreError::QueryNotFound(hash.clone()))?;
            let fetcher = query
                .query_fn
                .clone()
                .ok_or_else(|| StoreError::NoFetcher(hash.clone()))?;
            query.state.fetch_status = FetchStatus::Fetching;
            (query.query_key.clone(), fetcher)
        };

        let outcome = fetcher(&key);
        let now = now_millis();

        let mut inner = self.inner.write();
        let query = inner.queries.get_mut(hash).ok_or_else(|| {
            tracing::debug!(query_hash = %hash, "query removed during refetch");
            StoreError::QueryNotFound(hash.clone())
        })?;

        let state = &mut query.state;
        match outcome {
            Ok(data) => {
                state.data = Some(data).filter(|d| !d.is_undefined());
                state.data_update_count += 1;
                state.data_updated_at = now;
                state.error = Value::Null;
                state.fetch_failure_count = 0;
                state.fetch_failure_reason = Value::Null;
                state.is_invalidated = false;
                state.status = QueryStatus::Success;
            }
            Err(error) => {
                tracing::debug!(query_hash = %hash, error = %error.message, "refetch failed");
                let error = Value::Error(error);
                state.error = error.clone();
                state.error_update_count += 1;
                state.error_updated_at = now;
                state.fetch_failure_count += 1;
                state.fetch_failure_reason = error;
                state.status = QueryStatus::Error;
            }
        }
        state.fetch_status = FetchStatus::Idle;
        Ok(state.status)
    }

    /// Drop every query and mutation.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.queries.clear();
        inner.mutations.clear();
    }

    fn with_query<T>(&self, hash: &QueryHash, f: impl FnOnce(&mut LiveQuery) -> T) -> Option<T> {
        let mut inner = self.inner.write();
        inner.queries.get_mut(hash).map(f)
    }
}

impl CacheSource for MemoryCache {
    fn query_hashes(&self) -> Vec<QueryHash> {
        self.inner.read().queries.keys().cloned().collect()
    }

    fn query(&self, hash: &QueryHash) -> Option<LiveQuery> {
        self.get_query(hash)
    }

    fn mutation_ids(&self) -> Vec<MutationId> {
        self.inner.read().mutations.keys().copied().collect()
    }

    fn mutation(&self, id: MutationId) -> Option<DehydratedMutation> {
        self.inner.read().mutations.get(&id).cloned()
    }
}

impl CacheSink for MemoryCache {
    fn upsert_query(&self, incoming: &DehydratedQuery) -> HydrateResult {
        let mut inner = self.inner.write();

        if let Some(existing) = inner.queries.get_mut(&incoming.query_hash) {
            let mut state = incoming.state.clone();
            // A snapshot without data does not clear data already held.
            if state.data.is_none() {
                state.data = existing.state.data.clone();
            }
            let observers = snapshot_observers(incoming);

            let unchanged = existing.query_key == incoming.query_key
                && existing.state == state
                && existing.observers == observers
                && existing.meta == incoming.meta
                && existing.gc_time == incoming.gc_time;
            if unchanged {
                return HydrateResult::Unchanged;
            }

            // Subscribers and the fetcher stay with the local entry.
            existing.query_key = incoming.query_key.clone();
            existing.state = state;
            existing.observers = observers;
            existing.meta = incoming.meta.clone();
            existing.gc_time = incoming.gc_time;
            return HydrateResult::Updated;
        }

        inner
            .queries
            .insert(incoming.query_hash.clone(), LiveQuery::from_snapshot(incoming));
        HydrateResult::Inserted
    }

    fn put_mutation(&self, mutation: &DehydratedMutation) -> HydrateResult {
        let mut inner = self.inner.write();
        let result = match inner.mutations.get(&mutation.mutation_id) {
            Some(existing) if existing == mutation => return HydrateResult::Unchanged,
            Some(_) => HydrateResult::Updated,
            None => HydrateResult::Inserted,
        };
        inner.mutations.insert(mutation.mutation_id, mutation.clone());
        result
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachescope_core::{MutationState, ObserverOptions, ObserverState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_fetcher(calls: Arc<AtomicUsize>, data: Value) -> QueryFn {
        Arc::new(
            move |_key: &QueryKey| -> std::result::Result<Value, ErrorValue> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(data.clone())
            },
        )
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let cache = MemoryCache::new();
        let hash = cache.add_query(QueryKey::from(["todos"]), QueryState::default());

        let a = cache.subscribe(&hash).unwrap();
        let b = cache.subscribe(&hash).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.subscriber_count(&hash), 2);

        assert!(cache.unsubscribe(&hash, a));
        assert!(!cache.unsubscribe(&hash, a));
        assert_eq!(cache.subscriber_count(&hash), 1);

        assert!(cache.subscribe(&QueryHash::from("missing")).is_none());
    }

    #[test]
    fn test_invalidate_and_remove() {
        let cache = MemoryCache::new();
        let hash = cache.add_query(QueryKey::from(["todos"]), QueryState::default());

        assert!(cache.invalidate(&hash));
        assert!(cache.query_state(&hash).unwrap().is_invalidated);

        assert!(cache.remove_query(&hash).is_some());
        assert!(!cache.invalidate(&hash));
        assert_eq!(cache.query_count(), 0);
    }

    #[test]
    fn test_refetch_success() {
        let cache = MemoryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let hash = cache.add_query(QueryKey::from(["todos"]), QueryState::default());
        cache.set_query_fn(&hash, counting_fetcher(calls.clone(), Value::from(5)));
        cache.invalidate(&hash);

        let status = cache.refetch(&hash).unwrap();
        assert_eq!(status, QueryStatus::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let state = cache.query_state(&hash).unwrap();
        assert_eq!(state.data, Some(Value::from(5)));
        assert_eq!(state.data_update_count, 1);
        assert!(!state.is_invalidated);
        assert_eq!(state.fetch_status, FetchStatus::Idle);
    }

    #[test]
    fn test_refetch_failure_keeps_data() {
        let cache = MemoryCache::new();
        let hash = cache.add_query(
            QueryKey::from(["todos"]),
            QueryState::success(Value::from("old"), 1),
        );
        cache.set_query_fn(
            &hash,
            Arc::new(|_: &QueryKey| -> std::result::Result<Value, ErrorValue> {
                Err(ErrorValue::new("TypeError", "offline"))
            }),
        );

        assert_eq!(cache.refetch(&hash).unwrap(), QueryStatus::Error);

        let state = cache.query_state(&hash).unwrap();
        assert_eq!(state.data, Some(Value::from("old")));
        assert_eq!(state.fetch_failure_count, 1);
        assert_eq!(state.error, Value::Error(ErrorValue::new("TypeError", "offline")));
    }

    #[test]
    fn test_refetch_without_fetcher() {
        let cache = MemoryCache::new();
        let hash = cache.add_query(QueryKey::from(["todos"]), QueryState::default());

        assert!(matches!(cache.refetch(&hash), Err(StoreError::NoFetcher(_))));
        assert!(matches!(
            cache.refetch(&QueryHash::from("nope")),
            Err(StoreError::QueryNotFound(_))
        ));
    }

    #[test]
    fn test_upsert_preserves_local_subscribers_and_fetcher() {
        let cache = MemoryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::from(["todos"]);
        let hash = cache.add_query(key.clone(), QueryState::success(Value::from(1), 1));
        cache.set_query_fn(&hash, counting_fetcher(calls.clone(), Value::Null));
        cache.subscribe(&hash).unwrap();

        let mut incoming = DehydratedQuery::new(key, QueryState::success(Value::from(2), 2));
        incoming.observers.push(ObserverState {
            query_hash: hash.clone(),
            options: ObserverOptions::default(),
        });

        assert_eq!(cache.upsert_query(&incoming), HydrateResult::Updated);
        assert_eq!(cache.upsert_query(&incoming), HydrateResult::Unchanged);

        let query = cache.get_query(&hash).unwrap();
        assert_eq!(query.state.data, Some(Value::from(2)));
        assert_eq!(query.subscribers.len(), 1);
        assert_eq!(query.observers.len(), 1);
        assert!(query.query_fn.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_upsert_without_data_keeps_existing_data() {
        let cache = MemoryCache::new();
        let key = QueryKey::from(["user"]);
        let hash = cache.add_query(key.clone(), QueryState::success(Value::from("ada"), 1));

        let mut stale = QueryState::success(Value::Null, 1);
        stale.data = None;
        stale.is_invalidated = true;
        cache.upsert_query(&DehydratedQuery::new(key, stale));

        let state = cache.query_state(&hash).unwrap();
        assert_eq!(state.data, Some(Value::from("ada")));
        assert!(state.is_invalidated);
    }

    #[test]
    fn test_put_mutation_replaces_by_id() {
        let cache = MemoryCache::new();
        let mut mutation = DehydratedMutation::new(MutationId(1), MutationState::default());

        assert_eq!(cache.put_mutation(&mutation), HydrateResult::Inserted);
        assert_eq!(cache.put_mutation(&mutation), HydrateResult::Unchanged);

        mutation.state.failure_count = 2;
        assert_eq!(cache.put_mutation(&mutation), HydrateResult::Updated);
        assert_eq!(cache.mutation_count(), 1);
        assert_eq!(cache.mutation(MutationId(1)).unwrap().state.failure_count, 2);
    }
}
