//! Cache dehydration: live cache to [`DehydratedState`].
//!
//! Read-only with respect to the cache. Entries that disappear between
//! enumeration and read are skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use cachescope_core::{
    DehydratedMutation, DehydratedQuery, DehydratedState, ObserverOptions, ObserverState, Value,
};

use crate::cache::LiveQuery;
use crate::traits::CacheSource;

/// Observer option carrying the fetch function.
const QUERY_FN_OPTION: &str = "queryFn";

/// Decides whether a query is part of a snapshot.
pub type QueryPredicate = Box<dyn Fn(&LiveQuery) -> bool + Send + Sync>;

/// Decides whether a mutation is part of a snapshot.
pub type MutationPredicate = Box<dyn Fn(&DehydratedMutation) -> bool + Send + Sync>;

/// Filters applied while dehydrating. The default includes everything.
#[derive(Default)]
pub struct DehydrateOptions {
    pub should_dehydrate_query: Option<QueryPredicate>,
    pub should_dehydrate_mutation: Option<MutationPredicate>,
}

impl DehydrateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query_filter(
        mut self,
        predicate: impl Fn(&LiveQuery) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_dehydrate_query = Some(Box::new(predicate));
        self
    }

    pub fn with_mutation_filter(
        mut self,
        predicate: impl Fn(&DehydratedMutation) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_dehydrate_mutation = Some(Box::new(predicate));
        self
    }

    fn includes_query(&self, query: &LiveQuery) -> bool {
        self.should_dehydrate_query
            .as_ref()
            .map_or(true, |predicate| predicate(query))
    }

    fn includes_mutation(&self, mutation: &DehydratedMutation) -> bool {
        self.should_dehydrate_mutation
            .as_ref()
            .map_or(true, |predicate| predicate(mutation))
    }
}

impl std::fmt::Debug for DehydrateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DehydrateOptions")
            .field("should_dehydrate_query", &self.should_dehydrate_query.is_some())
            .field(
                "should_dehydrate_mutation",
                &self.should_dehydrate_mutation.is_some(),
            )
            .finish()
    }
}

/// Snapshot every mutation and query in `cache`.
pub fn dehydrate<C: CacheSource + ?Sized>(cache: &C, options: &DehydrateOptions) -> DehydratedState {
    let mut state = DehydratedState::default();

    for id in cache.mutation_ids() {
        let Some(mutation) = cache.mutation(id) else {
            tracing::trace!(mutation_id = %id, "mutation vanished during dehydrate");
            continue;
        };
        if options.includes_mutation(&mutation) {
            state.mutations.push(dehydrate_mutation(mutation));
        }
    }

    for hash in cache.query_hashes() {
        let Some(query) = cache.query(&hash) else {
            tracing::trace!(query_hash = %hash, "query vanished during dehydrate");
            continue;
        };
        if options.includes_query(&query) {
            state.queries.push(dehydrate_query(&query));
        }
    }

    tracing::debug!(
        queries = state.queries.len(),
        mutations = state.mutations.len(),
        "dehydrated cache"
    );
    state
}

/// Snapshot one query.
///
/// Observer options lose their fetch function and every other callable;
/// each becomes a [`Value::Placeholder`].
pub fn dehydrate_query(query: &LiveQuery) -> DehydratedQuery {
    let observers = query
        .observers
        .iter()
        .map(|options| ObserverState {
            query_hash: query.query_hash.clone(),
            options: strip_callables(options),
        })
        .collect();

    let mut state = query.state.clone();
    if matches!(state.data, Some(Value::Undefined)) {
        state.data = None;
    }

    DehydratedQuery {
        query_hash: query.query_hash.clone(),
        query_key: query.query_key.clone(),
        state,
        observers,
        meta: query.meta.clone(),
        gc_time: query.gc_time,
    }
}

/// Snapshot one mutation. Absent `scope`, `meta` and `gcTime` stay absent.
pub fn dehydrate_mutation(mut mutation: DehydratedMutation) -> DehydratedMutation {
    if matches!(mutation.meta, Some(Value::Undefined)) {
        mutation.meta = None;
    }
    mutation
}

fn strip_callables(options: &BTreeMap<String, Value>) -> ObserverOptions {
    ObserverOptions(
        options
            .iter()
            .map(|(name, value)| {
                let value = if name == QUERY_FN_OPTION {
                    Value::Placeholder(QUERY_FN_OPTION.to_string())
                } else {
                    strip_value(value)
                };
                (name.clone(), value)
            })
            .collect(),
    )
}

fn strip_value(value: &Value) -> Value {
    match value {
        Value::Unsupported(kind) => Value::Placeholder(kind.clone()),
        Value::Array(items) => Value::Array(Arc::new(items.iter().map(strip_value).collect())),
        Value::Object(map) => Value::Object(Arc::new(
            map.iter()
                .map(|(k, v)| (k.clone(), strip_value(v)))
                .collect(),
        )),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use cachescope_core::{MutationId, MutationScope, MutationState, QueryKey, QueryState};

    fn live_options() -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("queryFn".to_string(), Value::Unsupported("function".to_string())),
            ("staleTime".to_string(), Value::from(1000)),
            (
                "select".to_string(),
                Value::object([("fn", Value::Unsupported("function".to_string()))]),
            ),
        ])
    }

    #[test]
    fn test_strips_callables_from_observers() {
        let cache = MemoryCache::new();
        let query = LiveQuery::new(QueryKey::from(["todos"]), QueryState::default())
            .with_observer(live_options());
        cache.insert_query(query);

        let state = dehydrate(&cache, &DehydrateOptions::default());
        let options = &state.queries[0].observers[0].options;

        assert_eq!(
            options.get("queryFn"),
            Some(&Value::Placeholder("queryFn".to_string()))
        );
        assert_eq!(options.get("staleTime"), Some(&Value::from(1000)));
        assert_eq!(
            options.get("select").and_then(|s| s.get("fn")),
            Some(&Value::Placeholder("function".to_string()))
        );
    }

    #[test]
    fn test_undefined_data_is_dropped() {
        let cache = MemoryCache::new();
        let mut state = QueryState::default();
        state.data = Some(Value::Undefined);
        cache.insert_query(LiveQuery::new(QueryKey::from(["empty"]), state));

        let snapshot = dehydrate(&cache, &DehydrateOptions::default());
        assert_eq!(snapshot.queries[0].state.data, None);
        assert!(snapshot.queries[0]
            .to_value()
            .get("state")
            .and_then(|s| s.get("data"))
            .is_none());
    }

    #[test]
    fn test_predicates_exclude_entries() {
        let cache = MemoryCache::new();
        cache.add_query(QueryKey::from(["keep"]), QueryState::default());
        cache.add_query(QueryKey::from(["drop"]), QueryState::default());
        cache.add_mutation(DehydratedMutation::new(MutationId(1), MutationState::default()));
        cache.add_mutation(DehydratedMutation::new(MutationId(2), MutationState::default()));

        let options = DehydrateOptions::new()
            .with_query_filter(|q| q.query_key.head() != Some("drop"))
            .with_mutation_filter(|m| m.mutation_id == MutationId(2));
        let state = dehydrate(&cache, &options);

        assert_eq!(state.queries.len(), 1);
        assert_eq!(state.queries[0].query_key.head(), Some("keep"));
        assert_eq!(state.mutations.len(), 1);
        assert_eq!(state.mutations[0].mutation_id, MutationId(2));
    }

    #[test]
    fn test_sparse_mutation_fields() {
        let cache = MemoryCache::new();
        let mut scoped = DehydratedMutation::new(MutationId(1), MutationState::default());
        scoped.scope = Some(MutationScope {
            id: "queue".to_string(),
        });
        cache.add_mutation(scoped);
        cache.add_mutation(DehydratedMutation::new(MutationId(2), MutationState::default()));

        let state = dehydrate(&cache, &DehydrateOptions::default());
        let values: Vec<Value> = state.mutations.iter().map(|m| m.to_value()).collect();

        assert!(values[0].get("scope").is_some());
        assert!(values[1].get("scope").is_none());
        assert!(values[1].get("meta").is_none());
    }

    #[test]
    fn test_does_not_mutate_cache() {
        let cache = MemoryCache::new();
        let hash = cache.add_query(QueryKey::from(["todos"]), QueryState::default());
        let before = cache.get_query(&hash).unwrap().state;

        let _ = dehydrate(&cache, &DehydrateOptions::default());
        let _ = dehydrate(&cache, &DehydrateOptions::default());

        assert_eq!(cache.get_query(&hash).unwrap().state, before);
        assert_eq!(cache.query_count(), 1);
    }

    /// A source whose entries vanish between enumeration and read.
    struct VanishingSource;

    impl CacheSource for VanishingSource {
        fn query_hashes(&self) -> Vec<cachescope_core::QueryHash> {
            vec![cachescope_core::QueryHash::from("gone")]
        }

        fn query(&self, _hash: &cachescope_core::QueryHash) -> Option<LiveQuery> {
            None
        }

        fn mutation_ids(&self) -> Vec<MutationId> {
            vec![MutationId(9)]
        }

        fn mutation(&self, _id: MutationId) -> Option<DehydratedMutation> {
            None
        }
    }

    #[test]
    fn test_vanished_entries_are_skipped() {
        let state = dehydrate(&VanishingSource, &DehydrateOptions::default());
        assert!(state.is_empty());
    }
}
