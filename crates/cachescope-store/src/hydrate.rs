//! Cache rehydration: apply a [`DehydratedState`] to a cache.
//!
//! Populates state only. No fetcher runs. Applying the same snapshot twice
//! leaves the cache as a single application did; the second pass reports
//! every entry as [`HydrateResult::Unchanged`].

use cachescope_core::DehydratedState;

use crate::traits::{CacheSink, HydrateResult};

/// Per-entry outcome counts of one rehydration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrateReport {
    pub queries_inserted: usize,
    pub queries_updated: usize,
    pub queries_unchanged: usize,
    pub mutations_inserted: usize,
    pub mutations_updated: usize,
    pub mutations_unchanged: usize,
}

impl HydrateReport {
    /// True if the cache did not change.
    pub fn is_noop(&self) -> bool {
        self.queries_inserted == 0
            && self.queries_updated == 0
            && self.mutations_inserted == 0
            && self.mutations_updated == 0
    }

    fn count_query(&mut self, result: HydrateResult) {
        match result {
            HydrateResult::Inserted => self.queries_inserted += 1,
            HydrateResult::Updated => self.queries_updated += 1,
            HydrateResult::Unchanged => self.queries_unchanged += 1,
        }
    }

    fn count_mutation(&mut self, result: HydrateResult) {
        match result {
            HydrateResult::Inserted => self.mutations_inserted += 1,
            HydrateResult::Updated => self.mutations_updated += 1,
            HydrateResult::Unchanged => self.mutations_unchanged += 1,
        }
    }
}

/// Apply `state` to `cache`.
///
/// Queries are upserted by hash. Mutations are keyed by id: a snapshot
/// repeats every mutation still resident on the remote side, so an id seen
/// before replaces the earlier record instead of adding a second one.
pub fn rehydrate<C: CacheSink + ?Sized>(state: &DehydratedState, cache: &C) -> HydrateReport {
    let mut report = HydrateReport::default();

    for mutation in &state.mutations {
        report.count_mutation(cache.put_mutation(mutation));
    }

    for query in &state.queries {
        let result = cache.upsert_query(query);
        tracing::trace!(query_hash = %query.query_hash, ?result, "rehydrated query");
        report.count_query(result);
    }

    tracing::debug!(?report, "rehydrated snapshot");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, QueryFn};
    use crate::dehydrate::{dehydrate, DehydrateOptions};
    use cachescope_core::{
        DehydratedMutation, DehydratedQuery, ErrorValue, MutationId, MutationState, QueryKey,
        QueryState, Value,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn snapshot() -> DehydratedState {
        DehydratedState {
            mutations: vec![DehydratedMutation::new(
                MutationId(1),
                MutationState::default(),
            )],
            queries: vec![
                DehydratedQuery::new(
                    QueryKey::from(["#storage", "mmkv", "x"]),
                    QueryState::success(Value::from(42), 10),
                ),
                DehydratedQuery::new(
                    QueryKey::from(["todos"]),
                    QueryState::success(Value::array([Value::from("a")]), 11),
                ),
            ],
        }
    }

    #[test]
    fn test_rehydrate_is_idempotent() {
        let state = snapshot();
        let cache = MemoryCache::new();

        let first = rehydrate(&state, &cache);
        assert_eq!(first.queries_inserted, 2);
        assert_eq!(first.mutations_inserted, 1);
        let once = dehydrate(&cache, &DehydrateOptions::default());

        let second = rehydrate(&state, &cache);
        assert!(second.is_noop());
        assert_eq!(second.queries_unchanged, 2);
        assert_eq!(second.mutations_unchanged, 1);

        let twice = dehydrate(&cache, &DehydrateOptions::default());
        assert_eq!(once, twice);
        assert_eq!(cache.mutation_count(), 1);
    }

    #[test]
    fn test_rehydrate_never_fetches() {
        let state = snapshot();
        let cache = MemoryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let fetcher: QueryFn = Arc::new(
            move |_: &QueryKey| -> std::result::Result<Value, ErrorValue> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            },
        );
        let hash = cache.add_query(QueryKey::from(["todos"]), QueryState::default());
        cache.set_query_fn(&hash, fetcher);
        cache.invalidate(&hash);

        let report = rehydrate(&state, &cache);
        assert_eq!(report.queries_updated, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    proptest::proptest! {
        #[test]
        fn prop_second_rehydrate_is_noop(
            entries in proptest::collection::btree_map("[a-z]{1,8}", -1000i64..1000, 0..16)
        ) {
            let state = DehydratedState {
                mutations: Vec::new(),
                queries: entries
                    .iter()
                    .map(|(name, n)| {
                        DehydratedQuery::new(
                            QueryKey::from([name.as_str()]),
                            QueryState::success(Value::from(*n), *n),
                        )
                    })
                    .collect(),
            };
            let cache = MemoryCache::new();
            rehydrate(&state, &cache);
            let count = cache.query_count();

            proptest::prop_assert!(rehydrate(&state, &cache).is_noop());
            proptest::prop_assert_eq!(cache.query_count(), count);
        }
    }

    #[test]
    fn test_roundtrip_through_payload() {
        let source = MemoryCache::new();
        rehydrate(&snapshot(), &source);

        let payload = dehydrate(&source, &DehydrateOptions::default()).to_payload();
        let decoded = DehydratedState::from_payload(&payload).unwrap();

        let mirror = MemoryCache::new();
        rehydrate(&decoded, &mirror);
        assert_eq!(
            dehydrate(&mirror, &DehydrateOptions::default()),
            dehydrate(&source, &DehydrateOptions::default())
        );
    }
}
