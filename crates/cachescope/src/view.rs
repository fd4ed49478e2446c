//! Per-device views: the entries the dashboard currently shows.
//!
//! A view is fed from a device's mirror cache and filtered by storage
//! category on the way in. Disabling a category removes its entries from
//! the view only; the mirror keeps them. Re-enabling does not bring them
//! back. They reappear when the device next sends them.

use std::collections::BTreeMap;

use cachescope_core::{
    classify, is_visible, DehydratedMutation, DehydratedQuery, DehydratedState,
    EnabledCategories, MutationId, QueryHash, QueryKey, StorageCategory,
};

/// Materialized queries and mutations for one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheView {
    queries: BTreeMap<QueryHash, DehydratedQuery>,
    mutations: BTreeMap<MutationId, DehydratedMutation>,
}

impl CacheView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `query` if its category is enabled.
    ///
    /// Returns false if the query was suppressed.
    pub fn offer_query(&mut self, query: DehydratedQuery, enabled: &EnabledCategories) -> bool {
        if !is_visible(&query.query_key, enabled) {
            return false;
        }
        self.queries.insert(query.query_hash.clone(), query);
        true
    }

    /// Insert or replace `mutation` if its category is enabled.
    pub fn offer_mutation(
        &mut self,
        mutation: DehydratedMutation,
        enabled: &EnabledCategories,
    ) -> bool {
        if !mutation_visible(&mutation, enabled) {
            return false;
        }
        self.mutations.insert(mutation.mutation_id, mutation);
        true
    }

    /// Remove every entry of `category`. Returns how many were removed.
    pub fn hide_category(&mut self, category: StorageCategory) -> usize {
        let before = self.len();
        self.queries
            .retain(|_, query| classify(&query.query_key) != Some(category));
        self.mutations.retain(|_, mutation| {
            mutation
                .mutation_key
                .as_ref()
                .and_then(classify)
                != Some(category)
        });
        before - self.len()
    }

    pub fn query(&self, hash: &QueryHash) -> Option<&DehydratedQuery> {
        self.queries.get(hash)
    }

    pub(crate) fn query_mut(&mut self, hash: &QueryHash) -> Option<&mut DehydratedQuery> {
        self.queries.get_mut(hash)
    }

    pub fn remove_query(&mut self, hash: &QueryHash) -> Option<DehydratedQuery> {
        self.queries.remove(hash)
    }

    /// Queries ordered by hash.
    pub fn queries(&self) -> impl Iterator<Item = &DehydratedQuery> {
        self.queries.values()
    }

    /// Mutations ordered by id.
    pub fn mutations(&self) -> impl Iterator<Item = &DehydratedMutation> {
        self.mutations.values()
    }

    pub fn len(&self) -> usize {
        self.queries.len() + self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty() && self.mutations.is_empty()
    }

    /// The view as a snapshot.
    pub fn to_state(&self) -> DehydratedState {
        DehydratedState {
            mutations: self.mutations.values().cloned().collect(),
            queries: self.queries.values().cloned().collect(),
        }
    }
}

fn mutation_visible(mutation: &DehydratedMutation, enabled: &EnabledCategories) -> bool {
    mutation
        .mutation_key
        .as_ref()
        .map_or(true, |key: &QueryKey| is_visible(key, enabled))
}
