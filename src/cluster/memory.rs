//! In-memory cluster store.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{Cluster, ClusterStore, ClusterUpdate};
use crate::error::StoreError;
use crate::fingerprint::Strategy;

/// Default prefix of cluster collection names (`dedup-article-volume`, ...).
pub const DEFAULT_COLLECTION_PREFIX: &str = "dedup-";

type Collections = HashMap<String, BTreeMap<String, Cluster>>;

/// A [`ClusterStore`] kept in process memory.
///
/// Each upsert batch runs under one lock, which gives the same per-cluster
/// atomicity a document store's native set-union upsert does. Failures can be
/// queued with [`inject_failures`](MemoryClusterStore::inject_failures) to
/// exercise retry paths.
pub struct MemoryClusterStore {
    prefix: String,
    collections: Mutex<Collections>,
    failures: Mutex<VecDeque<StoreError>>,
    upsert_calls: AtomicUsize,
}

impl Default for MemoryClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClusterStore {
    /// Create an empty store using the default collection prefix.
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_COLLECTION_PREFIX)
    }

    /// Create an empty store with a custom collection prefix.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            collections: Mutex::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            upsert_calls: AtomicUsize::new(0),
        }
    }

    /// Name of the collection holding the clusters of `strategy`.
    pub fn collection_name(&self, strategy: Strategy) -> String {
        format!("{}{}", self.prefix, strategy.as_tag())
    }

    /// Make the next upsert calls fail with these errors, in order.
    pub fn inject_failures(&self, errors: impl IntoIterator<Item = StoreError>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.extend(errors);
        }
    }

    /// How many times `upsert_union()` has been called.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Every cluster of a strategy, ordered by hash.
    pub fn clusters(&self, strategy: Strategy) -> Result<Vec<Cluster>, StoreError> {
        let collections = self.lock()?;
        Ok(collections
            .get(&self.collection_name(strategy))
            .map(|clusters| clusters.values().cloned().collect())
            .unwrap_or_default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>, StoreError> {
        self.collections
            .lock()
            .map_err(|_| StoreError::Unavailable("cluster store lock poisoned".to_string()))
    }

    fn next_failure(&self) -> Option<StoreError> {
        self.failures.lock().ok().and_then(|mut f| f.pop_front())
    }
}

impl ClusterStore for MemoryClusterStore {
    fn upsert_union(
        &self,
        strategy: Strategy,
        updates: &[ClusterUpdate],
    ) -> Result<usize, StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.next_failure() {
            return Err(error);
        }

        let collection = self.collection_name(strategy);
        let mut collections = self.lock()?;
        let clusters = collections.entry(collection).or_default();

        for update in updates {
            clusters
                .entry(update.hash.clone())
                .and_modify(|cluster| cluster.apply(update))
                .or_insert_with(|| Cluster::from_update(update));
        }
        Ok(updates.len())
    }

    fn merge_groups(&self, strategy: Strategy) -> Result<Vec<Cluster>, StoreError> {
        Ok(self
            .clusters(strategy)?
            .into_iter()
            .filter(Cluster::is_merge_group)
            .collect())
    }

    fn get(&self, strategy: Strategy, hash: &str) -> Result<Option<Cluster>, StoreError> {
        let collections = self.lock()?;
        Ok(collections
            .get(&self.collection_name(strategy))
            .and_then(|clusters| clusters.get(hash))
            .cloned())
    }
}
