use super::{Cluster, ClusterUpdate};
use crate::error::StoreError;
use crate::fingerprint::Strategy;

/// Persistent home of the clusters, one logical collection per [`Strategy`].
///
/// Writes go through [`upsert_union`](ClusterStore::upsert_union), a
/// merge-on-write operation the backend must apply atomically per cluster:
/// the citation and citing-document sets are unioned with the stored ones
/// and the key snapshot is overwritten. Callers never read a cluster to
/// write it back, so concurrent writers of the same hash cannot lose members.
pub trait ClusterStore: Send + Sync {
    /// Apply a batch of set-union upserts to the collection of `strategy`.
    ///
    /// A batch either fails as a whole or is applied as a whole; applying the
    /// same batch twice leaves the store unchanged. Returns the number of
    /// clusters touched.
    fn upsert_union(
        &self,
        strategy: Strategy,
        updates: &[ClusterUpdate],
    ) -> Result<usize, StoreError>;

    /// Every cluster of `strategy` holding at least two citation ids.
    fn merge_groups(&self, strategy: Strategy) -> Result<Vec<Cluster>, StoreError>;

    /// A single cluster by hash.
    fn get(&self, strategy: Strategy, hash: &str) -> Result<Option<Cluster>, StoreError>;
}
