//! Cluster accumulator.
//!
//! Collects [`FingerprintRecord`]s into persisted clusters: one cluster per
//! `(strategy, hash)`, holding every citation id and citing document id that
//! produced the hash. All writes are set-union upserts, so accumulation is
//! associative, commutative and idempotent. Batches can be split, retried,
//! reordered or replayed without changing the final state.

mod memory;
mod store;

pub use memory::{DEFAULT_COLLECTION_PREFIX, MemoryClusterStore};
pub use store::ClusterStore;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::fingerprint::{FingerprintRecord, Strategy};
use crate::normalize::NormalizedFields;
use crate::retry::retry_with_backoff;

/// A persisted group of citations sharing one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// The fingerprint; primary key within the strategy's collection
    pub hash: String,
    pub citation_ids: BTreeSet<String>,
    pub citing_document_ids: BTreeSet<String>,
    /// Normalized fields that produced the hash
    pub key_snapshot: NormalizedFields,
    pub last_updated: NaiveDate,
}

impl Cluster {
    /// Whether the cluster holds at least two citations and so is a
    /// candidate for merging.
    pub fn is_merge_group(&self) -> bool {
        self.citation_ids.len() >= 2
    }

    pub(crate) fn from_update(update: &ClusterUpdate) -> Self {
        Self {
            hash: update.hash.clone(),
            citation_ids: update.citation_ids.clone(),
            citing_document_ids: update.citing_document_ids.clone(),
            key_snapshot: update.key_snapshot.clone(),
            last_updated: update.update_date,
        }
    }

    /// Merge-on-write: union both sets, overwrite the snapshot.
    pub(crate) fn apply(&mut self, update: &ClusterUpdate) {
        self.citation_ids.extend(update.citation_ids.iter().cloned());
        self.citing_document_ids
            .extend(update.citing_document_ids.iter().cloned());
        self.key_snapshot = update.key_snapshot.clone();
        self.last_updated = self.last_updated.max(update.update_date);
    }
}

/// One set-union upsert against a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterUpdate {
    pub hash: String,
    /// Added to the cluster's citation ids
    pub citation_ids: BTreeSet<String>,
    /// Added to the cluster's citing document ids
    pub citing_document_ids: BTreeSet<String>,
    /// Replaces the cluster's key snapshot
    pub key_snapshot: NormalizedFields,
    pub update_date: NaiveDate,
}

/// A batch that could not be written after every retry.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedBatch {
    pub strategy: Strategy,
    /// Hashes to reprocess
    pub hashes: Vec<String>,
    pub error: String,
}

/// Outcome of an accumulation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulateReport {
    /// Records received
    pub records: usize,
    /// Cluster upserts acknowledged by the store
    pub clusters_upserted: usize,
    /// Batches written successfully
    pub batches_written: usize,
    pub failed: Vec<FailedBatch>,
}

impl AccumulateReport {
    /// Fold another report into this one.
    pub fn absorb(&mut self, other: AccumulateReport) {
        self.records += other.records;
        self.clusters_upserted += other.clusters_upserted;
        self.batches_written += other.batches_written;
        self.failed.extend(other.failed);
    }

    /// Every hash left for reprocessing.
    pub fn failed_hashes(&self) -> impl Iterator<Item = &str> {
        self.failed
            .iter()
            .flat_map(|batch| batch.hashes.iter().map(String::as_str))
    }
}

/// Coalesce records into one update per `(strategy, hash)`.
///
/// Records of the same hash carry the same snapshot, so coalescing only
/// shrinks the writes; the resulting state is the same as writing each record
/// on its own.
pub fn group_records(
    records: Vec<FingerprintRecord>,
    update_date: NaiveDate,
) -> BTreeMap<Strategy, Vec<ClusterUpdate>> {
    let mut grouped: BTreeMap<Strategy, BTreeMap<String, ClusterUpdate>> = BTreeMap::new();

    for record in records {
        let updates = grouped.entry(record.strategy).or_default();
        match updates.get_mut(&record.hash) {
            Some(update) => {
                update.citation_ids.insert(record.citation_id);
                update.citing_document_ids.insert(record.citing_document_id);
                update.key_snapshot = record.key_snapshot;
            }
            None => {
                updates.insert(
                    record.hash.clone(),
                    ClusterUpdate {
                        hash: record.hash,
                        citation_ids: BTreeSet::from([record.citation_id]),
                        citing_document_ids: BTreeSet::from([record.citing_document_id]),
                        key_snapshot: record.key_snapshot,
                        update_date,
                    },
                );
            }
        }
    }

    grouped
        .into_iter()
        .map(|(strategy, updates)| (strategy, updates.into_values().collect()))
        .collect()
}

/// Persist a set of fingerprint records as cluster upserts.
///
/// Records are coalesced per hash and written in batches of
/// `config.batch_size`. A failed batch is retried as a whole; once retries
/// are exhausted its hashes are logged and reported, and the remaining
/// batches are still written.
pub fn accumulate<S: ClusterStore + ?Sized>(
    store: &S,
    records: Vec<FingerprintRecord>,
    config: &PipelineConfig,
) -> AccumulateReport {
    let mut report = AccumulateReport {
        records: records.len(),
        ..Default::default()
    };
    let policy = config.retry_policy();
    let batch_size = config.batch_size.max(1);
    let today = Utc::now().date_naive();

    for (strategy, updates) in group_records(records, today) {
        for batch in updates.chunks(batch_size) {
            let label = format!("upsert {} batch of {}", strategy, batch.len());
            match retry_with_backoff(&label, &policy, || store.upsert_union(strategy, batch)) {
                Ok(count) => {
                    report.clusters_upserted += count;
                    report.batches_written += 1;
                }
                Err(e) => {
                    let hashes: Vec<String> = batch.iter().map(|u| u.hash.clone()).collect();
                    log::warn!(
                        "{}: {} hashes left for reprocessing: {}",
                        strategy,
                        hashes.len(),
                        hashes.join(", ")
                    );
                    report.failed.push(FailedBatch {
                        strategy,
                        hashes,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    log::debug!(
        "Accumulated {} records into {} cluster upserts ({} failed batches)",
        report.records,
        report.clusters_upserted,
        report.failed.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::normalize::Field;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn record(strategy: Strategy, hash: &str, citation: &str, citing: &str) -> FingerprintRecord {
        let mut key_snapshot = NormalizedFields::new();
        key_snapshot.insert(Field::PublicationDate, "1990");
        FingerprintRecord {
            hash: hash.to_string(),
            strategy,
            citation_id: citation.to_string(),
            citing_document_id: citing.to_string(),
            key_snapshot,
        }
    }

    fn records() -> Vec<FingerprintRecord> {
        vec![
            record(Strategy::ArticleVolume, "h1", "c1-scl", "d1-scl"),
            record(Strategy::ArticleVolume, "h1", "c2-scl", "d2-scl"),
            record(Strategy::ArticleVolume, "h2", "c3-scl", "d2-scl"),
            record(Strategy::ArticleIssue, "h3", "c1-scl", "d1-scl"),
            record(Strategy::Book, "h4", "c4-scl", "d3-scl"),
        ]
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::new();
        config.set_batch_size(2).set_retry_backoff(Duration::ZERO);
        config
    }

    fn snapshot(store: &MemoryClusterStore) -> Vec<(Strategy, Vec<Cluster>)> {
        Strategy::ALL
            .into_iter()
            .map(|s| (s, store.clusters(s).unwrap()))
            .collect()
    }

    #[test]
    fn test_group_records() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let grouped = group_records(records(), date);
        assert_eq!(grouped.len(), 3);

        let volume = &grouped[&Strategy::ArticleVolume];
        assert_eq!(volume.len(), 2);
        assert_eq!(volume[0].hash, "h1");
        assert_eq!(
            volume[0].citation_ids,
            BTreeSet::from(["c1-scl".to_string(), "c2-scl".to_string()])
        );
        assert_eq!(volume[0].update_date, date);
    }

    #[test]
    fn test_accumulate_builds_clusters() {
        let store = MemoryClusterStore::new();
        let report = accumulate(&store, records(), &config());

        assert_eq!(report.records, 5);
        assert_eq!(report.clusters_upserted, 4);
        assert_eq!(report.batches_written, 3);
        assert!(report.failed.is_empty());

        let cluster = store.get(Strategy::ArticleVolume, "h1").unwrap().unwrap();
        assert!(cluster.is_merge_group());
        assert_eq!(
            cluster.citing_document_ids,
            BTreeSet::from(["d1-scl".to_string(), "d2-scl".to_string()])
        );
        assert_eq!(store.merge_groups(Strategy::ArticleVolume).unwrap().len(), 1);
        assert_eq!(store.merge_groups(Strategy::Book).unwrap().len(), 0);
    }

    #[test]
    fn test_accumulate_is_commutative() {
        let forward = MemoryClusterStore::new();
        accumulate(&forward, records(), &config());

        let backward = MemoryClusterStore::new();
        let mut reversed = records();
        reversed.reverse();
        for record in reversed {
            accumulate(&backward, vec![record], &config());
        }

        assert_eq!(snapshot(&forward), snapshot(&backward));
    }

    #[test]
    fn test_accumulate_is_idempotent() {
        let once = MemoryClusterStore::new();
        accumulate(&once, records(), &config());

        let twice = MemoryClusterStore::new();
        accumulate(&twice, records(), &config());
        accumulate(&twice, records(), &config());

        assert_eq!(snapshot(&once), snapshot(&twice));
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let store = MemoryClusterStore::new();
        store.inject_failures([StoreError::Unavailable("primary stepped down".to_string())]);

        let report = accumulate(&store, records(), &config());
        assert!(report.failed.is_empty());
        assert_eq!(report.batches_written, 3);
        assert_eq!(store.upsert_calls(), 4);
    }

    #[test]
    fn test_failed_batch_is_reported_and_run_continues() {
        let store = MemoryClusterStore::new();
        store.inject_failures([StoreError::Rejected {
            collection: "dedup-article-volume".to_string(),
            reason: "write conflict".to_string(),
        }]);

        let report = accumulate(&store, records(), &config());
        assert_eq!(
            report.failed,
            vec![FailedBatch {
                strategy: Strategy::ArticleVolume,
                hashes: vec!["h1".to_string(), "h2".to_string()],
                error: "Cluster store rejected write to dedup-article-volume: write conflict"
                    .to_string(),
            }]
        );
        assert_eq!(report.failed_hashes().collect::<Vec<_>>(), vec!["h1", "h2"]);
        assert_eq!(report.batches_written, 2);
        assert!(store.get(Strategy::ArticleVolume, "h1").unwrap().is_none());
        assert!(store.get(Strategy::ArticleIssue, "h3").unwrap().is_some());
        assert!(store.get(Strategy::Book, "h4").unwrap().is_some());

        // replaying the lost records completes the state
        let retry = accumulate(&store, records(), &config());
        assert!(retry.failed.is_empty());
        let cluster = store.get(Strategy::ArticleVolume, "h1").unwrap().unwrap();
        assert_eq!(cluster.citation_ids.len(), 2);
    }

    #[test]
    fn test_report_absorb() {
        let mut total = AccumulateReport {
            records: 2,
            clusters_upserted: 1,
            batches_written: 1,
            failed: vec![],
        };
        total.absorb(AccumulateReport {
            records: 3,
            clusters_upserted: 2,
            batches_written: 1,
            failed: vec![FailedBatch {
                strategy: Strategy::Book,
                hashes: vec!["h".to_string()],
                error: "down".to_string(),
            }],
        });
        assert_eq!(total.records, 5);
        assert_eq!(total.clusters_upserted, 3);
        assert_eq!(total.failed.len(), 1);
    }
}
