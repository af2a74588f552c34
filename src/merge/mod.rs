//! Merge reconciler.
//!
//! For every cluster of a strategy holding at least two citation ids, the
//! reconciler collapses the matching citation records of the search index
//! into one canonical record:
//!
//! 1. fetch the cluster's citation records; fewer than two means nothing to do
//! 2. merge them into the record with the smallest id, unioning backlinks
//! 3. rewrite the references of every citing document to the canonical id
//! 4. delete the superseded records
//!
//! Groups are flushed to the index in batches. A batch's merged records and
//! reference rewrites are committed before any of its deletes are issued, so
//! a citing document never points at a deleted record. A batch the index
//! rejects is retried group by group. Every step converges
//! when repeated, which makes a failed or interrupted run safe to rerun.

mod index;
mod memory;

pub use index::{IndexDocument, ReferenceUpdate, SearchIndex, fields};
pub use memory::{IndexOperation, MemoryIndex};

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::cluster::{Cluster, ClusterStore};
use crate::config::ReconcileConfig;
use crate::error::{DedupError, IndexError};
use crate::fingerprint::Strategy;
use crate::normalize::{Field, NormalizedFields};
use crate::retry::{RetryPolicy, retry_with_backoff};

/// Result of merging the citation records of one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub canonical: IndexDocument,
    pub canonical_id: String,
    /// Ids of the records folded into the canonical one
    pub removed_ids: Vec<String>,
}

/// Index field holding an article scalar.
fn scalar_index_field(field: Field) -> Option<&'static str> {
    match field {
        Field::Volume => Some(fields::VOLUME),
        Field::Issue => Some(fields::ISSUE),
        Field::StartPage => Some(fields::START_PAGE),
        _ => None,
    }
}

/// Merge the citation records of one cluster.
///
/// Records are deduplicated by id and the one with the smallest id becomes
/// the base. The backlink fields of every record are unioned into the base
/// when at least one record carries them, `total_received` is recomputed
/// from the unioned `document_fk`, and the strategy's scalar is copied from
/// the key snapshot when the base lacks it.
///
/// Returns `Ok(None)` when fewer than two distinct records are given.
///
/// # Errors
///
/// Returns [`IndexError::Malformed`] when a record has no id.
pub fn merge_documents(
    documents: Vec<IndexDocument>,
    strategy: Strategy,
    key_snapshot: &NormalizedFields,
) -> Result<Option<MergeOutcome>, IndexError> {
    let mut by_id: BTreeMap<String, IndexDocument> = BTreeMap::new();
    for document in documents {
        let Some(id) = document.id().map(str::to_string) else {
            return Err(IndexError::Malformed {
                id: String::new(),
                reason: "citation record without id".to_string(),
            });
        };
        by_id.entry(id).or_insert(document);
    }
    if by_id.len() < 2 {
        return Ok(None);
    }

    let mut records = by_id.into_iter();
    let Some((canonical_id, mut canonical)) = records.next() else {
        return Ok(None);
    };
    let others: Vec<(String, IndexDocument)> = records.collect();

    for field in fields::BACKLINKS {
        let carriers: Vec<Vec<String>> = std::iter::once(&canonical)
            .chain(others.iter().map(|(_, document)| document))
            .filter_map(|document| document.get_strings(field))
            .collect();
        if carriers.is_empty() {
            continue;
        }
        let union: Vec<String> = carriers.into_iter().flatten().unique().collect();
        canonical.set_strings(field, union);
    }

    if let Some(backlinks) = canonical.get_strings(fields::DOCUMENT_FK) {
        canonical.set(fields::TOTAL_RECEIVED, backlinks.len().to_string());
    }

    if let Some(field) = strategy.scalar_field()
        && let Some(index_field) = scalar_index_field(field)
        && canonical.get_str(index_field).is_none()
        && let Some(value) = key_snapshot.get(field)
    {
        canonical.set(index_field, value);
    }

    Ok(Some(MergeOutcome {
        canonical,
        canonical_id,
        removed_ids: others.into_iter().map(|(id, _)| id).collect(),
    }))
}

/// Outcome of reconciling one strategy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Merge groups read from the cluster store
    pub groups: usize,
    /// Groups collapsed into a canonical record
    pub merged: usize,
    /// Superseded records deleted
    pub removed: usize,
    /// Citing documents whose references were rewritten
    pub updated: usize,
    /// Groups with fewer than two records in the index
    pub skipped: usize,
    /// Groups that failed and were left as they were
    pub failed: usize,
    /// Hashes of the failed groups
    pub failed_hashes: Vec<String>,
}

impl ReconcileReport {
    fn record(&mut self, plans: &[MergePlan]) {
        self.merged += plans.len();
        for plan in plans {
            self.removed += plan.outcome.removed_ids.len();
            self.updated += plan.references.len();
        }
    }

    fn fail(&mut self, hashes: impl IntoIterator<Item = String>) {
        for hash in hashes {
            self.failed += 1;
            self.failed_hashes.push(hash);
        }
    }
}

/// A merged group waiting to be flushed.
struct MergePlan {
    hash: String,
    outcome: MergeOutcome,
    references: Vec<ReferenceUpdate>,
}

/// Collapses duplicated citation records of the search index, one strategy
/// at a time.
///
/// Reconciliation must not run concurrently with accumulation of the same
/// strategy.
pub struct Reconciler<'a, S: ?Sized, I: ?Sized> {
    store: &'a S,
    index: &'a I,
    config: ReconcileConfig,
}

impl<'a, S, I> Reconciler<'a, S, I>
where
    S: ClusterStore + ?Sized,
    I: SearchIndex + ?Sized,
{
    pub fn new(store: &'a S, index: &'a I, config: ReconcileConfig) -> Self {
        Self {
            store,
            index,
            config,
        }
    }

    /// Reconcile every merge group of `strategy`.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the merge groups cannot be
    /// read. Failures of individual groups are counted in the report and do
    /// not stop the run.
    pub fn reconcile(&self, strategy: Strategy) -> Result<ReconcileReport, DedupError> {
        self.config.validate()?;
        let policy = self.config.retry_policy();

        let groups = retry_with_backoff(&format!("load {strategy} merge groups"), &policy, || {
            self.store.merge_groups(strategy)
        })?;
        log::info!("{}: reconciling {} merge groups", strategy, groups.len());

        let mut report = ReconcileReport {
            groups: groups.len(),
            ..Default::default()
        };
        let mut batch: Vec<MergePlan> = Vec::new();

        for cluster in &groups {
            match self.plan_group(strategy, cluster, &policy) {
                Ok(Some(plan)) => batch.push(plan),
                Ok(None) => {
                    log::debug!("{}: {} has no duplicates in the index", strategy, cluster.hash);
                    report.skipped += 1;
                }
                Err(e) => {
                    log::warn!("{}: group {} skipped: {}", strategy, cluster.hash, e);
                    report.fail([cluster.hash.clone()]);
                }
            }

            if batch.len() >= self.config.commit_every {
                self.flush(strategy, std::mem::take(&mut batch), &policy, &mut report);
            }
        }
        if !batch.is_empty() {
            self.flush(strategy, batch, &policy, &mut report);
        }

        log::info!(
            "{}: {} merged, {} removed, {} citing documents updated, {} skipped, {} failed",
            strategy,
            report.merged,
            report.removed,
            report.updated,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    /// Reconcile every strategy in turn.
    pub fn reconcile_all(&self) -> Result<Vec<(Strategy, ReconcileReport)>, DedupError> {
        Strategy::ALL
            .into_iter()
            .map(|strategy| Ok((strategy, self.reconcile(strategy)?)))
            .collect()
    }

    /// Fetch and merge one group, and prepare its reference rewrites.
    fn plan_group(
        &self,
        strategy: Strategy,
        cluster: &Cluster,
        policy: &RetryPolicy,
    ) -> Result<Option<MergePlan>, IndexError> {
        let citation_ids: Vec<String> = cluster.citation_ids.iter().cloned().collect();
        let documents = self.fetch_all(&format!("fetch {}", cluster.hash), &citation_ids, policy)?;

        let Some(outcome) = merge_documents(documents, strategy, &cluster.key_snapshot)? else {
            return Ok(None);
        };

        let citing_ids: Vec<String> = cluster.citing_document_ids.iter().cloned().collect();
        let citing =
            self.fetch_all(&format!("fetch citing {}", cluster.hash), &citing_ids, policy)?;

        let references = citing
            .iter()
            .filter_map(|document| {
                let id = document.id()?;
                let cited = document.get_strings(fields::CITATION_FK)?;
                let remove: Vec<String> = outcome
                    .removed_ids
                    .iter()
                    .filter(|removed| cited.contains(removed))
                    .cloned()
                    .collect();
                (!remove.is_empty()).then(|| ReferenceUpdate {
                    id: id.to_string(),
                    remove,
                    add: outcome.canonical_id.clone(),
                })
            })
            .collect();

        Ok(Some(MergePlan {
            hash: cluster.hash.clone(),
            outcome,
            references,
        }))
    }

    /// Fetch `ids` in pages of at most `rows` ids each.
    fn fetch_all(
        &self,
        label: &str,
        ids: &[String],
        policy: &RetryPolicy,
    ) -> Result<Vec<IndexDocument>, IndexError> {
        let mut documents = Vec::with_capacity(ids.len());
        for page in ids.chunks(self.config.rows) {
            documents.extend(retry_with_backoff(label, policy, || {
                self.index.fetch(page, self.config.rows)
            })?);
        }
        Ok(documents)
    }

    /// Write a batch of merged groups. When the index rejects the batch, the
    /// groups are written one at a time so only the rejected ones fail.
    fn flush(
        &self,
        strategy: Strategy,
        batch: Vec<MergePlan>,
        policy: &RetryPolicy,
        report: &mut ReconcileReport,
    ) {
        match self.write(strategy, &batch, policy) {
            Ok(()) => report.record(&batch),
            Err(e) if batch.len() > 1 && !e.is_retryable() => {
                log::warn!(
                    "{}: batch of {} groups rejected, writing them one by one: {}",
                    strategy,
                    batch.len(),
                    e
                );
                for plan in batch {
                    let single = std::slice::from_ref(&plan);
                    match self.write(strategy, single, policy) {
                        Ok(()) => report.record(single),
                        Err(e) => {
                            log::warn!("{}: group {} not merged: {}", strategy, plan.hash, e);
                            report.fail([plan.hash]);
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("{}: batch of {} groups not merged: {}", strategy, batch.len(), e);
                report.fail(batch.into_iter().map(|plan| plan.hash));
            }
        }
    }

    /// Canonical records and reference rewrites first, deletes only once
    /// those are committed.
    fn write(
        &self,
        strategy: Strategy,
        plans: &[MergePlan],
        policy: &RetryPolicy,
    ) -> Result<(), IndexError> {
        let canonicals: Vec<IndexDocument> =
            plans.iter().map(|plan| plan.outcome.canonical.clone()).collect();
        let references: Vec<ReferenceUpdate> = plans
            .iter()
            .flat_map(|plan| plan.references.iter().cloned())
            .collect();
        let removed: Vec<String> = plans
            .iter()
            .flat_map(|plan| plan.outcome.removed_ids.iter().cloned())
            .collect();

        retry_with_backoff("add merged records", policy, || self.index.add(&canonicals))?;
        retry_with_backoff("rewrite references", policy, || {
            self.index.update_references(&references)
        })?;
        retry_with_backoff("commit merges", policy, || self.index.commit())?;

        // merges are live from here; a rerun repeats the deletes
        retry_with_backoff("delete superseded records", policy, || {
            self.index.delete(&removed)
        })?;
        retry_with_backoff("commit deletes", policy, || self.index.commit())?;

        log::debug!(
            "{}: flushed {} groups ({} records removed)",
            strategy,
            plans.len(),
            removed.len()
        );
        Ok(())
    }
}
