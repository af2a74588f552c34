//! Chunked corpus traversal.
//!
//! The corpus is processed in fixed-size chunks of document ids. Within a
//! chunk, documents are normalized and fingerprinted on a fixed-size worker
//! pool; workers return their records to the calling thread, which is the
//! single writer to the cluster store. A chunk is fully accumulated before
//! the next one starts, so memory stays bounded by the chunk size and an
//! interrupted run can simply be repeated from the start.

use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::cluster::{AccumulateReport, ClusterStore, accumulate};
use crate::config::PipelineConfig;
use crate::corpus::CorpusSource;
use crate::error::{ConfigError, DedupError};
use crate::fingerprint::{FingerprintRecord, extract_records};
use crate::normalize::JournalTitleLookup;
use crate::retry::retry_with_backoff;

/// Outcome of a fingerprinting run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    /// Documents listed by the corpus
    pub documents: usize,
    /// Documents that could not be read and were skipped
    pub unreadable: usize,
    /// Fingerprint records produced
    pub records: usize,
    pub chunks: usize,
    pub accumulate: AccumulateReport,
    pub elapsed: Duration,
}

/// A configured fingerprinting run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Validate the configuration and prepare a run.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fingerprint every eligible citation of the corpus and accumulate the
    /// results into `store`.
    ///
    /// # Errors
    ///
    /// Fails only when the corpus cannot be listed or the worker pool cannot
    /// be built. Unreadable documents and unwritable batches are reported in
    /// the returned [`PipelineReport`].
    pub fn run<C, S>(
        &self,
        corpus: &C,
        lookup: Option<&dyn JournalTitleLookup>,
        store: &S,
    ) -> Result<PipelineReport, DedupError>
    where
        C: CorpusSource + ?Sized,
        S: ClusterStore + ?Sized,
    {
        let start = Instant::now();
        let config = &self.config;
        let policy = config.retry_policy();

        let ids = retry_with_backoff("list corpus documents", &policy, || {
            corpus.document_ids(config.from_date())
        })?;
        log::info!(
            "Fingerprinting {} documents in chunks of {} with {} workers",
            ids.len(),
            config.chunk_size,
            config.workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build()?;

        let mut report = PipelineReport {
            documents: ids.len(),
            ..Default::default()
        };

        for (index, chunk) in ids.chunks(config.chunk_size).enumerate() {
            let results: Vec<Option<Vec<FingerprintRecord>>> = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|id| self.process_document(corpus, lookup, id))
                    .collect()
            });

            let mut records = Vec::new();
            for result in results {
                match result {
                    Some(document_records) => records.extend(document_records),
                    None => report.unreadable += 1,
                }
            }
            report.records += records.len();

            // barrier: the chunk is persisted before the next one is read
            let accumulated = accumulate(store, records, config);
            log::info!(
                "Chunk {}: {} documents, {} clusters upserted, {} failed batches",
                index + 1,
                chunk.len(),
                accumulated.clusters_upserted,
                accumulated.failed.len()
            );
            report.accumulate.absorb(accumulated);
            report.chunks += 1;
        }

        report.elapsed = start.elapsed();
        log::info!(
            "Fingerprinting done: {} documents, {} records, {} unreadable, {:.1}s",
            report.documents,
            report.records,
            report.unreadable,
            report.elapsed.as_secs_f64()
        );
        if !report.accumulate.failed.is_empty() {
            log::warn!(
                "{} batches failed; their hashes need reprocessing",
                report.accumulate.failed.len()
            );
        }

        Ok(report)
    }

    /// Worker body: read one document and fingerprint its citations.
    ///
    /// Returns `None` when the document cannot be read. A document that
    /// vanished between listing and reading yields no records.
    fn process_document<C: CorpusSource + ?Sized>(
        &self,
        corpus: &C,
        lookup: Option<&dyn JournalTitleLookup>,
        id: &str,
    ) -> Option<Vec<FingerprintRecord>> {
        match corpus.fetch(id) {
            Ok(Some(document)) => Some(extract_records(
                &document,
                &self.config.citation_types,
                lookup,
            )),
            Ok(None) => {
                log::debug!("{id}: no longer in corpus");
                Some(Vec::new())
            }
            Err(e) => {
                log::warn!("{id}: skipped: {e}");
                None
            }
        }
    }
}
