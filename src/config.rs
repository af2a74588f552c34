//! Run configuration for the fingerprinting pipeline and the reconciler.
//!
//! Both configurations are plain values passed into each run. Nothing is
//! read from the environment and no state is shared between runs.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::PublicationType;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Configuration of a fingerprinting run.
///
/// # Examples
///
/// ```
/// use citemerge::{PipelineConfig, PublicationType};
///
/// let mut config = PipelineConfig::new();
/// config
///     .set_citation_types([PublicationType::Article])
///     .set_chunk_size(500)
///     .set_from_date("2020-01-01");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Citation types to fingerprint; all others are ignored
    pub(crate) citation_types: BTreeSet<PublicationType>,
    /// Number of corpus documents per chunk
    pub(crate) chunk_size: usize,
    /// Size of the worker pool
    pub(crate) workers: usize,
    /// Number of cluster updates per store write
    pub(crate) batch_size: usize,
    /// Retries of a failed store write
    pub(crate) max_retries: u32,
    /// Wait before the first retry, in milliseconds
    pub(crate) retry_backoff_ms: u64,
    /// Only process documents published on or after this `YYYY-MM-DD` date
    pub(crate) from_date: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineConfig {
    /// Creates a new pipeline configuration with default settings
    #[must_use]
    pub fn new() -> Self {
        Self {
            citation_types: BTreeSet::from([
                PublicationType::Article,
                PublicationType::Book,
                PublicationType::BookChapter,
            ]),
            chunk_size: 2000,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            batch_size: 1000,
            max_retries: 3,
            retry_backoff_ms: 500,
            from_date: None,
        }
    }

    /// Sets the citation types to process
    pub fn set_citation_types(
        &mut self,
        types: impl IntoIterator<Item = PublicationType>,
    ) -> &mut Self {
        self.citation_types = types.into_iter().collect();
        self
    }

    /// Sets the number of documents per chunk
    pub fn set_chunk_size(&mut self, chunk_size: usize) -> &mut Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the size of the worker pool
    pub fn set_workers(&mut self, workers: usize) -> &mut Self {
        self.workers = workers;
        self
    }

    /// Sets the number of cluster updates per store write
    pub fn set_batch_size(&mut self, batch_size: usize) -> &mut Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the number of retries of a failed store write
    pub fn set_max_retries(&mut self, max_retries: u32) -> &mut Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the wait before the first retry
    pub fn set_retry_backoff(&mut self, backoff: Duration) -> &mut Self {
        self.retry_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Restricts the run to documents published on or after `date` (`YYYY-MM-DD`)
    pub fn set_from_date(&mut self, date: &str) -> &mut Self {
        self.from_date = Some(date.to_string());
        self
    }

    pub fn citation_types(&self) -> &BTreeSet<PublicationType> {
        &self.citation_types
    }

    pub fn from_date(&self) -> Option<&str> {
        self.from_date.as_deref()
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.citation_types.is_empty() {
            return Err(ConfigError::NoCitationTypes);
        }
        require_positive("chunk_size", self.chunk_size)?;
        require_positive("workers", self.workers)?;
        require_positive("batch_size", self.batch_size)?;
        if let Some(date) = &self.from_date
            && NaiveDate::parse_from_str(date, DATE_FORMAT).is_err()
        {
            return Err(ConfigError::BadValue {
                field: "from_date",
                value: date.clone(),
                reason: "expected YYYY-MM-DD".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Configuration of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Row limit of index queries; must exceed the largest cluster
    pub(crate) rows: usize,
    /// Number of merge groups flushed per index commit
    pub(crate) commit_every: usize,
    /// Retries of a failed index call
    pub(crate) max_retries: u32,
    /// Wait before the first retry, in milliseconds
    pub(crate) retry_backoff_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileConfig {
    /// Creates a new reconciliation configuration with default settings
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: 10_000,
            commit_every: 1000,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }

    /// Sets the row limit of index queries
    pub fn set_rows(&mut self, rows: usize) -> &mut Self {
        self.rows = rows;
        self
    }

    /// Sets the number of merge groups per commit
    pub fn set_commit_every(&mut self, commit_every: usize) -> &mut Self {
        self.commit_every = commit_every;
        self
    }

    /// Sets the number of retries of a failed index call
    pub fn set_max_retries(&mut self, max_retries: u32) -> &mut Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the wait before the first retry
    pub fn set_retry_backoff(&mut self, backoff: Duration) -> &mut Self {
        self.retry_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("rows", self.rows)?;
        require_positive("commit_every", self.commit_every)?;
        Ok(())
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

fn require_positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { field })
    } else {
        Ok(())
    }
}
