//! Error types for fingerprinting, cluster storage, and index reconciliation.
//!
//! Each external collaborator (cluster store, search index, corpus reader)
//! has its own error enum so callers can decide which failures are worth a
//! retry. [`DedupError`] is the top-level type returned by whole-run
//! operations; per-batch and per-group failures are reported in the run
//! reports instead of aborting the run.

use thiserror::Error;

/// Top-level error type for pipeline and reconciliation runs.
#[derive(Error, Debug)]
pub enum DedupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Errors raised by a cluster store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Cluster store unavailable: {0}")]
    Unavailable(String),

    #[error("Cluster store timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("Cluster store rejected write to {collection}: {reason}")]
    Rejected { collection: String, reason: String },
}

impl StoreError {
    /// Whether repeating the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

/// Errors raised by a search index backend.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Search index unavailable: {0}")]
    Unavailable(String),

    #[error("Search index timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("Search index rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    #[error("Malformed index document {id}: {reason}")]
    Malformed { id: String, reason: String },
}

impl IndexError {
    /// Whether repeating the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

/// Errors raised by a corpus reader.
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Corpus unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed corpus record {id}: {reason}")]
    Malformed { id: String, reason: String },
}

/// Invalid run configuration.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("Bad value for {field}: \"{value}\" ({reason})")]
    BadValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("No citation types selected")]
    NoCitationTypes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_retryable() {
        assert!(StoreError::Unavailable("connection refused".to_string()).is_retryable());
        assert!(StoreError::Timeout { millis: 500 }.is_retryable());
        assert!(
            !StoreError::Rejected {
                collection: "dedup-book".to_string(),
                reason: "document too large".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_index_error_retryable() {
        assert!(IndexError::Timeout { millis: 30_000 }.is_retryable());
        assert!(
            !IndexError::Malformed {
                id: "S0001-37652001000100001-scl".to_string(),
                reason: "missing id".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::BadValue {
            field: "from_date",
            value: "2020/01/01".to_string(),
            reason: "expected YYYY-MM-DD".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Bad value for from_date: \"2020/01/01\" (expected YYYY-MM-DD)"
        );
        assert_eq!(
            ConfigError::Zero { field: "chunk_size" }.to_string(),
            "chunk_size must be greater than zero"
        );
    }

    #[test]
    fn test_dedup_error_from_store() {
        let error: DedupError = StoreError::Unavailable("down".to_string()).into();
        assert!(matches!(error, DedupError::Store(_)));
        assert_eq!(error.to_string(), "Cluster store unavailable: down");
    }
}
