//! Fingerprinting, clustering, and merging of duplicated bibliographic citations.
//!
//! `citemerge` finds citations that appear, slightly reformatted, in many
//! citing documents of a corpus and collapses their search-index records into
//! a single canonical record without breaking the links from citing documents.
//!
//! # Pipeline
//!
//! The work happens in two phases:
//!
//! 1. **Fingerprinting.** Every citation of every corpus document is
//!    [normalized](normalize::normalize) into canonical lowercase fields, then
//!    [fingerprinted](fingerprint::fingerprint) into one blocking key per
//!    matching [`Strategy`]. Citations sharing a key are
//!    [accumulated](cluster::accumulate) into persisted clusters with a
//!    set-union upsert, so repeated or concurrent runs never lose members.
//! 2. **Reconciliation.** For every cluster with at least two citation ids, the
//!    [`Reconciler`](merge::Reconciler) merges the matching search-index
//!    documents into one, rewrites the references of every citing document,
//!    and deletes the superseded records.
//!
//! # Basic Usage
//!
//! ```rust
//! use citemerge::{Field, PublicationType, RawAuthor, RawCitation, Strategy};
//! use citemerge::{fingerprint, normalize};
//!
//! let citation = RawCitation {
//!     sequence: "S0001-3765199000010000100003".to_string(),
//!     publication_type: PublicationType::Article,
//!     first_author: Some(RawAuthor::new("Smith", "J.")),
//!     title: Some("Graph Theory".to_string()),
//!     source: Some("J. Math".to_string()),
//!     volume: Some("12".to_string()),
//!     publication_date: Some("1990".to_string()),
//!     ..Default::default()
//! };
//!
//! let fields = normalize(&citation, None);
//! assert_eq!(fields.get(Field::FirstAuthor), Some("j smith"));
//! assert_eq!(fields.get(Field::JournalTitle), Some("j math"));
//!
//! // Only the volume strategy has every field it needs.
//! let keys = fingerprint(&fields, citation.publication_type);
//! assert_eq!(keys.len(), 1);
//! assert_eq!(keys[0].1, Strategy::ArticleVolume);
//! ```
//!
//! # Running Both Phases
//!
//! ```rust
//! use citemerge::cluster::MemoryClusterStore;
//! use citemerge::corpus::MemoryCorpus;
//! use citemerge::merge::{MemoryIndex, Reconciler};
//! use citemerge::pipeline::Pipeline;
//! use citemerge::{PipelineConfig, ReconcileConfig, Strategy};
//!
//! let corpus = MemoryCorpus::new();
//! let store = MemoryClusterStore::new();
//! let index = MemoryIndex::new();
//!
//! let pipeline = Pipeline::new(PipelineConfig::new()).unwrap();
//! let report = pipeline.run(&corpus, None, &store).unwrap();
//! assert_eq!(report.documents, 0);
//!
//! let reconciler = Reconciler::new(&store, &index, ReconcileConfig::new());
//! let stats = reconciler.reconcile(Strategy::ArticleVolume).unwrap();
//! assert_eq!(stats.merged, 0);
//! ```
//!
//! # External Collaborators
//!
//! The corpus reader, the cluster store, and the search index are traits
//! ([`CorpusSource`](corpus::CorpusSource), [`ClusterStore`](cluster::ClusterStore),
//! [`SearchIndex`](merge::SearchIndex)). In-memory implementations ship with the
//! crate for tests and small runs; production hosts plug in their own.
//!
//! # Thread Safety
//!
//! Fingerprinting runs on a fixed-size worker pool. Workers share no mutable
//! state: they return [`FingerprintRecord`]s to a single writer, and the only
//! cross-worker synchronization point is the store's atomic set-union upsert.

use serde::{Deserialize, Serialize};

pub mod cluster;
pub mod config;
pub mod corpus;
pub mod error;
pub mod fingerprint;
pub mod merge;
pub mod normalize;
pub mod pipeline;

mod regex;
mod retry;
mod utils;

// Reexports
pub use cluster::accumulate;
pub use config::{PipelineConfig, ReconcileConfig};
pub use error::{ConfigError, CorpusError, DedupError, IndexError, StoreError};
pub use fingerprint::{FingerprintRecord, Strategy, fingerprint};
pub use merge::Reconciler;
pub use normalize::{Field, JournalTitleLookup, NormalizedFields, normalize};

/// Kind of cited work.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum PublicationType {
    Article,
    Book,
    BookChapter,
    /// Theses, reports, web pages and anything else; never fingerprinted.
    #[default]
    #[serde(other)]
    Other,
}

impl PublicationType {
    /// Convert the type to its corpus representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationType::Article => "article",
            PublicationType::Book => "book",
            PublicationType::BookChapter => "book-chapter",
            PublicationType::Other => "other",
        }
    }

    /// Whether citations of this type are fingerprinted with the book strategies.
    pub fn is_book_like(&self) -> bool {
        matches!(self, PublicationType::Book | PublicationType::BookChapter)
    }
}

impl std::fmt::Display for PublicationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An author as written in a citation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawAuthor {
    /// Family name, possibly with particles ("van der Valk").
    #[serde(deserialize_with = "utils::lenient_text")]
    pub surname: Option<String>,
    /// Given names or initials.
    #[serde(deserialize_with = "utils::lenient_text")]
    pub given_names: Option<String>,
}

impl RawAuthor {
    /// Create an author from a surname and given names.
    pub fn new(surname: &str, given_names: &str) -> Self {
        Self {
            surname: Some(surname.to_string()),
            given_names: Some(given_names.to_string()),
        }
    }
}

/// One citation as extracted from a citing document.
///
/// Every text field is free text straight from the corpus; nothing here is
/// cleaned. Numbers are read as text; missing and malformed fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCitation {
    /// Citation sequence id, unique within its collection.
    #[serde(deserialize_with = "utils::lenient_string")]
    pub sequence: String,
    /// Type of the cited work
    #[serde(deserialize_with = "utils::lenient")]
    pub publication_type: PublicationType,
    /// First author of the whole record
    #[serde(deserialize_with = "utils::lenient")]
    pub first_author: Option<RawAuthor>,
    /// Chapter-level authors, for book chapters
    #[serde(deserialize_with = "utils::lenient_items")]
    pub analytic_authors: Vec<RawAuthor>,
    /// Book-level authors, for book chapters
    #[serde(deserialize_with = "utils::lenient_items")]
    pub monographic_authors: Vec<RawAuthor>,
    /// Article title
    #[serde(deserialize_with = "utils::lenient_text")]
    pub title: Option<String>,
    /// Chapter title, for book chapters
    #[serde(deserialize_with = "utils::lenient_text")]
    pub chapter_title: Option<String>,
    /// Journal name for articles, book title for books
    #[serde(deserialize_with = "utils::lenient_text")]
    pub source: Option<String>,
    #[serde(deserialize_with = "utils::lenient_text")]
    pub publisher: Option<String>,
    #[serde(deserialize_with = "utils::lenient_text")]
    pub publisher_address: Option<String>,
    #[serde(deserialize_with = "utils::lenient_text")]
    pub volume: Option<String>,
    #[serde(deserialize_with = "utils::lenient_text")]
    pub issue: Option<String>,
    #[serde(deserialize_with = "utils::lenient_text")]
    pub start_page: Option<String>,
    #[serde(deserialize_with = "utils::lenient_text")]
    pub end_page: Option<String>,
    #[serde(deserialize_with = "utils::lenient_text")]
    pub publication_date: Option<String>,
}

impl RawCitation {
    /// The author that stands for the whole record.
    ///
    /// Falls back to the first analytic, then monographic, author when no
    /// explicit first author was extracted.
    pub fn record_first_author(&self) -> Option<&RawAuthor> {
        self.first_author
            .as_ref()
            .or_else(|| self.analytic_authors.first())
            .or_else(|| self.monographic_authors.first())
    }
}

/// A document of the corpus together with the citations it makes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CitingDocument {
    /// Publisher-assigned document id (PID)
    pub publisher_id: String,
    /// Acronym of the collection the document belongs to
    pub collection_acronym: String,
    /// Publication date, `YYYY-MM-DD` or a prefix of it
    #[serde(deserialize_with = "utils::lenient_text")]
    pub publication_date: Option<String>,
    /// Citations in the order they appear in the document
    #[serde(deserialize_with = "utils::lenient_items")]
    pub citations: Vec<RawCitation>,
}

impl CitingDocument {
    /// Globally unique id of the citing document: `<publisher_id>-<collection>`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.publisher_id, self.collection_acronym)
    }

    /// Identity of one of this document's citations.
    pub fn identity_of(&self, citation: &RawCitation) -> CitationIdentity {
        CitationIdentity {
            sequence_id: citation.sequence.clone(),
            citing_document_id: self.id(),
            collection_acronym: self.collection_acronym.clone(),
        }
    }
}

/// Identity of a citation, stable for the lifetime of its citing document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CitationIdentity {
    pub sequence_id: String,
    pub citing_document_id: String,
    pub collection_acronym: String,
}

impl CitationIdentity {
    /// Globally unique citation id: `<sequence_id>-<collection>`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.sequence_id, self.collection_acronym)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_citation_identity() {
        let document = CitingDocument {
            publisher_id: "S0001-37652001000100001".to_string(),
            collection_acronym: "scl".to_string(),
            ..Default::default()
        };
        let citation = RawCitation {
            sequence: "S0001-3765200100010000100004".to_string(),
            ..Default::default()
        };
        let identity = document.identity_of(&citation);
        assert_eq!(identity.id(), "S0001-3765200100010000100004-scl");
        assert_eq!(identity.citing_document_id, "S0001-37652001000100001-scl");
    }

    #[test]
    fn test_record_first_author_fallback() {
        let citation = RawCitation {
            monographic_authors: vec![RawAuthor::new("Knuth", "Donald")],
            ..Default::default()
        };
        assert_eq!(
            citation.record_first_author(),
            Some(&RawAuthor::new("Knuth", "Donald"))
        );

        let citation = RawCitation {
            first_author: Some(RawAuthor::new("Smith", "J")),
            analytic_authors: vec![RawAuthor::new("Jones", "A")],
            ..Default::default()
        };
        assert_eq!(
            citation.record_first_author(),
            Some(&RawAuthor::new("Smith", "J"))
        );
        assert_eq!(RawCitation::default().record_first_author(), None);
    }

    #[test]
    fn test_publication_type_serde() {
        let parsed: PublicationType = serde_json::from_str("\"book-chapter\"").unwrap();
        assert_eq!(parsed, PublicationType::BookChapter);
        let parsed: PublicationType = serde_json::from_str("\"thesis\"").unwrap();
        assert_eq!(parsed, PublicationType::Other);
        assert_eq!(PublicationType::Article.to_string(), "article");
        assert!(PublicationType::BookChapter.is_book_like());
        assert!(!PublicationType::Article.is_book_like());
    }

    #[test]
    fn test_citing_document_from_json() {
        let json = r#"{
            "publisher_id": "S0102-311X2004000100001",
            "collection_acronym": "scl",
            "citations": [
                {"sequence": "S0102-311X200400010000100001", "publication_type": "article",
                 "first_author": {"surname": "Smith", "given_names": "J."},
                 "title": "Graph Theory", "volume": "12"}
            ]
        }"#;
        let document: CitingDocument = serde_json::from_str(json).unwrap();
        assert_eq!(document.id(), "S0102-311X2004000100001-scl");
        assert_eq!(document.citations.len(), 1);
        assert_eq!(document.citations[0].volume.as_deref(), Some("12"));
        assert_eq!(document.citations[0].issue, None);
    }
}
