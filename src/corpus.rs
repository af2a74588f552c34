//! Read-only access to the corpus of citing documents.

use std::collections::BTreeMap;

use crate::CitingDocument;
use crate::error::CorpusError;

/// A source of citing documents.
pub trait CorpusSource: Send + Sync {
    /// Ids of every document, optionally only those published on or after
    /// `from_date` (`YYYY-MM-DD`).
    fn document_ids(&self, from_date: Option<&str>) -> Result<Vec<String>, CorpusError>;

    /// A single document by id. Unknown ids yield `Ok(None)`.
    fn fetch(&self, id: &str) -> Result<Option<CitingDocument>, CorpusError>;
}

/// A [`CorpusSource`] held in memory, keyed by citing document id.
#[derive(Debug, Clone, Default)]
pub struct MemoryCorpus {
    documents: BTreeMap<String, CitingDocument>,
}

impl MemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document, replacing any document with the same id.
    pub fn insert(&mut self, document: CitingDocument) -> &mut Self {
        self.documents.insert(document.id(), document);
        self
    }

    /// Load a corpus from a JSON array of documents.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError::Malformed`] when the input is not an array of
    /// documents.
    pub fn from_json(json: &str) -> Result<Self, CorpusError> {
        let documents: Vec<CitingDocument> =
            serde_json::from_str(json).map_err(|e| CorpusError::Malformed {
                id: format!("line {}", e.line()),
                reason: e.to_string(),
            })?;

        let mut corpus = Self::new();
        for document in documents {
            corpus.insert(document);
        }
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl FromIterator<CitingDocument> for MemoryCorpus {
    fn from_iter<T: IntoIterator<Item = CitingDocument>>(iter: T) -> Self {
        let mut corpus = Self::new();
        for document in iter {
            corpus.insert(document);
        }
        corpus
    }
}

impl CorpusSource for MemoryCorpus {
    fn document_ids(&self, from_date: Option<&str>) -> Result<Vec<String>, CorpusError> {
        Ok(self
            .documents
            .iter()
            .filter(|(_, document)| match (from_date, document.publication_date.as_deref()) {
                (None, _) => true,
                // ISO dates order lexicographically; undated documents are excluded
                (Some(min), Some(date)) => date >= min,
                (Some(_), None) => false,
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn fetch(&self, id: &str) -> Result<Option<CitingDocument>, CorpusError> {
        Ok(self.documents.get(id).cloned())
    }
}
