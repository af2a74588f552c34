//! In-memory search index.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use super::index::{IndexDocument, ReferenceUpdate, SearchIndex, fields};
use crate::error::IndexError;

/// Operations of a [`MemoryIndex`] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexOperation {
    Fetch,
    Add,
    UpdateReferences,
    Delete,
    Commit,
}

type Documents = BTreeMap<String, IndexDocument>;

enum Pending {
    Add(IndexDocument),
    Update(ReferenceUpdate),
    Delete(String),
}

/// A [`SearchIndex`] kept in process memory.
///
/// Mutations are queued and applied in order on commit. Reference updates use
/// distinct-add semantics on `citation_fk` and ignore unknown documents.
#[derive(Default)]
pub struct MemoryIndex {
    committed: Mutex<Documents>,
    pending: Mutex<Vec<Pending>>,
    failures: Mutex<HashMap<IndexOperation, VecDeque<IndexError>>>,
    commits: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed committed documents directly.
    pub fn insert(&self, document: IndexDocument) -> Result<(), IndexError> {
        let id = document_id(&document)?;
        self.lock_committed()?.insert(id, document);
        Ok(())
    }

    /// Seed documents from a JSON array.
    pub fn from_json(json: &str) -> Result<Self, IndexError> {
        let values: Vec<Value> =
            serde_json::from_str(json).map_err(|e| IndexError::Malformed {
                id: String::new(),
                reason: e.to_string(),
            })?;
        let index = Self::new();
        for value in values {
            index.insert(IndexDocument::from_value(value)?)?;
        }
        Ok(index)
    }

    /// A committed document by id.
    pub fn get(&self, id: &str) -> Option<IndexDocument> {
        self.committed.lock().ok()?.get(id).cloned()
    }

    /// Ids of every committed document.
    pub fn ids(&self) -> Vec<String> {
        self.committed
            .lock()
            .map(|documents| documents.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of mutations waiting for a commit.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or_default()
    }

    /// How many commits succeeded.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make the next calls of `operation` fail with these errors, in order.
    pub fn inject_failures(
        &self,
        operation: IndexOperation,
        errors: impl IntoIterator<Item = IndexError>,
    ) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.entry(operation).or_default().extend(errors);
        }
    }

    fn check(&self, operation: IndexOperation) -> Result<(), IndexError> {
        let failure = self
            .failures
            .lock()
            .ok()
            .and_then(|mut f| f.get_mut(&operation).and_then(VecDeque::pop_front));
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn lock_committed(&self) -> Result<MutexGuard<'_, Documents>, IndexError> {
        self.committed
            .lock()
            .map_err(|_| IndexError::Unavailable("index lock poisoned".to_string()))
    }

    fn lock_pending(&self) -> Result<MutexGuard<'_, Vec<Pending>>, IndexError> {
        self.pending
            .lock()
            .map_err(|_| IndexError::Unavailable("index lock poisoned".to_string()))
    }
}

fn document_id(document: &IndexDocument) -> Result<String, IndexError> {
    document
        .id()
        .map(str::to_string)
        .ok_or_else(|| IndexError::Malformed {
            id: String::new(),
            reason: "missing string id".to_string(),
        })
}

fn apply_reference_update(document: &mut IndexDocument, update: &ReferenceUpdate) {
    let mut references: Vec<String> = document
        .get_strings(fields::CITATION_FK)
        .unwrap_or_default()
        .into_iter()
        .filter(|id| !update.remove.contains(id))
        .collect();
    if !references.contains(&update.add) {
        references.push(update.add.clone());
    }
    document.set_strings(fields::CITATION_FK, references);
}

impl SearchIndex for MemoryIndex {
    fn fetch(&self, ids: &[String], rows: usize) -> Result<Vec<IndexDocument>, IndexError> {
        self.check(IndexOperation::Fetch)?;
        let committed = self.lock_committed()?;
        Ok(ids
            .iter()
            .filter_map(|id| committed.get(id))
            .take(rows)
            .cloned()
            .collect())
    }

    fn add(&self, documents: &[IndexDocument]) -> Result<(), IndexError> {
        self.check(IndexOperation::Add)?;
        for document in documents {
            document_id(document)?;
        }
        self.lock_pending()?.extend(documents.iter().cloned().map(Pending::Add));
        Ok(())
    }

    fn update_references(&self, updates: &[ReferenceUpdate]) -> Result<(), IndexError> {
        self.check(IndexOperation::UpdateReferences)?;
        self.lock_pending()?.extend(updates.iter().cloned().map(Pending::Update));
        Ok(())
    }

    fn delete(&self, ids: &[String]) -> Result<(), IndexError> {
        self.check(IndexOperation::Delete)?;
        self.lock_pending()?.extend(ids.iter().cloned().map(Pending::Delete));
        Ok(())
    }

    fn commit(&self) -> Result<(), IndexError> {
        self.check(IndexOperation::Commit)?;
        let pending: Vec<Pending> = std::mem::take(&mut *self.lock_pending()?);
        let mut committed = self.lock_committed()?;

        for operation in pending {
            match operation {
                Pending::Add(document) => {
                    if let Some(id) = document.id().map(str::to_string) {
                        committed.insert(id, document);
                    }
                }
                Pending::Update(update) => {
                    if let Some(document) = committed.get_mut(&update.id) {
                        apply_reference_update(document, &update);
                    }
                }
                Pending::Delete(id) => {
                    committed.remove(&id);
                }
            }
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
