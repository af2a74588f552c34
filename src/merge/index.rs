//! Search index documents and the index capability used by the reconciler.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::IndexError;

/// Field names of index documents.
pub mod fields {
    pub const ID: &str = "id";
    pub const ENTITY: &str = "entity";
    /// Citing documents of a citation record
    pub const DOCUMENT_FK: &str = "document_fk";
    /// Collections the citation record was found in
    pub const IN: &str = "in";
    pub const DOCUMENT_FK_AU: &str = "document_fk_au";
    pub const DOCUMENT_FK_TA: &str = "document_fk_ta";
    /// Number of citing documents, as a string
    pub const TOTAL_RECEIVED: &str = "total_received";
    /// Citation records referenced by a citing document
    pub const CITATION_FK: &str = "citation_fk";
    pub const VOLUME: &str = "volume";
    pub const ISSUE: &str = "issue";
    pub const START_PAGE: &str = "start_page";

    /// Multi-valued backlink fields unioned when citation records merge.
    pub const BACKLINKS: [&str; 4] = [DOCUMENT_FK, IN, DOCUMENT_FK_AU, DOCUMENT_FK_TA];
}

/// One document of the search index, as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexDocument(Map<String, Value>);

impl IndexDocument {
    /// Create a document holding only its id.
    pub fn new(id: &str) -> Self {
        let mut map = Map::new();
        map.insert(fields::ID.to_string(), Value::String(id.to_string()));
        Self(map)
    }

    /// Wrap a JSON value, which must be an object with a string id.
    pub fn from_value(value: Value) -> Result<Self, IndexError> {
        match value {
            Value::Object(map) => {
                let document = Self(map);
                if document.id().is_none() {
                    return Err(IndexError::Malformed {
                        id: String::new(),
                        reason: "missing string id".to_string(),
                    });
                }
                Ok(document)
            }
            other => Err(IndexError::Malformed {
                id: String::new(),
                reason: format!("expected an object, found {other}"),
            }),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str(fields::ID)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// A string field; empty strings count as absent.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// A multi-valued string field. A single string reads as a one-element
    /// list; non-string entries are ignored.
    pub fn get_strings(&self, field: &str) -> Option<Vec<String>> {
        match self.0.get(field)? {
            Value::Array(values) => Some(
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            Value::String(value) => Some(vec![value.clone()]),
            _ => None,
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn set_strings(&mut self, field: &str, values: Vec<String>) -> &mut Self {
        self.set(field, Value::from(values))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Rewrite of the citation references of one citing document.
///
/// Expressed as remove-then-add so that applying it twice is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceUpdate {
    /// Citing document id
    pub id: String,
    /// Superseded citation record ids
    pub remove: Vec<String>,
    /// Canonical citation record id
    pub add: String,
}

impl ReferenceUpdate {
    /// The partial-update document sent to the index.
    pub fn to_document(&self) -> Value {
        json!({
            "id": self.id,
            "entity": "document",
            "citation_fk": {
                "remove": self.remove,
                "add": self.add,
            },
        })
    }
}

/// A search index holding citation records and citing documents.
///
/// Mutations become visible to [`fetch`](SearchIndex::fetch) only after
/// [`commit`](SearchIndex::commit).
pub trait SearchIndex: Send + Sync {
    /// Committed documents whose id is one of `ids`, at most `rows` of them.
    fn fetch(&self, ids: &[String], rows: usize) -> Result<Vec<IndexDocument>, IndexError>;

    /// Add or fully replace documents by id.
    fn add(&self, documents: &[IndexDocument]) -> Result<(), IndexError>;

    /// Apply partial updates to the citation references of citing documents.
    fn update_references(&self, updates: &[ReferenceUpdate]) -> Result<(), IndexError>;

    /// Delete documents by id.
    fn delete(&self, ids: &[String]) -> Result<(), IndexError>;

    /// Make every pending mutation visible.
    fn commit(&self) -> Result<(), IndexError>;
}
