//! Field normalizer.
//!
//! Turns the free-text fields of one [`RawCitation`] into canonical keys.
//! Normalization is pure and deterministic: missing or unusable input only
//! ever produces fewer keys, never an error and never an empty value.
//!
//! # Example
//!
//! ```
//! use citemerge::{Field, PublicationType, RawAuthor, RawCitation, normalize};
//!
//! let citation = RawCitation {
//!     publication_type: PublicationType::Book,
//!     first_author: Some(RawAuthor::new("Freire", "Paulo")),
//!     source: Some("Pedagogia do Oprimido".to_string()),
//!     publisher: Some("Paz e Terra".to_string()),
//!     publication_date: Some("1970".to_string()),
//!     ..Default::default()
//! };
//!
//! let fields = normalize(&citation, None);
//! assert_eq!(fields.get(Field::Source), Some("pedagogia do oprimido"));
//! assert_eq!(fields.get(Field::PublisherAddress), None);
//! ```

use crate::utils::{author_key, clean_optional, complete_end_page, publication_year};
use crate::{PublicationType, RawCitation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub use crate::utils::clean_text;

/// Canonical field names.
///
/// The serialized names are part of the persisted key space: they are hashed
/// together with the values, so they must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    #[serde(rename = "cleaned_publication_date")]
    PublicationDate,
    #[serde(rename = "cleaned_first_author")]
    FirstAuthor,
    #[serde(rename = "cleaned_title")]
    Title,
    #[serde(rename = "cleaned_journal_title")]
    JournalTitle,
    #[serde(rename = "cleaned_volume")]
    Volume,
    #[serde(rename = "cleaned_issue")]
    Issue,
    #[serde(rename = "cleaned_start_page")]
    StartPage,
    #[serde(rename = "cleaned_end_page")]
    EndPage,
    #[serde(rename = "cleaned_source")]
    Source,
    #[serde(rename = "cleaned_publisher")]
    Publisher,
    #[serde(rename = "cleaned_publisher_address")]
    PublisherAddress,
    #[serde(rename = "cleaned_chapter_title")]
    ChapterTitle,
    #[serde(rename = "cleaned_chapter_first_author")]
    ChapterFirstAuthor,
}

impl Field {
    /// The persisted key of this field.
    pub fn as_key(&self) -> &'static str {
        match self {
            Field::PublicationDate => "cleaned_publication_date",
            Field::FirstAuthor => "cleaned_first_author",
            Field::Title => "cleaned_title",
            Field::JournalTitle => "cleaned_journal_title",
            Field::Volume => "cleaned_volume",
            Field::Issue => "cleaned_issue",
            Field::StartPage => "cleaned_start_page",
            Field::EndPage => "cleaned_end_page",
            Field::Source => "cleaned_source",
            Field::Publisher => "cleaned_publisher",
            Field::PublisherAddress => "cleaned_publisher_address",
            Field::ChapterTitle => "cleaned_chapter_title",
            Field::ChapterFirstAuthor => "cleaned_chapter_first_author",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_key())
    }
}

/// Canonical values of one citation, keyed by [`Field`].
///
/// A key is present only when its source field survived cleaning, so absence
/// (never an empty string) signals "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedFields(BTreeMap<Field, String>);

impl NormalizedFields {
    /// Create an empty set of fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value of a field, if known.
    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    /// Whether the field is known.
    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    /// Record a value. Blank values are dropped so they can never reach a hash.
    pub fn insert(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        if !value.trim().is_empty() {
            self.0.insert(field, value);
        }
    }

    /// Record a value when there is one.
    pub fn insert_opt(&mut self, field: Field, value: Option<impl Into<String>>) {
        if let Some(value) = value {
            self.insert(field, value);
        }
    }

    /// Copy of the given fields only, skipping unknown ones.
    pub fn subset(&self, fields: &[Field]) -> NormalizedFields {
        NormalizedFields(
            fields
                .iter()
                .filter_map(|f| self.0.get(f).map(|v| (*f, v.clone())))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over known fields in field order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.0.iter().map(|(f, v)| (*f, v.as_str()))
    }
}

impl FromIterator<(Field, String)> for NormalizedFields {
    fn from_iter<T: IntoIterator<Item = (Field, String)>>(iter: T) -> Self {
        let mut fields = NormalizedFields::new();
        for (field, value) in iter {
            fields.insert(field, value);
        }
        fields
    }
}

/// Source of authoritative, already-standardized journal titles.
pub trait JournalTitleLookup: Send + Sync {
    /// Official journal title for a citation id, when one is known and its
    /// standardization was successful.
    fn official_title(&self, citation_id: &str) -> Option<String>;
}

/// A standardized journal title with the status of its standardization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedTitle {
    pub official_title: String,
    /// Positive when the standardizer matched the citation with confidence.
    pub status: i32,
}

/// In-memory [`JournalTitleLookup`] keyed by citation id.
#[derive(Debug, Clone, Default)]
pub struct StandardizedTitles {
    entries: HashMap<String, StandardizedTitle>,
}

impl StandardizedTitles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the standardization result of a citation.
    pub fn insert(&mut self, citation_id: &str, official_title: &str, status: i32) -> &mut Self {
        self.entries.insert(
            citation_id.to_string(),
            StandardizedTitle {
                official_title: official_title.to_string(),
                status,
            },
        );
        self
    }
}

impl JournalTitleLookup for StandardizedTitles {
    fn official_title(&self, citation_id: &str) -> Option<String> {
        self.entries
            .get(citation_id)
            .filter(|entry| entry.status > 0)
            .map(|entry| entry.official_title.to_lowercase())
    }
}

/// Normalize one citation into canonical fields.
///
/// `official_journal_title`, when given, is an authoritative journal title for
/// this exact citation and takes precedence over the cleaned source field.
pub fn normalize(citation: &RawCitation, official_journal_title: Option<&str>) -> NormalizedFields {
    let mut fields = NormalizedFields::new();

    normalize_authors(citation, &mut fields);
    fields.insert_opt(
        Field::PublicationDate,
        citation.publication_date.as_deref().and_then(publication_year),
    );

    match citation.publication_type {
        PublicationType::Article => {
            fields.insert_opt(Field::Volume, clean_optional(citation.volume.as_deref()));
            fields.insert_opt(Field::Issue, clean_optional(citation.issue.as_deref()));
            fields.insert_opt(
                Field::StartPage,
                clean_optional(citation.start_page.as_deref()),
            );
            fields.insert_opt(
                Field::EndPage,
                citation
                    .end_page
                    .as_deref()
                    .and_then(|end| complete_end_page(citation.start_page.as_deref(), end)),
            );

            let journal_title = official_journal_title
                .and_then(clean_text)
                .or_else(|| clean_optional(citation.source.as_deref()));
            fields.insert_opt(Field::JournalTitle, journal_title);
            fields.insert_opt(Field::Title, clean_optional(citation.title.as_deref()));
        }
        PublicationType::Book | PublicationType::BookChapter => {
            fields.insert_opt(Field::Source, clean_optional(citation.source.as_deref()));
            fields.insert_opt(
                Field::Publisher,
                clean_optional(citation.publisher.as_deref()),
            );
            fields.insert_opt(
                Field::PublisherAddress,
                clean_optional(citation.publisher_address.as_deref()),
            );
            fields.insert_opt(
                Field::ChapterTitle,
                clean_optional(citation.chapter_title.as_deref()),
            );
        }
        PublicationType::Other => {}
    }

    fields
}

/// Chapters with a title carry two authors: the chapter's own (analytic) and
/// the book's (monographic). Everything else has one first author.
fn normalize_authors(citation: &RawCitation, fields: &mut NormalizedFields) {
    let has_chapter_title = clean_optional(citation.chapter_title.as_deref()).is_some();

    if citation.publication_type == PublicationType::Article || !has_chapter_title {
        fields.insert_opt(
            Field::FirstAuthor,
            citation.record_first_author().and_then(author_key),
        );
    } else {
        fields.insert_opt(
            Field::ChapterFirstAuthor,
            citation.analytic_authors.first().and_then(author_key),
        );
        fields.insert_opt(
            Field::FirstAuthor,
            citation.monographic_authors.first().and_then(author_key),
        );
    }
}
