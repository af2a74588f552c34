//! Fingerprint generator.
//!
//! A fingerprint (blocking key) is a SHA3-224 digest over a fixed, ordered list
//! of normalized fields. Each [`Strategy`] names one such list. A citation gets
//! a fingerprint for a strategy only when every field of that strategy is
//! known, so partial data can never collide with complete data.
//!
//! ## Strategies
//!
//! | Strategy | Fields |
//! |---|---|
//! | `article-volume` | date, first author, title, journal, volume |
//! | `article-issue` | date, first author, title, journal, issue |
//! | `article-start_page` | date, first author, title, journal, start page |
//! | `book` | date, first author, source, publisher, publisher address |
//! | `chapter` | the `book` fields, chapter title, chapter first author |
//!
//! The hash input is `key + value` for each field, concatenated in the order
//! above. Field order and key names are part of the persisted key space and
//! must stay identical across runs.

use crate::normalize::{Field, JournalTitleLookup, NormalizedFields, normalize};
use crate::{CitingDocument, PublicationType};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_224};
use std::collections::BTreeSet;

const ARTICLE_FIELDS: [Field; 4] = [
    Field::PublicationDate,
    Field::FirstAuthor,
    Field::Title,
    Field::JournalTitle,
];

const BOOK_FIELDS: [Field; 5] = [
    Field::PublicationDate,
    Field::FirstAuthor,
    Field::Source,
    Field::Publisher,
    Field::PublisherAddress,
];

const ARTICLE_VOLUME_FIELDS: [Field; 5] = extend(ARTICLE_FIELDS, Field::Volume);
const ARTICLE_ISSUE_FIELDS: [Field; 5] = extend(ARTICLE_FIELDS, Field::Issue);
const ARTICLE_START_PAGE_FIELDS: [Field; 5] = extend(ARTICLE_FIELDS, Field::StartPage);

const CHAPTER_FIELDS: [Field; 7] = [
    Field::PublicationDate,
    Field::FirstAuthor,
    Field::Source,
    Field::Publisher,
    Field::PublisherAddress,
    Field::ChapterTitle,
    Field::ChapterFirstAuthor,
];

const fn extend(base: [Field; 4], extra: Field) -> [Field; 5] {
    [base[0], base[1], base[2], base[3], extra]
}

/// A named fingerprinting rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strategy {
    #[serde(rename = "article-volume")]
    ArticleVolume,
    #[serde(rename = "article-issue")]
    ArticleIssue,
    #[serde(rename = "article-start_page")]
    ArticleStartPage,
    #[serde(rename = "book")]
    Book,
    #[serde(rename = "chapter")]
    Chapter,
}

impl Strategy {
    /// Every strategy, in reconciliation order.
    pub const ALL: [Strategy; 5] = [
        Strategy::Book,
        Strategy::Chapter,
        Strategy::ArticleIssue,
        Strategy::ArticleStartPage,
        Strategy::ArticleVolume,
    ];

    /// The persisted tag of this strategy.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Strategy::ArticleVolume => "article-volume",
            Strategy::ArticleIssue => "article-issue",
            Strategy::ArticleStartPage => "article-start_page",
            Strategy::Book => "book",
            Strategy::Chapter => "chapter",
        }
    }

    /// Parse a persisted tag.
    pub fn from_tag(tag: &str) -> Option<Strategy> {
        Strategy::ALL.into_iter().find(|s| s.as_tag() == tag)
    }

    /// The ordered fields hashed by this strategy.
    pub fn fields(&self) -> &'static [Field] {
        match self {
            Strategy::ArticleVolume => &ARTICLE_VOLUME_FIELDS,
            Strategy::ArticleIssue => &ARTICLE_ISSUE_FIELDS,
            Strategy::ArticleStartPage => &ARTICLE_START_PAGE_FIELDS,
            Strategy::Book => &BOOK_FIELDS,
            Strategy::Chapter => &CHAPTER_FIELDS,
        }
    }

    /// The article scalar that distinguishes this strategy, if any.
    pub fn scalar_field(&self) -> Option<Field> {
        match self {
            Strategy::ArticleVolume => Some(Field::Volume),
            Strategy::ArticleIssue => Some(Field::Issue),
            Strategy::ArticleStartPage => Some(Field::StartPage),
            Strategy::Book | Strategy::Chapter => None,
        }
    }

    /// Strategies that apply to a publication type.
    pub fn for_type(publication_type: PublicationType) -> &'static [Strategy] {
        match publication_type {
            PublicationType::Article => &[
                Strategy::ArticleVolume,
                Strategy::ArticleStartPage,
                Strategy::ArticleIssue,
            ],
            PublicationType::Book | PublicationType::BookChapter => {
                &[Strategy::Book, Strategy::Chapter]
            }
            PublicationType::Other => &[],
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// One citation's fingerprint under one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// Lowercase hex SHA3-224 digest
    pub hash: String,
    pub strategy: Strategy,
    pub citation_id: String,
    pub citing_document_id: String,
    /// The strategy's fields as they were hashed
    pub key_snapshot: NormalizedFields,
}

/// Hash the given fields in order.
///
/// Returns `None` as soon as one field is unknown.
pub fn hash_fields(fields: &NormalizedFields, keys: &[Field]) -> Option<String> {
    if keys.is_empty() {
        return None;
    }

    let mut hasher = Sha3_224::new();
    for key in keys {
        let value = fields.get(*key)?;
        hasher.update(key.as_key().as_bytes());
        hasher.update(value.as_bytes());
    }
    Some(format!("{:x}", hasher.finalize()))
}

/// Compute every fingerprint a citation qualifies for.
///
/// Returns `(hash, strategy)` pairs; citations missing data for a strategy
/// simply do not get that strategy's hash.
pub fn fingerprint(
    fields: &NormalizedFields,
    publication_type: PublicationType,
) -> Vec<(String, Strategy)> {
    Strategy::for_type(publication_type)
        .iter()
        .filter_map(|strategy| {
            hash_fields(fields, strategy.fields()).map(|hash| (hash, *strategy))
        })
        .collect()
}

/// Normalize and fingerprint every eligible citation of a document.
///
/// Only citations whose type is in `citation_types` are considered. The
/// journal title lookup, when given, is consulted for articles only.
pub fn extract_records(
    document: &CitingDocument,
    citation_types: &BTreeSet<PublicationType>,
    lookup: Option<&dyn JournalTitleLookup>,
) -> Vec<FingerprintRecord> {
    let citing_document_id = document.id();
    let mut records = Vec::new();

    for citation in document
        .citations
        .iter()
        .filter(|c| citation_types.contains(&c.publication_type))
    {
        let citation_id = document.identity_of(citation).id();

        let official_title = match (citation.publication_type, lookup) {
            (PublicationType::Article, Some(lookup)) => lookup.official_title(&citation_id),
            _ => None,
        };
        let fields = normalize(citation, official_title.as_deref());

        for (hash, strategy) in fingerprint(&fields, citation.publication_type) {
            records.push(FingerprintRecord {
                hash,
                strategy,
                citation_id: citation_id.clone(),
                citing_document_id: citing_document_id.clone(),
                key_snapshot: fields.subset(strategy.fields()),
            });
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::StandardizedTitles;
    use crate::{RawAuthor, RawCitation};
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn article_fields() -> NormalizedFields {
        [
            (Field::PublicationDate, "1990"),
            (Field::FirstAuthor, "j smith"),
            (Field::Title, "graph theory"),
            (Field::JournalTitle, "j math"),
            (Field::Volume, "12"),
            (Field::Issue, "3"),
            (Field::StartPage, "101"),
        ]
        .into_iter()
        .map(|(f, v)| (f, v.to_string()))
        .collect()
    }

    fn book_fields() -> NormalizedFields {
        [
            (Field::PublicationDate, "1970"),
            (Field::FirstAuthor, "p freire"),
            (Field::Source, "pedagogia do oprimido"),
            (Field::Publisher, "paz e terra"),
            (Field::PublisherAddress, "rio de janeiro"),
        ]
        .into_iter()
        .map(|(f, v)| (f, v.to_string()))
        .collect()
    }

    fn without(fields: NormalizedFields, field: Field) -> NormalizedFields {
        fields
            .iter()
            .filter(|(f, _)| *f != field)
            .map(|(f, v)| (f, v.to_string()))
            .collect()
    }

    #[test]
    fn test_hash_format() {
        let hash = hash_fields(&article_fields(), Strategy::ArticleVolume.fields()).unwrap();
        assert_eq!(hash.len(), 56);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_matches_concatenated_key_values() {
        let expected = format!(
            "{:x}",
            Sha3_224::digest(
                "cleaned_publication_date1990cleaned_first_authorj smithcleaned_titlegraph theorycleaned_journal_titlej mathcleaned_volume12"
                    .as_bytes()
            )
        );
        assert_eq!(
            hash_fields(&article_fields(), Strategy::ArticleVolume.fields()),
            Some(expected)
        );
    }

    #[test]
    fn test_article_strategies() {
        let hashes = fingerprint(&article_fields(), PublicationType::Article);
        let strategies: Vec<Strategy> = hashes.iter().map(|(_, s)| *s).collect();
        assert_eq!(
            strategies,
            vec![
                Strategy::ArticleVolume,
                Strategy::ArticleStartPage,
                Strategy::ArticleIssue
            ]
        );
        let distinct: BTreeSet<&String> = hashes.iter().map(|(h, _)| h).collect();
        assert_eq!(distinct.len(), 3);
    }

    #[rstest]
    #[case(Field::PublicationDate)]
    #[case(Field::FirstAuthor)]
    #[case(Field::Title)]
    #[case(Field::JournalTitle)]
    fn test_missing_base_field_suppresses_every_article_hash(#[case] missing: Field) {
        let fields = without(article_fields(), missing);
        assert_eq!(fingerprint(&fields, PublicationType::Article), vec![]);
    }

    #[rstest]
    #[case(Field::Volume, Strategy::ArticleVolume)]
    #[case(Field::Issue, Strategy::ArticleIssue)]
    #[case(Field::StartPage, Strategy::ArticleStartPage)]
    fn test_missing_extension_suppresses_only_its_strategy(
        #[case] missing: Field,
        #[case] suppressed: Strategy,
    ) {
        let fields = without(article_fields(), missing);
        let strategies: Vec<Strategy> = fingerprint(&fields, PublicationType::Article)
            .into_iter()
            .map(|(_, s)| s)
            .collect();
        assert_eq!(strategies.len(), 2);
        assert!(!strategies.contains(&suppressed));
    }

    #[rstest]
    #[case(Field::PublicationDate, "1991")]
    #[case(Field::FirstAuthor, "k smith")]
    #[case(Field::Title, "graph theory ii")]
    #[case(Field::JournalTitle, "j algebra")]
    #[case(Field::Volume, "13")]
    fn test_changing_any_field_changes_volume_hash(#[case] field: Field, #[case] value: &str) {
        let original = hash_fields(&article_fields(), Strategy::ArticleVolume.fields());
        let mut changed = article_fields();
        changed.insert(field, value);
        let changed = hash_fields(&changed, Strategy::ArticleVolume.fields());
        assert!(original.is_some());
        assert_ne!(original, changed);
    }

    #[test]
    fn test_field_order_matters() {
        let fields = article_fields();
        let forward = hash_fields(&fields, &[Field::Volume, Field::Issue]);
        let backward = hash_fields(&fields, &[Field::Issue, Field::Volume]);
        assert_ne!(forward, backward);
        assert_eq!(hash_fields(&fields, &[]), None);
    }

    #[test]
    fn test_book_and_chapter() {
        let hashes = fingerprint(&book_fields(), PublicationType::Book);
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].1, Strategy::Book);

        let mut chapter = book_fields();
        chapter.insert(Field::ChapterTitle, "educacao bancaria");
        chapter.insert(Field::ChapterFirstAuthor, "m minayo");
        let hashes = fingerprint(&chapter, PublicationType::BookChapter);
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0].0, fingerprint(&book_fields(), PublicationType::Book)[0].0);
        assert_eq!(hashes[1].1, Strategy::Chapter);

        let mut partial = book_fields();
        partial.insert(Field::ChapterTitle, "educacao bancaria");
        assert_eq!(fingerprint(&partial, PublicationType::Book).len(), 1);
    }

    #[test]
    fn test_other_types_never_fingerprint() {
        assert_eq!(fingerprint(&article_fields(), PublicationType::Other), vec![]);
    }

    #[test]
    fn test_strategy_tags() {
        for strategy in Strategy::ALL {
            assert_eq!(Strategy::from_tag(strategy.as_tag()), Some(strategy));
            let json = serde_json::to_string(&strategy).unwrap();
            assert_eq!(json, format!("\"{}\"", strategy.as_tag()));
        }
        assert_eq!(Strategy::from_tag("article-start-page"), None);
    }

    fn citing_document() -> CitingDocument {
        CitingDocument {
            publisher_id: "S0034-89101990000100001".to_string(),
            collection_acronym: "scl".to_string(),
            publication_date: Some("1990-05-01".to_string()),
            citations: vec![
                RawCitation {
                    sequence: "S0034-8910199000010000100001".to_string(),
                    publication_type: PublicationType::Article,
                    first_author: Some(RawAuthor::new("Smith", "J.")),
                    title: Some("Graph Theory".to_string()),
                    source: Some("J. Math".to_string()),
                    volume: Some("12".to_string()),
                    publication_date: Some("1990".to_string()),
                    ..Default::default()
                },
                RawCitation {
                    sequence: "S0034-8910199000010000100002".to_string(),
                    publication_type: PublicationType::Book,
                    first_author: Some(RawAuthor::new("Freire", "Paulo")),
                    source: Some("Pedagogia do Oprimido".to_string()),
                    publisher: Some("Paz e Terra".to_string()),
                    publisher_address: Some("Rio de Janeiro".to_string()),
                    publication_date: Some("1970".to_string()),
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn test_extract_records() {
        let types = BTreeSet::from([PublicationType::Article, PublicationType::Book]);
        let records = extract_records(&citing_document(), &types, None);
        assert_eq!(records.len(), 2);

        let article = &records[0];
        assert_eq!(article.strategy, Strategy::ArticleVolume);
        assert_eq!(article.citation_id, "S0034-8910199000010000100001-scl");
        assert_eq!(article.citing_document_id, "S0034-89101990000100001-scl");
        assert_eq!(article.key_snapshot.len(), 5);
        assert_eq!(article.key_snapshot.get(Field::Volume), Some("12"));

        assert_eq!(records[1].strategy, Strategy::Book);
    }

    #[test]
    fn test_extract_records_filters_types() {
        let types = BTreeSet::from([PublicationType::Book]);
        let records = extract_records(&citing_document(), &types, None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].strategy, Strategy::Book);
    }

    #[test]
    fn test_extract_records_uses_official_journal_title() {
        let mut titles = StandardizedTitles::new();
        titles.insert("S0034-8910199000010000100001-scl", "Journal of Mathematics", 2);
        let types = BTreeSet::from([PublicationType::Article]);

        let plain = extract_records(&citing_document(), &types, None);
        let standardized = extract_records(&citing_document(), &types, Some(&titles));
        assert_eq!(
            standardized[0].key_snapshot.get(Field::JournalTitle),
            Some("journal of mathematics")
        );
        assert_ne!(plain[0].hash, standardized[0].hash);
    }
}
