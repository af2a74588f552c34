use crate::RawAuthor;
use crate::regex::{Captures, Regex};
use compact_str::CompactString;
use itertools::Itertools;
use serde::de::{Deserialize, DeserializeOwned, Deserializer};
use serde_json::Value;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static UNICODE_ESCAPE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<U\+([0-9A-Fa-f]+)>").unwrap());

static MARKUP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][A-Za-z0-9]*(?:\s[^<>]*)?/?>").unwrap());

const ENTITY_REPLACEMENTS: [(&str, &str); 5] = [
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&nbsp;", " "),
];

/// Cleans one free-text citation field into its canonical form.
///
/// Expands `<U+XXXX>` escapes, drops inline markup, folds diacritics and case,
/// turns punctuation into spaces, and collapses whitespace. Every free-text
/// field goes through this one routine so that equal inputs normalize
/// identically no matter which field they came from.
///
/// Returns `None` when nothing is left after cleaning.
pub fn clean_text(input: &str) -> Option<String> {
    if input.trim().is_empty() {
        return None;
    }

    let mut text = convert_unicode_escapes(input);
    for (entity, replacement) in ENTITY_REPLACEMENTS {
        text = text.replace(entity, replacement);
    }
    let text = MARKUP_REGEX.replace_all(&text, " ");

    let cleaned = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .join(" ");

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Cleans an optional field, treating absence and blank text alike.
pub fn clean_optional(input: Option<&str>) -> Option<String> {
    input.and_then(clean_text)
}

fn convert_unicode_escapes(input: &str) -> String {
    UNICODE_ESCAPE_REGEX
        .replace_all(input, |caps: &Captures| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

/// Builds the `"<initial> <surname>"` key of an author.
///
/// The surname contributes its last token only, so particles ("van der") and
/// compound prefixes do not split otherwise identical authors. No surname
/// means no key.
pub fn author_key(author: &RawAuthor) -> Option<CompactString> {
    let surname = clean_optional(author.surname.as_deref())?;
    let last_name = surname.split(' ').next_back()?;

    let mut key = CompactString::default();
    if let Some(initial) = clean_optional(author.given_names.as_deref())
        .and_then(|given| given.chars().next())
    {
        key.push(initial);
        key.push(' ');
    }
    key.push_str(last_name);
    Some(key)
}

/// Reduces a publication date to its year: the first four characters of the
/// cleaned date.
pub fn publication_year(date: &str) -> Option<String> {
    let cleaned = clean_text(date)?;
    Some(cleaned.chars().take(4).collect())
}

/// Completes an abbreviated end page from its start page.
///
/// `("1234", "45")` becomes `"1245"`; an end page at least as long as the
/// start page is returned cleaned but otherwise unchanged.
pub fn complete_end_page(start_page: Option<&str>, end_page: &str) -> Option<String> {
    let end = clean_text(end_page)?;
    let Some(start) = clean_optional(start_page) else {
        return Some(end);
    };

    let start_chars: Vec<char> = start.chars().collect();
    let end_len = end.chars().count();
    if end_len < start_chars.len() {
        let prefix: String = start_chars[..start_chars.len() - end_len].iter().collect();
        Some(format!("{}{}", prefix, end))
    } else {
        Some(end)
    }
}

/// Reads a free-text corpus field. Numbers keep their digits; any other
/// non-string value reads as absent.
pub(crate) fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// Like [`lenient_text`], reading an absent value as the empty string.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_default())
}

/// Reads a corpus value, falling back to its default when it has the wrong shape.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Reads a list of corpus values item by item; malformed items become
/// defaults and anything but an array reads as empty.
pub(crate) fn lenient_items<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).unwrap_or_default())
            .collect(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    #[case("Graph Theory", Some("graph theory"))]
    #[case("  Graph   Theory.  ", Some("graph theory"))]
    #[case("J. Math", Some("j math"))]
    #[case("Revista de Saúde Pública", Some("revista de saude publica"))]
    #[case("ÇÃO-Ñandú", Some("cao nandu"))]
    #[case("Cad. Saúde Pública / Rio de Janeiro", Some("cad saude publica rio de janeiro"))]
    #[case("<i>Escherichia coli</i> growth", Some("escherichia coli growth"))]
    #[case("H<sub>2</sub>O", Some("h 2 o"))]
    #[case("Smith &amp; Sons", Some("smith sons"))]
    #[case("2<U+0391>-amino", Some("2α amino"))]
    #[case("12(3)", Some("12 3"))]
    #[case("", None)]
    #[case("   ", None)]
    #[case("...", None)]
    fn test_clean_text(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(clean_text(input).as_deref(), expected);
    }

    #[test]
    fn test_clean_text_is_idempotent() {
        let inputs = ["Graph Theory", "Revista de Saúde Pública", "<b>A</b>-B; C"];
        for input in inputs {
            let once = clean_text(input).unwrap();
            assert_eq!(clean_text(&once).unwrap(), once);
        }
    }

    #[test]
    fn test_convert_unicode_escapes() {
        assert_eq!(convert_unicode_escapes("Hello <U+03A9>orld"), "Hello Ωorld");
        assert_eq!(convert_unicode_escapes("<U+0391><U+0392>"), "ΑΒ");
        assert_eq!(convert_unicode_escapes("Normal String"), "Normal String");
        assert_eq!(convert_unicode_escapes("<U+FFFFFFF>"), "<U+FFFFFFF>");
    }

    #[rstest]
    #[case("Smith", "J.", Some("j smith"))]
    #[case("Smith", "John Ronald", Some("j smith"))]
    #[case("van der Valk", "J P M", Some("j valk"))]
    #[case("Souza-Lima", "Ana", Some("a lima"))]
    #[case("Álvarez", "Íñigo", Some("i alvarez"))]
    #[case("Smith", "", Some("smith"))]
    #[case("", "John", None)]
    #[case("  ", "", None)]
    fn test_author_key(#[case] surname: &str, #[case] given: &str, #[case] expected: Option<&str>) {
        let author = RawAuthor::new(surname, given);
        assert_eq!(author_key(&author).as_deref(), expected);
    }

    #[test]
    fn test_author_key_missing_parts() {
        let author = RawAuthor {
            surname: Some("Knuth".to_string()),
            given_names: None,
        };
        assert_eq!(author_key(&author).as_deref(), Some("knuth"));
        assert_eq!(author_key(&RawAuthor::default()), None);
    }

    #[rstest]
    #[case("1990", Some("1990"))]
    #[case("19900512", Some("1990"))]
    #[case("1990-05-12", Some("1990"))]
    #[case("s.d.", Some("s d"))]
    #[case("", None)]
    fn test_publication_year(#[case] date: &str, #[case] expected: Option<&str>) {
        assert_eq!(publication_year(date).as_deref(), expected);
    }

    #[rstest]
    #[case(Some("1234"), "45", Some("1245"))]
    #[case(Some("123"), "456", Some("456"))]
    #[case(Some("12"), "345", Some("345"))]
    #[case(None, "45", Some("45"))]
    #[case(Some("101"), "", None)]
    fn test_complete_end_page(
        #[case] start: Option<&str>,
        #[case] end: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(complete_end_page(start, end).as_deref(), expected);
    }
}
