//! Raw-record normalization: identity keys, names, identifiers, dates.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use super::model::{AuthorKey, ExternalIds, Paper, PaperAuthor, PaperKey, PartialDate};
use crate::source::RawPaper;

fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Leading `YYYY[-MM|-Mon][-DD]`; a trailing day must not run into more digits
/// so ranges like `1998 Dec-1999 Jan` keep only the first month.
static PARTIAL_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"^(\d{4})(?:[-/ ]([A-Za-z]{3,}|\d{1,2}))?(?:[-/ ](\d{1,2})(?:[^\d]|$))?",
    )
});

static DOI_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)^(?:https?://(?:dx\.)?doi\.org/|doi:\s*)")
});

static ARXIV_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)^(?:https?://arxiv\.org/(?:abs|pdf)/|arxiv:\s*)")
});

static ARXIV_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"v\d+(?:\.pdf)?$"));

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Case-folds, strips diacritics and turns punctuation into single spaces.
fn fold(text: &str) -> String {
    let stripped: String = text
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|value| collapse_whitespace(&value))
        .filter(|value| !value.is_empty())
}

/// Display form of an author name.
///
/// Whitespace is collapsed and `Last, First` is reordered to `First Last`.
#[must_use]
pub fn display_name(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);
    let mut parts = collapsed.splitn(2, ',');
    match (parts.next(), parts.next()) {
        (Some(last), Some(first)) if !last.trim().is_empty() && !first.trim().is_empty() => {
            format!("{} {}", first.trim(), last.trim())
        }
        _ => collapsed.trim_matches(',').trim().to_string(),
    }
}

/// Normalized identity key for an author name.
///
/// Returns `None` for names with no alphanumeric content.
#[must_use]
pub fn author_key(raw: &str) -> Option<AuthorKey> {
    let key = fold(&display_name(raw));
    (!key.is_empty()).then(|| AuthorKey::new(key))
}

/// Normalized title used for fuzzy matching and title-based identity.
#[must_use]
pub fn title_key(title: &str) -> String {
    fold(title)
}

/// Lowercased DOI without resolver or `doi:` prefix.
#[must_use]
pub fn normalize_doi(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let doi = DOI_PREFIX_RE.replace(trimmed, "").trim().to_lowercase();
    doi.starts_with("10.").then_some(doi)
}

/// arXiv identifier without `arXiv:` prefix, abs URL or version suffix.
#[must_use]
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_prefix = ARXIV_PREFIX_RE.replace(trimmed, "");
    let id = ARXIV_VERSION_RE
        .replace(without_prefix.trim(), "")
        .to_lowercase();
    (!id.is_empty()).then_some(id)
}

/// `PubMed` id; only all-digit values are accepted.
#[must_use]
pub fn normalize_pubmed_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()))
        .then(|| trimmed.to_string())
}

fn parse_month(token: &str) -> Option<u8> {
    if let Ok(number) = token.parse::<u8>() {
        return (1..=12).contains(&number).then_some(number);
    }
    let prefix = token.get(..3)?.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|month| *month == prefix)
        .and_then(|index| u8::try_from(index + 1).ok())
}

impl PartialDate {
    /// Parses the date forms the sources emit.
    ///
    /// Accepts ISO dates and timestamps (`2023-01-02`, `2023-01-02T10:00:00Z`),
    /// `2019 Mar 5`, `2019 03 05`, a bare year, and `MedlineDate` ranges such
    /// as `1998 Dec-1999 Jan` (the leading year and month are kept). A month
    /// or day that is out of range is dropped rather than failing the whole
    /// date.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = PARTIAL_DATE_RE.captures(raw.trim())?;
        let year = captures.get(1)?.as_str().parse::<u16>().ok()?;
        let month = captures
            .get(2)
            .and_then(|token| parse_month(token.as_str()));
        let day = month.and(
            captures
                .get(3)
                .and_then(|token| token.as_str().parse::<u8>().ok())
                .filter(|day| (1..=31).contains(day)),
        );
        Some(Self { year, month, day })
    }
}

/// Maps a raw adapter record into the canonical paper shape.
///
/// Steps:
/// 1. Normalize title, identifiers and date
/// 2. Build the byline from non-empty names, dropping repeated author keys
/// 3. Lowercase and deduplicate keyword tags
/// 4. Derive the identity key (external ids first, then title + surname)
#[must_use]
pub fn normalize(raw: RawPaper) -> Paper {
    let title = collapse_whitespace(&raw.title);
    let title_key = title_key(&title);

    let ids = ExternalIds {
        arxiv: raw.arxiv_id.as_deref().and_then(normalize_arxiv_id),
        pubmed: raw.pubmed_id.as_deref().and_then(normalize_pubmed_id),
        doi: raw.doi.as_deref().and_then(normalize_doi),
    };

    let mut seen = HashSet::new();
    let authors: Vec<PaperAuthor> = raw
        .authors
        .iter()
        .filter_map(|name| {
            let key = author_key(name)?;
            seen.insert(key.clone())
                .then(|| PaperAuthor::new(key, display_name(name)))
        })
        .collect();

    let keywords: BTreeSet<String> = raw
        .keywords
        .iter()
        .map(|keyword| collapse_whitespace(keyword).to_lowercase())
        .filter(|keyword| !keyword.is_empty())
        .collect();

    let affiliations: BTreeSet<String> = raw
        .affiliations
        .iter()
        .map(|affiliation| collapse_whitespace(affiliation))
        .filter(|affiliation| !affiliation.is_empty())
        .collect();

    let first_surname = authors
        .first()
        .map(|author| author.key.surname().to_string())
        .unwrap_or_default();
    let key = PaperKey::derive(&ids, &title_key, &first_surname);

    Paper {
        key,
        title,
        title_key,
        authors,
        abstract_text: non_empty(raw.abstract_text),
        published: raw.published.as_deref().and_then(PartialDate::parse),
        ids,
        journal: non_empty(raw.journal),
        citation_count: raw.citation_count,
        citation_source: raw.citation_count.map(|_| raw.source),
        keywords,
        affiliations,
        sources: BTreeSet::from([raw.source]),
    }
}
