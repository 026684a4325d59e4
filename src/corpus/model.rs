//! Canonical paper shape and identity keys.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::source::SourceId;

/// Stable identity of a paper inside a corpus.
///
/// External identifiers take priority (`arxiv:` > `pubmed:` > `doi:`); a
/// paper without any falls back to `title:<normalized title>#<first-author surname>`.
/// Once a paper is stored under a key, the key never changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PaperKey(String);

impl PaperKey {
    /// Derives the key from already-normalized parts.
    #[must_use]
    pub fn derive(ids: &ExternalIds, title_key: &str, first_surname: &str) -> Self {
        if let Some(id) = &ids.arxiv {
            Self(format!("arxiv:{id}"))
        } else if let Some(id) = &ids.pubmed {
            Self(format!("pubmed:{id}"))
        } else if let Some(id) = &ids.doi {
            Self(format!("doi:{id}"))
        } else {
            Self(format!("title:{title_key}#{first_surname}"))
        }
    }

    /// Wraps a stored key verbatim.
    #[must_use]
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaperKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized author-name key (case-folded, diacritics stripped,
/// punctuation and whitespace collapsed).
///
/// Two distinct people whose names normalize identically share one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AuthorKey(String);

impl AuthorKey {
    pub(crate) fn new(normalized: String) -> Self {
        Self(normalized)
    }

    /// Wraps a stored key verbatim.
    #[must_use]
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last token of the key, used as the surname.
    #[must_use]
    pub fn surname(&self) -> &str {
        self.0.rsplit(' ').next().unwrap_or_default()
    }
}

impl fmt::Display for AuthorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized external identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExternalIds {
    /// arXiv id without version suffix.
    pub arxiv: Option<String>,
    /// `PubMed` id.
    pub pubmed: Option<String>,
    /// Lowercased DOI without resolver prefix.
    pub doi: Option<String>,
}

impl ExternalIds {
    /// Index keys (`arxiv:…`, `pubmed:…`, `doi:…`) in priority order.
    #[must_use]
    pub fn index_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(3);
        if let Some(id) = &self.arxiv {
            keys.push(format!("arxiv:{id}"));
        }
        if let Some(id) = &self.pubmed {
            keys.push(format!("pubmed:{id}"));
        }
        if let Some(id) = &self.doi {
            keys.push(format!("doi:{id}"));
        }
        keys
    }

    /// True when both sides carry an id of the same type and the ids differ.
    #[must_use]
    pub fn conflicts_with(&self, other: &ExternalIds) -> bool {
        fn differ(a: Option<&String>, b: Option<&String>) -> bool {
            matches!((a, b), (Some(a), Some(b)) if a != b)
        }
        differ(self.arxiv.as_ref(), other.arxiv.as_ref())
            || differ(self.pubmed.as_ref(), other.pubmed.as_ref())
            || differ(self.doi.as_ref(), other.doi.as_ref())
    }

    /// Fills missing ids from `other`; returns true if anything changed.
    pub fn fill_from(&mut self, other: &ExternalIds) -> bool {
        let mut changed = false;
        for (mine, theirs) in [
            (&mut self.arxiv, &other.arxiv),
            (&mut self.pubmed, &other.pubmed),
            (&mut self.doi, &other.doi),
        ] {
            if mine.is_none() && theirs.is_some() {
                mine.clone_from(theirs);
                changed = true;
            }
        }
        changed
    }
}

/// A publication date that may only be known to the year or month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartialDate {
    /// Calendar year.
    pub year: u16,
    /// Month 1-12, if known.
    pub month: Option<u8>,
    /// Day 1-31, if known (only with a month).
    pub day: Option<u8>,
}

impl PartialDate {
    /// Number of known components (1-3).
    #[must_use]
    pub fn precision(&self) -> u8 {
        1 + u8::from(self.month.is_some()) + u8::from(self.day.is_some())
    }

    /// Keeps whichever of two dates is more precise; ties keep `self`.
    #[must_use]
    pub fn more_precise(self, other: PartialDate) -> PartialDate {
        match other.precision().cmp(&self.precision()) {
            Ordering::Greater => other,
            Ordering::Less | Ordering::Equal => self,
        }
    }
}

impl fmt::Display for PartialDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(month) = self.month {
            write!(f, "-{month:02}")?;
            if let Some(day) = self.day {
                write!(f, "-{day:02}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for PartialDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One position in a paper's byline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaperAuthor {
    /// Identity of the author node.
    pub key: AuthorKey,
    /// Display form as first seen for this paper.
    pub name: String,
    /// Every display form seen for this position across sources.
    pub variants: BTreeSet<String>,
}

impl PaperAuthor {
    /// Creates a byline entry with a single variant.
    #[must_use]
    pub fn new(key: AuthorKey, name: String) -> Self {
        let variants = BTreeSet::from([name.clone()]);
        Self {
            key,
            name,
            variants,
        }
    }
}

/// Canonical paper record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paper {
    /// Identity key.
    pub key: PaperKey,
    /// Title as first seen, whitespace collapsed.
    pub title: String,
    /// Normalized title used for fuzzy matching.
    #[serde(skip)]
    pub title_key: String,
    /// Ordered byline.
    pub authors: Vec<PaperAuthor>,
    /// Abstract, if any source supplied one.
    pub abstract_text: Option<String>,
    /// Publication date at the best precision seen.
    pub published: Option<PartialDate>,
    /// External identifiers.
    pub ids: ExternalIds,
    /// Journal or venue.
    pub journal: Option<String>,
    /// Last-known citation count.
    pub citation_count: Option<u64>,
    /// Source that supplied `citation_count`.
    pub citation_source: Option<SourceId>,
    /// Keyword-like tags (categories, MeSH terms, fields of study).
    pub keywords: BTreeSet<String>,
    /// Institution affiliations listed on any sighting.
    pub affiliations: BTreeSet<String>,
    /// Adapters that returned this paper.
    pub sources: BTreeSet<SourceId>,
}

impl Paper {
    /// Surname key of the first author, empty for papers without authors.
    #[must_use]
    pub fn first_author_surname(&self) -> &str {
        self.authors
            .first()
            .map_or("", |author| author.key.surname())
    }

    /// Author keys in byline order.
    pub fn author_keys(&self) -> impl Iterator<Item = &AuthorKey> {
        self.authors.iter().map(|author| &author.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_key_prefers_external_ids_in_order() {
        let mut ids = ExternalIds {
            arxiv: None,
            pubmed: Some("123".to_string()),
            doi: Some("10.1/x".to_string()),
        };
        assert_eq!(PaperKey::derive(&ids, "t", "s").as_str(), "pubmed:123");

        ids.arxiv = Some("2301.00001".to_string());
        assert_eq!(PaperKey::derive(&ids, "t", "s").as_str(), "arxiv:2301.00001");

        let none = ExternalIds::default();
        assert_eq!(
            PaperKey::derive(&none, "gene circuits", "smith").as_str(),
            "title:gene circuits#smith"
        );
    }

    #[test]
    fn test_external_ids_conflict_only_on_same_type() {
        let a = ExternalIds {
            doi: Some("10.1/a".to_string()),
            ..ExternalIds::default()
        };
        let b = ExternalIds {
            doi: Some("10.1/b".to_string()),
            ..ExternalIds::default()
        };
        let c = ExternalIds {
            arxiv: Some("2301.1".to_string()),
            ..ExternalIds::default()
        };
        assert!(a.conflicts_with(&b));
        assert!(!a.conflicts_with(&c));
    }

    #[test]
    fn test_partial_date_display_and_precision() {
        let year = PartialDate {
            year: 2020,
            month: None,
            day: None,
        };
        let full = PartialDate {
            year: 2020,
            month: Some(3),
            day: Some(7),
        };
        assert_eq!(year.to_string(), "2020");
        assert_eq!(full.to_string(), "2020-03-07");
        assert_eq!(year.more_precise(full), full);
        assert_eq!(full.more_precise(year), full);
    }

    #[test]
    fn test_author_key_surname_is_last_token() {
        assert_eq!(AuthorKey::new("alice b smith".to_string()).surname(), "smith");
        assert_eq!(AuthorKey::new("madonna".to_string()).surname(), "madonna");
    }
}
