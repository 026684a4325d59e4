//! Identity resolution and enrichment of incoming papers.

use serde::Serialize;
use tracing::{debug, warn};

use super::Corpus;
use super::model::{Paper, PaperAuthor, PaperKey};

/// Title similarity at or above which two papers by the same first author
/// are treated as the same work.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.90;

/// Similarity at or above which a fuzzy merge is not reported for review.
pub const CONFIDENT_MATCH_THRESHOLD: f64 = 0.97;

/// What a merge did to the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// First sighting of this identity.
    Created,
    /// Existing record gained information.
    Enriched,
    /// Existing record already held everything the incoming one had.
    Unchanged,
}

/// Low-confidence fuzzy merge kept for manual review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeWarning {
    /// Title of the incoming record.
    pub incoming_title: String,
    /// Key the incoming record would have had on its own.
    pub incoming_key: PaperKey,
    /// Record it was merged into.
    pub merged_into: PaperKey,
    /// Normalized Levenshtein similarity of the two title keys.
    pub similarity: f64,
}

/// Outcome of [`Corpus::merge`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    /// Identity the paper is stored under.
    pub key: PaperKey,
    /// Effect on the corpus.
    pub status: MergeStatus,
    /// Present when the match was fuzzy and below the confident threshold.
    pub warning: Option<MergeWarning>,
}

enum Resolution {
    New,
    Exact(PaperKey),
    Fuzzy(PaperKey, f64),
}

impl Corpus {
    /// Merges a normalized paper into the corpus.
    ///
    /// Resolution order:
    /// 1. Any shared external identifier (arXiv id, `PubMed` id, DOI)
    /// 2. Fuzzy title match among papers with the same first-author surname,
    ///    skipping candidates whose ids of the same type disagree
    ///
    /// A matched record keeps its key; the incoming one only enriches it.
    pub fn merge(&mut self, paper: Paper) -> MergeReport {
        match self.resolve(&paper) {
            Resolution::New => {
                let key = paper.key.clone();
                debug!(paper = %key, "new paper");
                self.insert_new(paper);
                MergeReport {
                    key,
                    status: MergeStatus::Created,
                    warning: None,
                }
            }
            Resolution::Exact(key) => {
                let status = self.enrich_existing(&key, paper);
                MergeReport {
                    key,
                    status,
                    warning: None,
                }
            }
            Resolution::Fuzzy(key, similarity) => {
                let warning = (similarity < CONFIDENT_MATCH_THRESHOLD).then(|| {
                    warn!(
                        incoming = %paper.key,
                        merged_into = %key,
                        similarity,
                        "low-confidence title match merged"
                    );
                    MergeWarning {
                        incoming_title: paper.title.clone(),
                        incoming_key: paper.key.clone(),
                        merged_into: key.clone(),
                        similarity,
                    }
                });
                let status = self.enrich_existing(&key, paper);
                MergeReport {
                    key,
                    status,
                    warning,
                }
            }
        }
    }

    fn resolve(&self, paper: &Paper) -> Resolution {
        for index_key in paper.ids.index_keys() {
            if let Some(key) = self.id_index.get(&index_key) {
                return Resolution::Exact(key.clone());
            }
        }
        if self.papers.contains_key(&paper.key) {
            return Resolution::Exact(paper.key.clone());
        }
        if paper.title_key.is_empty() {
            return Resolution::New;
        }

        let Some(bucket) = self.surname_index.get(paper.first_author_surname()) else {
            return Resolution::New;
        };

        let mut best: Option<(&PaperKey, f64)> = None;
        for candidate_key in bucket {
            let Some(candidate) = self.papers.get(candidate_key) else {
                continue;
            };
            if candidate.ids.conflicts_with(&paper.ids) {
                continue;
            }
            let similarity = strsim::normalized_levenshtein(&candidate.title_key, &paper.title_key);
            if similarity >= FUZZY_MATCH_THRESHOLD
                && best.is_none_or(|(_, current)| similarity > current)
            {
                best = Some((candidate_key, similarity));
            }
        }

        best.map_or(Resolution::New, |(key, similarity)| {
            Resolution::Fuzzy(key.clone(), similarity)
        })
    }

    pub(super) fn insert_new(&mut self, paper: Paper) {
        let key = paper.key.clone();
        self.index_paper(&paper);
        self.papers.insert(key, paper);
    }

    fn index_paper(&mut self, paper: &Paper) {
        for index_key in paper.ids.index_keys() {
            let owner = self
                .id_index
                .entry(index_key)
                .or_insert_with(|| paper.key.clone());
            if owner != &paper.key {
                debug!(paper = %paper.key, owner = %owner, "identifier already owned by another paper");
            }
        }
        let bucket = self
            .surname_index
            .entry(paper.first_author_surname().to_string())
            .or_default();
        if !bucket.contains(&paper.key) {
            bucket.push(paper.key.clone());
        }
    }

    fn enrich_existing(&mut self, key: &PaperKey, incoming: Paper) -> MergeStatus {
        let Some(existing) = self.papers.get_mut(key) else {
            return MergeStatus::Unchanged;
        };
        let before = existing.clone();
        enrich(existing, incoming);
        if *existing == before {
            return MergeStatus::Unchanged;
        }

        debug!(paper = %key, "paper enriched");
        let snapshot = existing.clone();
        self.index_paper(&snapshot);
        MergeStatus::Enriched
    }
}

/// Folds `incoming` into `existing` without touching its identity.
fn enrich(existing: &mut Paper, incoming: Paper) {
    existing.ids.fill_from(&incoming.ids);
    existing.sources.extend(incoming.sources);
    existing.keywords.extend(incoming.keywords);
    existing.affiliations.extend(incoming.affiliations);

    if existing.abstract_text.is_none() {
        existing.abstract_text = incoming.abstract_text;
    }
    if existing.journal.is_none() {
        existing.journal = incoming.journal;
    }
    existing.published = match (existing.published, incoming.published) {
        (Some(current), Some(candidate)) => Some(current.more_precise(candidate)),
        (current, candidate) => current.or(candidate),
    };

    merge_authors(&mut existing.authors, incoming.authors);

    if let Some(count) = incoming.citation_count {
        let incoming_authority = incoming
            .citation_source
            .map_or(0, crate::source::SourceId::citation_authority);
        let existing_authority = existing
            .citation_source
            .map_or(0, crate::source::SourceId::citation_authority);
        if existing.citation_count.is_none() || incoming_authority >= existing_authority {
            existing.citation_count = Some(count);
            existing.citation_source = incoming.citation_source;
        }
    }
}

/// Unions name variants per position when both bylines line up by surname;
/// otherwise the longer byline wins and keeps variants of matching keys.
fn merge_authors(existing: &mut Vec<PaperAuthor>, incoming: Vec<PaperAuthor>) {
    let aligned = existing.len() == incoming.len()
        && existing
            .iter()
            .zip(&incoming)
            .all(|(current, candidate)| current.key.surname() == candidate.key.surname());

    if aligned {
        for (current, candidate) in existing.iter_mut().zip(incoming) {
            current.variants.extend(candidate.variants);
        }
    } else if incoming.len() > existing.len() {
        let mut replacement = incoming;
        for author in &mut replacement {
            if let Some(previous) = existing.iter().find(|previous| previous.key == author.key) {
                author.variants.extend(previous.variants.iter().cloned());
            }
        }
        *existing = replacement;
    }
}
