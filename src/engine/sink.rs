//! Persistence seam the engine writes each finished generation through.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::corpus::{Author, AuthorKey, AuthorPair, Collaboration, Corpus, Paper, PaperKey};
use crate::store::StoreError;

/// Corpus records touched during one generation, as they stand after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusDelta {
    /// Generation that produced the changes.
    pub generation: u32,
    /// Papers returned in the generation.
    pub papers: Vec<Paper>,
    /// Authors of those papers.
    pub authors: Vec<Author>,
    /// Edges incremented in the generation.
    pub collaborations: Vec<Collaboration>,
}

impl CorpusDelta {
    /// True when the generation touched nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.papers.is_empty() && self.authors.is_empty() && self.collaborations.is_empty()
    }
}

/// Keys touched during a generation; resolved into a [`CorpusDelta`] once
/// the generation ends.
#[derive(Debug, Default)]
pub(crate) struct DeltaTracker {
    papers: BTreeSet<PaperKey>,
    authors: BTreeSet<AuthorKey>,
    pairs: BTreeSet<AuthorPair>,
}

impl DeltaTracker {
    pub(crate) fn touch_paper(&mut self, key: &PaperKey, authors: &[AuthorKey]) {
        self.papers.insert(key.clone());
        self.authors.extend(authors.iter().cloned());
    }

    pub(crate) fn touch_pair(&mut self, pair: &AuthorPair) {
        self.pairs.insert(pair.clone());
    }

    pub(crate) fn resolve(&self, generation: u32, corpus: &Corpus) -> CorpusDelta {
        let graph = corpus.graph();
        CorpusDelta {
            generation,
            papers: self
                .papers
                .iter()
                .filter_map(|key| corpus.paper(key).cloned())
                .collect(),
            authors: self
                .authors
                .iter()
                .filter_map(|key| graph.author(key).cloned())
                .collect(),
            collaborations: self
                .pairs
                .iter()
                .filter_map(|pair| graph.collaboration(pair.first(), pair.second()).cloned())
                .collect(),
        }
    }
}

/// Destination for per-generation corpus changes.
///
/// A failed write is fatal for the session; records persisted by earlier
/// generations stay committed.
#[async_trait]
pub trait CorpusSink: Send + Sync {
    /// Persists one generation's changes. Must be idempotent per identity.
    async fn persist(&self, delta: &CorpusDelta) -> Result<(), StoreError>;
}
