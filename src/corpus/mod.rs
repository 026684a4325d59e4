//! In-memory corpus: canonical papers, identity indexes and the
//! collaboration graph.
//!
//! A [`Corpus`] is an explicit value passed to whoever mutates it; sessions
//! that need to share one across tasks wrap it in a [`SharedCorpus`], whose
//! [`SharedCorpus::commit`] runs normalize, merge and ingest under one lock.

mod analysis;
mod graph;
mod merge;
mod model;
mod normalize;
mod shared;

use std::collections::{BTreeMap, HashMap, HashSet};

pub use analysis::{
    CollaboratorRank, DEFAULT_TOP_AUTHORS, NetworkAnalysis, analyze_network, network_analysis,
};
pub use graph::{Author, AuthorPair, Collaboration, CollaborationGraph, EdgeUpdate};
pub use merge::{
    CONFIDENT_MATCH_THRESHOLD, FUZZY_MATCH_THRESHOLD, MergeReport, MergeStatus, MergeWarning,
};
pub use model::{AuthorKey, ExternalIds, Paper, PaperAuthor, PaperKey, PartialDate};
pub use normalize::{
    author_key, display_name, normalize, normalize_arxiv_id, normalize_doi, normalize_pubmed_id,
    title_key,
};
pub use shared::{CorpusError, SharedCorpus};

use crate::source::RawPaper;

/// Canonical papers plus the collaboration graph derived from them.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    papers: BTreeMap<PaperKey, Paper>,
    /// `arxiv:…` / `pubmed:…` / `doi:…` to owning paper.
    id_index: HashMap<String, PaperKey>,
    /// First-author surname to papers, for fuzzy title matching.
    surname_index: HashMap<String, Vec<PaperKey>>,
    graph: CollaborationGraph,
}

/// Papers already ingested into the graph during one generation.
///
/// A paper returned by several queries in the same generation contributes
/// its edges once; a sighting in a later generation contributes again.
#[derive(Debug, Clone, Default)]
pub struct GenerationLedger {
    generation: u32,
    ingested: HashSet<PaperKey>,
}

impl GenerationLedger {
    /// Starts an empty ledger for `generation`.
    #[must_use]
    pub fn new(generation: u32) -> Self {
        Self {
            generation,
            ingested: HashSet::new(),
        }
    }

    /// Generation this ledger belongs to.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn first_sighting(&mut self, key: &PaperKey) -> bool {
        self.ingested.insert(key.clone())
    }
}

/// Result of committing one raw record.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Merge result.
    pub merge: MergeReport,
    /// Edge increments (empty on a repeat sighting within the generation).
    pub edges: Vec<EdgeUpdate>,
    /// Byline of the stored paper after the merge.
    pub authors: Vec<AuthorKey>,
}

impl Corpus {
    /// Creates an empty corpus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a corpus from persisted papers and graph.
    ///
    /// Identity indexes are derived from the papers; the graph is used as
    /// given, so edge counts keep growing from their stored values.
    #[must_use]
    pub fn restore(papers: impl IntoIterator<Item = Paper>, graph: CollaborationGraph) -> Self {
        let mut corpus = Self {
            graph,
            ..Self::default()
        };
        for paper in papers {
            corpus.insert_new(paper);
        }
        corpus
    }

    /// Looks up a paper by identity.
    #[must_use]
    pub fn paper(&self, key: &PaperKey) -> Option<&Paper> {
        self.papers.get(key)
    }

    /// All papers in key order.
    pub fn papers(&self) -> impl Iterator<Item = &Paper> {
        self.papers.values()
    }

    /// Number of distinct papers.
    #[must_use]
    pub fn paper_count(&self) -> usize {
        self.papers.len()
    }

    /// The collaboration graph.
    #[must_use]
    pub fn graph(&self) -> &CollaborationGraph {
        &self.graph
    }

    /// Feeds a stored paper's byline into the collaboration graph.
    pub fn ingest(&mut self, key: &PaperKey, generation: u32) -> Vec<EdgeUpdate> {
        match self.papers.get(key) {
            Some(paper) => self.graph.ingest(paper, generation),
            None => Vec::new(),
        }
    }

    /// Normalizes, merges and ingests one raw record.
    ///
    /// Edges are only incremented on the first sighting of a paper within
    /// the ledger's generation; later sightings still register any authors
    /// the merge added.
    pub fn commit(&mut self, raw: RawPaper, ledger: &mut GenerationLedger) -> CommitOutcome {
        let merge = self.merge(normalize(raw));
        let generation = ledger.generation();

        let edges = if ledger.first_sighting(&merge.key) {
            self.ingest(&merge.key, generation)
        } else {
            if let Some(paper) = self.papers.get(&merge.key) {
                self.graph.register_authors(paper, generation);
            }
            Vec::new()
        };

        let authors = self
            .papers
            .get(&merge.key)
            .map(|paper| paper.author_keys().cloned().collect())
            .unwrap_or_default();

        CommitOutcome {
            merge,
            edges,
            authors,
        }
    }
}
