//! Collaboration graph: author nodes and accumulating co-authorship edges.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use super::model::{AuthorKey, Paper, PaperKey};

/// Unordered author pair, stored with the lexicographically smaller key first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AuthorPair {
    first: AuthorKey,
    second: AuthorKey,
}

impl AuthorPair {
    /// Normalizes `a` and `b` into one pair; `None` when both are the same author.
    #[must_use]
    pub fn new(a: AuthorKey, b: AuthorKey) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self {
                first: a,
                second: b,
            }),
            std::cmp::Ordering::Greater => Some(Self {
                first: b,
                second: a,
            }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Lexicographically smaller key.
    #[must_use]
    pub fn first(&self) -> &AuthorKey {
        &self.first
    }

    /// Lexicographically larger key.
    #[must_use]
    pub fn second(&self) -> &AuthorKey {
        &self.second
    }

    /// The other member of the pair, if `key` is one of them.
    #[must_use]
    pub fn other(&self, key: &AuthorKey) -> Option<&AuthorKey> {
        if &self.first == key {
            Some(&self.second)
        } else if &self.second == key {
            Some(&self.first)
        } else {
            None
        }
    }
}

/// Author node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    /// Normalized identity.
    pub key: AuthorKey,
    /// Display form as first seen.
    pub display_name: String,
    /// Papers this author appears on.
    pub papers: BTreeSet<PaperKey>,
    /// Generation in which the author was first seen (1-based, never lowered).
    pub depth: u32,
    /// Global first-seen order, used to break priority ties.
    pub discovery_seq: u64,
}

/// Accumulated co-authorship between one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collaboration {
    /// The pair.
    pub pair: AuthorPair,
    /// Co-occurrence count; only ever increases.
    pub count: u64,
    /// Papers that produced the co-occurrences.
    pub papers: BTreeSet<PaperKey>,
}

/// One edge increment produced by [`CollaborationGraph::ingest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeUpdate {
    /// The pair that was incremented.
    pub pair: AuthorPair,
    /// Count after the increment.
    pub count: u64,
    /// Paper that produced the increment.
    pub paper: PaperKey,
}

/// Author nodes plus co-authorship edges.
#[derive(Debug, Clone, Default)]
pub struct CollaborationGraph {
    authors: BTreeMap<AuthorKey, Author>,
    edges: BTreeMap<AuthorPair, Collaboration>,
    weighted_degree: HashMap<AuthorKey, u64>,
    next_seq: u64,
}

impl CollaborationGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a graph from persisted nodes and edges.
    ///
    /// Weighted degrees are recomputed from the edge counts, and authors
    /// discovered afterwards are numbered after the highest stored sequence.
    #[must_use]
    pub fn restore(
        authors: impl IntoIterator<Item = Author>,
        edges: impl IntoIterator<Item = Collaboration>,
    ) -> Self {
        let mut graph = Self::new();
        for author in authors {
            graph.next_seq = graph.next_seq.max(author.discovery_seq.saturating_add(1));
            graph.authors.insert(author.key.clone(), author);
        }
        for edge in edges {
            for key in [edge.pair.first(), edge.pair.second()] {
                *graph.weighted_degree.entry(key.clone()).or_default() += edge.count;
            }
            graph.edges.insert(edge.pair.clone(), edge);
        }
        graph
    }

    /// Registers the paper's authors and increments every unordered pair once.
    ///
    /// New authors get `depth = generation`. Single-author papers register
    /// their author and produce no updates. The result is sorted by pair, so
    /// any permutation of the byline yields the same updates.
    pub fn ingest(&mut self, paper: &Paper, generation: u32) -> Vec<EdgeUpdate> {
        self.register_authors(paper, generation);

        let keys: BTreeSet<&AuthorKey> = paper.author_keys().collect();
        let keys: Vec<&AuthorKey> = keys.into_iter().collect();
        let mut updates = Vec::new();

        for (index, a) in keys.iter().enumerate() {
            for b in &keys[index + 1..] {
                let Some(pair) = AuthorPair::new((*a).clone(), (*b).clone()) else {
                    continue;
                };
                let edge = self
                    .edges
                    .entry(pair.clone())
                    .or_insert_with(|| Collaboration {
                        pair: pair.clone(),
                        count: 0,
                        papers: BTreeSet::new(),
                    });
                edge.count += 1;
                edge.papers.insert(paper.key.clone());
                *self.weighted_degree.entry((*a).clone()).or_default() += 1;
                *self.weighted_degree.entry((*b).clone()).or_default() += 1;
                updates.push(EdgeUpdate {
                    pair,
                    count: edge.count,
                    paper: paper.key.clone(),
                });
            }
        }

        updates
    }

    /// Ensures every author on the paper has a node and lists the paper,
    /// without touching edges.
    pub fn register_authors(&mut self, paper: &Paper, generation: u32) {
        for author in &paper.authors {
            let node = self.authors.entry(author.key.clone()).or_insert_with(|| {
                let seq = self.next_seq;
                self.next_seq += 1;
                Author {
                    key: author.key.clone(),
                    display_name: author.name.clone(),
                    papers: BTreeSet::new(),
                    depth: generation,
                    discovery_seq: seq,
                }
            });
            node.papers.insert(paper.key.clone());
        }
    }

    /// Looks up an author node.
    #[must_use]
    pub fn author(&self, key: &AuthorKey) -> Option<&Author> {
        self.authors.get(key)
    }

    /// All author nodes in key order.
    pub fn authors(&self) -> impl Iterator<Item = &Author> {
        self.authors.values()
    }

    /// All edges in pair order.
    pub fn collaborations(&self) -> impl Iterator<Item = &Collaboration> {
        self.edges.values()
    }

    /// Edge between `a` and `b`, in either order.
    #[must_use]
    pub fn collaboration(&self, a: &AuthorKey, b: &AuthorKey) -> Option<&Collaboration> {
        let pair = AuthorPair::new(a.clone(), b.clone())?;
        self.edges.get(&pair)
    }

    /// Sum of edge counts touching `key`.
    #[must_use]
    pub fn weighted_degree(&self, key: &AuthorKey) -> u64 {
        self.weighted_degree.get(key).copied().unwrap_or(0)
    }

    /// Number of author nodes.
    #[must_use]
    pub fn author_count(&self) -> usize {
        self.authors.len()
    }

    /// Number of distinct pairs.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
