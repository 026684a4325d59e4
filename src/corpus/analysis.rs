//! Summary statistics over the collaboration graph.

use std::collections::HashMap;

use serde::Serialize;
use tracing::instrument;

use super::Corpus;
use super::model::AuthorKey;

/// Number of authors listed by [`network_analysis`].
pub const DEFAULT_TOP_AUTHORS: usize = 10;

/// One entry of the most-collaborative ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollaboratorRank {
    /// Author identity.
    pub key: AuthorKey,
    /// First-seen display form.
    pub display_name: String,
    /// Sum of edge counts touching this author.
    pub collaboration_count: u64,
    /// Number of distinct co-authors.
    pub distinct_collaborators: usize,
}

/// Network-level report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkAnalysis {
    /// Author nodes.
    pub total_authors: usize,
    /// Distinct papers.
    pub total_papers: usize,
    /// Distinct collaborating pairs.
    pub total_collaborations: usize,
    /// Mean number of distinct co-authors per author.
    pub average_collaborations_per_author: f64,
    /// Authors ordered by collaboration count.
    pub most_collaborative_authors: Vec<CollaboratorRank>,
    /// Connected components, isolated authors included.
    pub connected_component_count: usize,
    /// Size of the largest component (0 for an empty graph).
    pub largest_component_size: usize,
}

/// Analysis with the default ranking length.
#[must_use]
pub fn network_analysis(corpus: &Corpus) -> NetworkAnalysis {
    analyze_network(corpus, DEFAULT_TOP_AUTHORS)
}

/// Computes totals, the top `top_n` collaborators and component structure.
///
/// Ranking ties are broken by author key so the output is deterministic.
#[must_use]
#[instrument(skip(corpus), fields(papers = corpus.paper_count()))]
pub fn analyze_network(corpus: &Corpus, top_n: usize) -> NetworkAnalysis {
    let graph = corpus.graph();
    let total_authors = graph.author_count();
    let total_collaborations = graph.edge_count();

    let mut distinct: HashMap<&AuthorKey, usize> = HashMap::new();
    for edge in graph.collaborations() {
        *distinct.entry(edge.pair.first()).or_default() += 1;
        *distinct.entry(edge.pair.second()).or_default() += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    let average_collaborations_per_author = if total_authors == 0 {
        0.0
    } else {
        (2 * total_collaborations) as f64 / total_authors as f64
    };

    let mut ranking: Vec<CollaboratorRank> = graph
        .authors()
        .map(|author| CollaboratorRank {
            key: author.key.clone(),
            display_name: author.display_name.clone(),
            collaboration_count: graph.weighted_degree(&author.key),
            distinct_collaborators: distinct.get(&author.key).copied().unwrap_or(0),
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.collaboration_count
            .cmp(&a.collaboration_count)
            .then_with(|| a.key.cmp(&b.key))
    });
    ranking.truncate(top_n);

    let (connected_component_count, largest_component_size) = components(corpus);

    NetworkAnalysis {
        total_authors,
        total_papers: corpus.paper_count(),
        total_collaborations,
        average_collaborations_per_author,
        most_collaborative_authors: ranking,
        connected_component_count,
        largest_component_size,
    }
}

fn find(parent: &mut [usize], mut node: usize) -> usize {
    while parent[node] != node {
        parent[node] = parent[parent[node]];
        node = parent[node];
    }
    node
}

/// Union-find over author indices; returns (component count, largest size).
fn components(corpus: &Corpus) -> (usize, usize) {
    let graph = corpus.graph();
    let index: HashMap<&AuthorKey, usize> = graph
        .authors()
        .enumerate()
        .map(|(position, author)| (&author.key, position))
        .collect();
    let mut parent: Vec<usize> = (0..index.len()).collect();

    for edge in graph.collaborations() {
        let (Some(&a), Some(&b)) = (index.get(edge.pair.first()), index.get(edge.pair.second()))
        else {
            continue;
        };
        let (root_a, root_b) = (find(&mut parent, a), find(&mut parent, b));
        if root_a != root_b {
            parent[root_b] = root_a;
        }
    }

    let mut sizes: HashMap<usize, usize> = HashMap::new();
    for node in 0..parent.len() {
        *sizes.entry(find(&mut parent, node)).or_default() += 1;
    }
    (sizes.len(), sizes.values().copied().max().unwrap_or(0))
}
