//! Priority frontier of authors queued for the next generation.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::corpus::{AuthorKey, CollaborationGraph};

/// A queued author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Author identity.
    pub key: AuthorKey,
    /// Name sent to the sources.
    pub name: String,
    /// Weighted degree when the entry was queued.
    pub collaboration_count: u64,
    /// First-seen order of the author.
    pub discovery_seq: u64,
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher collaboration count first, then earlier discovery.
        self.collaboration_count
            .cmp(&other.collaboration_count)
            .then_with(|| other.discovery_seq.cmp(&self.discovery_seq))
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Authors ordered by descending collaboration count, ties broken by
/// first-discovered order.
#[derive(Debug, Default)]
pub struct PriorityFrontier {
    heap: BinaryHeap<FrontierEntry>,
    queued: HashSet<AuthorKey>,
}

impl PriorityFrontier {
    /// Creates an empty frontier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the next frontier from `candidates`, skipping visited authors
    /// and authors the graph does not know.
    #[must_use]
    pub fn from_candidates<'a>(
        candidates: impl IntoIterator<Item = &'a AuthorKey>,
        visited: &HashSet<AuthorKey>,
        graph: &CollaborationGraph,
    ) -> Self {
        let mut frontier = Self::new();
        for key in candidates {
            if visited.contains(key) {
                continue;
            }
            let Some(author) = graph.author(key) else {
                continue;
            };
            frontier.push(FrontierEntry {
                key: key.clone(),
                name: author.display_name.clone(),
                collaboration_count: graph.weighted_degree(key),
                discovery_seq: author.discovery_seq,
            });
        }
        frontier
    }

    /// Queues an entry; a key already queued is ignored.
    pub fn push(&mut self, entry: FrontierEntry) {
        if self.queued.insert(entry.key.clone()) {
            self.heap.push(entry);
        }
    }

    /// Removes the highest-priority entry.
    pub fn pop(&mut self) -> Option<FrontierEntry> {
        let entry = self.heap.pop()?;
        self.queued.remove(&entry.key);
        Some(entry)
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drains up to `limit` entries in priority order.
    pub fn take(mut self, limit: usize) -> Vec<FrontierEntry> {
        let mut taken = Vec::with_capacity(limit.min(self.len()));
        while taken.len() < limit {
            let Some(entry) = self.pop() else { break };
            taken.push(entry);
        }
        taken
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::corpus::{Corpus, GenerationLedger, author_key};
    use crate::source::{RawPaper, SourceId};

    fn entry(name: &str, count: u64, seq: u64) -> FrontierEntry {
        FrontierEntry {
            key: author_key(name).unwrap(),
            name: name.to_string(),
            collaboration_count: count,
            discovery_seq: seq,
        }
    }

    #[test]
    fn test_pop_orders_by_count_then_discovery() {
        let mut frontier = PriorityFrontier::new();
        frontier.push(entry("Late Low", 1, 5));
        frontier.push(entry("Late High", 3, 4));
        frontier.push(entry("Early High", 3, 1));

        let names: Vec<_> = frontier.take(10).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Early High", "Late High", "Late Low"]);
    }

    #[test]
    fn test_take_truncates_and_push_dedupes() {
        let mut frontier = PriorityFrontier::new();
        frontier.push(entry("A", 1, 0));
        frontier.push(entry("A", 9, 0));
        frontier.push(entry("B", 2, 1));
        assert_eq!(frontier.len(), 2);

        let taken = frontier.take(1);
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].name, "B");
    }

    #[test]
    fn test_from_candidates_skips_visited_and_reads_graph() {
        let mut corpus = Corpus::new();
        let mut raw = RawPaper::new(
            SourceId::Arxiv,
            "T",
            vec!["Alice Smith".into(), "Bob Lee".into(), "Carol Jones".into()],
        );
        raw.arxiv_id = Some("1".into());
        corpus.commit(raw, &mut GenerationLedger::new(1));
        let mut raw = RawPaper::new(SourceId::Arxiv, "U", vec!["Alice Smith".into(), "Carol Jones".into()]);
        raw.arxiv_id = Some("2".into());
        corpus.commit(raw, &mut GenerationLedger::new(1));

        let alice = author_key("Alice Smith").unwrap();
        let bob = author_key("Bob Lee").unwrap();
        let carol = author_key("Carol Jones").unwrap();
        let visited = HashSet::from([alice.clone()]);

        let frontier = PriorityFrontier::from_candidates(
            [&bob, &carol, &alice],
            &visited,
            corpus.graph(),
        );
        let taken = frontier.take(5);
        let names: Vec<_> = taken.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Carol Jones", "Bob Lee"]);
        assert_eq!(taken[0].collaboration_count, 3);
    }
}
