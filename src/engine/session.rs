//! Session report: what one collection run did and why it stopped.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::corpus::{MergeReport, MergeStatus, MergeWarning, PaperKey};
use crate::fetch::{FailureType, classify_error};
use crate::source::{SearchStats, SourceError, SourceId};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created from a request, nothing queried yet.
    Seeded,
    /// Generations are running.
    Expanding,
    /// Terminal.
    Done,
}

/// Why a session reached [`SessionState::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// No unvisited authors were left to query.
    FrontierEmpty,
    /// `max_generations` generations ran.
    GenerationLimit,
    /// `max_total_papers` distinct papers were collected.
    PaperBudget,
    /// `max_authors` authors were queried.
    AuthorBudget,
    /// Cancellation was requested.
    Cancelled,
}

/// Which entry point created the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// `collect_by_authors`.
    Authors,
    /// `collect_by_keywords`.
    Keywords,
}

/// Session-level failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retries were exhausted on a transient error.
    TransientExhausted,
    /// The source had nothing for the query or refused it.
    PermanentQuery,
    /// The source still answered 429 after the limiter and retries.
    RateLimitViolation,
}

impl FailureKind {
    /// Maps a terminal adapter error to its session class.
    #[must_use]
    pub fn from_error(error: &SourceError) -> Self {
        match classify_error(error) {
            FailureType::Transient => Self::TransientExhausted,
            FailureType::Permanent => Self::PermanentQuery,
            FailureType::RateLimited => Self::RateLimitViolation,
        }
    }
}

/// One query that ended early on one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialFailure {
    /// Generation the query ran in.
    pub generation: u32,
    /// Author name or keyword label.
    pub query: String,
    /// Source that failed.
    pub source: SourceId,
    /// Failure class.
    pub kind: FailureKind,
    /// Error text.
    pub message: String,
}

impl PartialFailure {
    /// Records `error` against `query`.
    #[must_use]
    pub fn new(generation: u32, query: impl Into<String>, error: &SourceError) -> Self {
        Self {
            generation,
            query: query.into(),
            source: error.source_id(),
            kind: FailureKind::from_error(error),
            message: error.to_string(),
        }
    }
}

/// Call accounting for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceActivity {
    /// Queries issued.
    pub queries: u64,
    /// Network round-trips, retries included.
    pub calls: u64,
    /// Retried round-trips.
    pub retries: u64,
    /// Pages fetched.
    pub pages: u64,
}

impl SourceActivity {
    fn absorb(&mut self, stats: SearchStats) {
        self.queries += 1;
        self.calls += stats.calls;
        self.retries += stats.retries;
        self.pages += stats.pages;
    }
}

/// Totals for one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    /// 1-based generation number.
    pub generation: u32,
    /// Authors queried, in query order (empty for keyword sessions).
    pub queried: Vec<String>,
    /// Raw records received.
    pub records: usize,
    /// Papers created.
    pub papers_created: usize,
    /// Existing papers that gained information.
    pub papers_enriched: usize,
    /// Edge increments.
    pub edge_updates: usize,
    /// Authors carried into the next generation.
    pub next_frontier: Vec<String>,
}

impl GenerationReport {
    pub(crate) fn new(generation: u32) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub(crate) fn count_merge(&mut self, report: &MergeReport) {
        self.records += 1;
        match report.status {
            MergeStatus::Created => self.papers_created += 1,
            MergeStatus::Enriched => self.papers_enriched += 1,
            MergeStatus::Unchanged => {}
        }
    }
}

/// Summary of one collection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSession {
    /// Entry point.
    pub kind: SessionKind,
    /// Seed authors or keywords as given.
    pub seeds: Vec<String>,
    /// Lifecycle state.
    pub state: SessionState,
    /// Last generation started (0 before the first).
    pub generation: u32,
    /// Per-generation totals.
    pub generations: Vec<GenerationReport>,
    /// Distinct papers returned during the run.
    pub papers: BTreeSet<PaperKey>,
    /// Papers first created by this run.
    pub papers_created: BTreeSet<PaperKey>,
    /// Pre-existing papers this run enriched.
    pub papers_enriched: BTreeSet<PaperKey>,
    /// Authors queried during the run.
    pub authors_queried: usize,
    /// Call accounting per source.
    pub sources: BTreeMap<SourceId, SourceActivity>,
    /// Queries that ended early.
    pub failures: Vec<PartialFailure>,
    /// Low-confidence fuzzy merges.
    pub merge_warnings: Vec<MergeWarning>,
    /// Why the run stopped (set once [`SessionState::Done`]).
    pub termination: Option<TerminationReason>,
}

impl CollectionSession {
    pub(crate) fn new(kind: SessionKind, seeds: Vec<String>) -> Self {
        Self {
            kind,
            seeds,
            state: SessionState::Seeded,
            generation: 0,
            generations: Vec::new(),
            papers: BTreeSet::new(),
            papers_created: BTreeSet::new(),
            papers_enriched: BTreeSet::new(),
            authors_queried: 0,
            sources: BTreeMap::new(),
            failures: Vec::new(),
            merge_warnings: Vec::new(),
            termination: None,
        }
    }

    /// Number of distinct papers the run returned.
    #[must_use]
    pub fn papers_found(&self) -> usize {
        self.papers.len()
    }

    /// Total network round-trips across sources.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.sources.values().map(|activity| activity.calls).sum()
    }

    /// True once the session has stopped.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == SessionState::Done
    }

    pub(crate) fn record_merge(&mut self, report: &MergeReport) {
        self.papers.insert(report.key.clone());
        match report.status {
            MergeStatus::Created => {
                self.papers_created.insert(report.key.clone());
            }
            MergeStatus::Enriched => {
                if !self.papers_created.contains(&report.key) {
                    self.papers_enriched.insert(report.key.clone());
                }
            }
            MergeStatus::Unchanged => {}
        }
        if let Some(warning) = &report.warning {
            self.merge_warnings.push(warning.clone());
        }
    }

    pub(crate) fn record_search(&mut self, source: SourceId, stats: SearchStats) {
        self.sources.entry(source).or_default().absorb(stats);
    }

    pub(crate) fn finish(&mut self, reason: TerminationReason) {
        self.state = SessionState::Done;
        self.termination = Some(reason);
    }
}
