//! Network expansion controller.
//!
//! A session runs in generations. Each generation queries every frontier
//! author against every author-capable source (in registration order),
//! commits the returned records to the shared corpus, and derives the next
//! frontier from co-authors that have not been queried yet, most
//! collaborative first. Keyword sessions run a single generation with no
//! frontier.
//!
//! Adapter failures are recorded on the session and never abort it. Only
//! setup errors, a poisoned corpus and storage failures are fatal.
//!
//! # Example
//!
//! ```no_run
//! use papernet_core::config::EngineConfig;
//! use papernet_core::engine::{AuthorCollectionRequest, CollectionEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CollectionEngine::from_config(&EngineConfig::default());
//! let session = engine
//!     .collect_by_authors(AuthorCollectionRequest::new(["Alice Smith"], true))
//!     .await?;
//! println!("{} papers, stopped: {:?}", session.papers_found(), session.termination);
//! # Ok(())
//! # }
//! ```

mod error;
mod frontier;
mod request;
mod session;
mod sink;

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use error::SessionError;
pub use frontier::{FrontierEntry, PriorityFrontier};
pub use request::{
    AuthorCollectionRequest, DEFAULT_MAX_AUTHORS, DEFAULT_MAX_GENERATIONS,
    DEFAULT_MAX_KEYWORD_PAPERS, DEFAULT_MAX_NEW_AUTHORS_PER_GENERATION,
    DEFAULT_MAX_PAPERS_PER_AUTHOR, DEFAULT_MAX_TOTAL_PAPERS, ExpansionLimits,
    KeywordCollectionRequest,
};
pub use session::{
    CollectionSession, FailureKind, GenerationReport, PartialFailure, SessionKind, SessionState,
    SourceActivity, TerminationReason,
};
pub use sink::{CorpusDelta, CorpusSink};

use crate::config::EngineConfig;
use crate::corpus::{AuthorKey, CommitOutcome, GenerationLedger, SharedCorpus, author_key};
use crate::fetch::SourceGateway;
use crate::source::{
    LiteratureSource, QueryKind, SearchQuery, SourceRegistry, build_default_sources, search,
};
use sink::DeltaTracker;

/// How a single source query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryEnd {
    Finished,
    Failed,
    PaperBudget,
    Cancelled,
}

/// Working state of the generation in progress.
struct GenerationRun {
    ledger: GenerationLedger,
    report: GenerationReport,
    tracker: DeltaTracker,
    discovered: Vec<AuthorKey>,
    discovered_seen: HashSet<AuthorKey>,
}

impl GenerationRun {
    fn new(generation: u32) -> Self {
        Self {
            ledger: GenerationLedger::new(generation),
            report: GenerationReport::new(generation),
            tracker: DeltaTracker::default(),
            discovered: Vec::new(),
            discovered_seen: HashSet::new(),
        }
    }

    fn generation(&self) -> u32 {
        self.ledger.generation()
    }

    fn absorb(&mut self, outcome: &CommitOutcome) {
        self.report.count_merge(&outcome.merge);
        self.report.edge_updates += outcome.edges.len();
        self.tracker.touch_paper(&outcome.merge.key, &outcome.authors);
        for edge in &outcome.edges {
            self.tracker.touch_pair(&edge.pair);
        }
        for author in &outcome.authors {
            if self.discovered_seen.insert(author.clone()) {
                self.discovered.push(author.clone());
            }
        }
    }
}

/// Drives collection sessions against a source registry and a shared corpus.
pub struct CollectionEngine {
    registry: SourceRegistry,
    gateway: SourceGateway,
    corpus: SharedCorpus,
    sink: Option<Arc<dyn CorpusSink>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for CollectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionEngine")
            .field("registry", &self.registry)
            .field("has_sink", &self.sink.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl CollectionEngine {
    /// Creates an engine over `registry` with a fresh in-memory corpus.
    #[must_use]
    pub fn new(registry: SourceRegistry, gateway: SourceGateway) -> Self {
        Self {
            registry,
            gateway,
            corpus: SharedCorpus::default(),
            sink: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds sources, limiter and retry policy from configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        let gateway = SourceGateway::new(Arc::new(config.rate_limiter()), config.retry_policy());
        Self::new(build_default_sources(config), gateway)
    }

    /// Uses an existing (possibly shared) corpus.
    #[must_use]
    pub fn with_corpus(mut self, corpus: SharedCorpus) -> Self {
        self.corpus = corpus;
        self
    }

    /// Persists every finished generation through `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn CorpusSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Uses `token` for cooperative cancellation.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The corpus sessions commit into.
    #[must_use]
    pub fn corpus(&self) -> &SharedCorpus {
        &self.corpus
    }

    /// The registered sources.
    #[must_use]
    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Token that cancels running sessions at the next source-call boundary.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Collects papers for `request.seeds`, expanding through co-authors
    /// when `request.expand` is set.
    ///
    /// Generation 1 queries the seeds in input order. Each later generation
    /// queries co-authors found in the previous one, ordered by collaboration
    /// count (ties: first discovered) and truncated to
    /// `max_new_authors_per_generation`. An author is never queried twice.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Config`] for invalid limits, no usable seeds, or no
    ///   author-capable sources
    /// - [`SessionError::Corpus`] if the shared corpus lock is poisoned
    /// - [`SessionError::Storage`] if the sink fails; the partial session is attached
    #[instrument(skip(self, request), fields(seeds = request.seeds.len(), expand = request.expand))]
    pub async fn collect_by_authors(
        &self,
        request: AuthorCollectionRequest,
    ) -> Result<CollectionSession, SessionError> {
        let limits = request.limits;
        limits.validate()?;

        let sources = self.registry.sources_for(QueryKind::Author);
        if sources.is_empty() {
            return Err(SessionError::config(
                "no sources configured for author queries",
            ));
        }

        let mut frontier = seed_frontier(&request.seeds);
        if frontier.is_empty() {
            return Err(SessionError::config(
                "at least one non-empty seed author is required",
            ));
        }

        let mut session = CollectionSession::new(SessionKind::Authors, request.seeds.clone());
        let mut visited: HashSet<AuthorKey> = HashSet::new();
        session.state = SessionState::Expanding;
        info!(
            seeds = frontier.len(),
            sources = ?self.registry.ids(),
            max_generations = limits.max_generations,
            "starting author collection"
        );

        loop {
            let generation = session.generation + 1;
            session.generation = generation;
            let mut run = GenerationRun::new(generation);
            let mut stop = None;

            'authors: for entry in frontier {
                if self.cancel.is_cancelled() {
                    stop = Some(TerminationReason::Cancelled);
                    break;
                }
                if visited.len() >= limits.max_authors {
                    stop = Some(TerminationReason::AuthorBudget);
                    break;
                }
                if session.papers_found() >= limits.max_total_papers {
                    stop = Some(TerminationReason::PaperBudget);
                    break;
                }

                debug!(generation, author = %entry.name, "querying author");
                visited.insert(entry.key);
                session.authors_queried += 1;
                run.report.queried.push(entry.name.clone());

                for source in &sources {
                    let end = self
                        .run_query(
                            source.as_ref(),
                            SearchQuery::author(entry.name.clone()),
                            limits.max_papers_per_author,
                            limits.max_total_papers,
                            &mut run,
                            &mut session,
                        )
                        .await?;
                    match end {
                        QueryEnd::PaperBudget => {
                            stop = Some(TerminationReason::PaperBudget);
                            break 'authors;
                        }
                        QueryEnd::Cancelled => {
                            stop = Some(TerminationReason::Cancelled);
                            break 'authors;
                        }
                        QueryEnd::Finished | QueryEnd::Failed => {}
                    }
                }
            }

            if stop.is_none() && self.cancel.is_cancelled() {
                stop = Some(TerminationReason::Cancelled);
            }

            let next = if stop.is_none() && request.expand {
                let candidates = &run.discovered;
                self.corpus.read(|corpus| {
                    PriorityFrontier::from_candidates(candidates, &visited, corpus.graph())
                        .take(limits.max_new_authors_per_generation)
                })?
            } else {
                Vec::new()
            };
            run.report.next_frontier = next.iter().map(|entry| entry.name.clone()).collect();

            let stop = stop.or_else(|| {
                if next.is_empty() {
                    Some(TerminationReason::FrontierEmpty)
                } else if generation >= limits.max_generations {
                    Some(TerminationReason::GenerationLimit)
                } else {
                    None
                }
            });

            session = self.close_generation(session, run).await?;

            if let Some(reason) = stop {
                session.finish(reason);
                break;
            }
            frontier = next;
        }

        info!(
            generations = session.generation,
            papers = session.papers_found(),
            authors = session.authors_queried,
            failures = session.failures.len(),
            termination = ?session.termination,
            "author collection finished"
        );
        Ok(session)
    }

    /// Collects up to `request.max_papers` distinct papers matching all
    /// keywords, one combined query per keyword-capable source.
    ///
    /// Returned papers still update the collaboration graph, but no
    /// frontier is built.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Config`] for an empty keyword list, a zero limit, or
    ///   no keyword-capable sources
    /// - [`SessionError::Corpus`] if the shared corpus lock is poisoned
    /// - [`SessionError::Storage`] if the sink fails; the partial session is attached
    #[instrument(skip(self, request), fields(keywords = request.keywords.len(), max_papers = request.max_papers))]
    pub async fn collect_by_keywords(
        &self,
        request: KeywordCollectionRequest,
    ) -> Result<CollectionSession, SessionError> {
        let keywords: Vec<String> = request
            .keywords
            .iter()
            .map(|keyword| keyword.trim().to_string())
            .filter(|keyword| !keyword.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(SessionError::config("at least one keyword is required"));
        }
        if request.max_papers == 0 {
            return Err(SessionError::config("max_papers must be at least 1"));
        }

        let sources = self.registry.sources_for(QueryKind::Keyword);
        if sources.is_empty() {
            return Err(SessionError::config(
                "no sources configured for keyword queries",
            ));
        }

        let mut session = CollectionSession::new(SessionKind::Keywords, keywords.clone());
        session.state = SessionState::Expanding;
        session.generation = 1;
        let mut run = GenerationRun::new(1);
        let query = SearchQuery::keywords(keywords);
        let mut reason = TerminationReason::FrontierEmpty;

        info!(query = %query.label(), "starting keyword collection");

        for source in &sources {
            if self.cancel.is_cancelled() {
                reason = TerminationReason::Cancelled;
                break;
            }
            let remaining = request.max_papers.saturating_sub(session.papers_found());
            if remaining == 0 {
                reason = TerminationReason::PaperBudget;
                break;
            }

            match self
                .run_query(
                    source.as_ref(),
                    query.clone(),
                    remaining,
                    request.max_papers,
                    &mut run,
                    &mut session,
                )
                .await?
            {
                QueryEnd::PaperBudget => {
                    reason = TerminationReason::PaperBudget;
                    break;
                }
                QueryEnd::Cancelled => {
                    reason = TerminationReason::Cancelled;
                    break;
                }
                QueryEnd::Finished | QueryEnd::Failed => {}
            }
        }

        session = self.close_generation(session, run).await?;
        session.finish(reason);

        info!(
            papers = session.papers_found(),
            failures = session.failures.len(),
            termination = ?session.termination,
            "keyword collection finished"
        );
        Ok(session)
    }

    /// Streams one query into the corpus until the source is exhausted, an
    /// error ends it, the session paper budget is met, or cancellation.
    async fn run_query(
        &self,
        source: &dyn LiteratureSource,
        query: SearchQuery,
        limit: usize,
        paper_budget: usize,
        run: &mut GenerationRun,
        session: &mut CollectionSession,
    ) -> Result<QueryEnd, SessionError> {
        let label = query.label();
        let source_id = source.id();
        let mut results = search(source, &self.gateway, query, limit)
            .with_cancellation(self.cancel.clone());
        let mut end = QueryEnd::Finished;

        loop {
            if session.papers_found() >= paper_budget {
                end = QueryEnd::PaperBudget;
                break;
            }
            let Some(item) = results.next().await else {
                break;
            };
            match item {
                Ok(raw) => {
                    let outcome = self.corpus.commit(raw, &mut run.ledger)?;
                    session.record_merge(&outcome.merge);
                    run.absorb(&outcome);
                }
                Err(error) => {
                    warn!(
                        source = %source_id,
                        query = %label,
                        error = %error,
                        "query ended early; continuing with remaining work"
                    );
                    session
                        .failures
                        .push(PartialFailure::new(run.generation(), label.clone(), &error));
                    end = QueryEnd::Failed;
                    break;
                }
            }
        }

        let stats = results.stats();
        if stats.cancelled {
            end = QueryEnd::Cancelled;
        }
        session.record_search(source_id, stats);
        debug!(source = %source_id, query = %label, calls = stats.calls, end = ?end, "query done");
        Ok(end)
    }

    /// Records the generation report and persists what the generation touched.
    async fn close_generation(
        &self,
        mut session: CollectionSession,
        run: GenerationRun,
    ) -> Result<CollectionSession, SessionError> {
        let generation = run.generation();
        info!(
            generation,
            queried = run.report.queried.len(),
            records = run.report.records,
            created = run.report.papers_created,
            enriched = run.report.papers_enriched,
            next_frontier = run.report.next_frontier.len(),
            "generation complete"
        );

        if let Some(sink) = &self.sink {
            let delta = self
                .corpus
                .read(|corpus| run.tracker.resolve(generation, corpus))?;
            if !delta.is_empty() {
                if let Err(source) = sink.persist(&delta).await {
                    warn!(generation, error = %source, "persisting generation failed");
                    session.generations.push(run.report);
                    return Err(SessionError::Storage {
                        session: Box::new(session),
                        source,
                    });
                }
                debug!(
                    generation,
                    papers = delta.papers.len(),
                    collaborations = delta.collaborations.len(),
                    "generation persisted"
                );
            }
        }

        session.generations.push(run.report);
        Ok(session)
    }
}

/// Seed authors in input order, deduplicated by identity.
fn seed_frontier(seeds: &[String]) -> Vec<FrontierEntry> {
    let mut seen = HashSet::new();
    let mut frontier = Vec::new();
    for seed in seeds {
        let Some(key) = author_key(seed) else {
            warn!(seed = %seed, "ignoring seed without a usable name");
            continue;
        };
        if !seen.insert(key.clone()) {
            continue;
        }
        frontier.push(FrontierEntry {
            key,
            name: seed.trim().to_string(),
            collaboration_count: 0,
            discovery_seq: frontier.len() as u64,
        });
    }
    frontier
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_frontier_keeps_order_and_dedupes() {
        let seeds = vec![
            "Bob Lee".to_string(),
            "  ".to_string(),
            "Alice Smith".to_string(),
            "Smith, Alice".to_string(),
        ];
        let names: Vec<_> = seed_frontier(&seeds).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Bob Lee", "Alice Smith"]);
    }
}
