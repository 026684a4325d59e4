//! In-memory literature source driven by a fixed script of results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use papernet_core::engine::CollectionEngine;
use papernet_core::fetch::{FetchContext, RateLimiter, RetryPolicy, SourceGateway};
use papernet_core::source::{
    LiteratureSource, Page, PageCursor, PageRequest, QueryKind, RawPaper, SourceError, SourceId,
    SourceRegistry,
};
use tokio_util::sync::CancellationToken;

/// How a scripted query fails.
#[derive(Debug, Clone, Copy)]
pub enum ScriptedFailure {
    /// 503 after retries.
    Outage,
    /// Nothing known about the query.
    Unknown,
}

/// A source that answers from per-query tables.
pub struct ScriptedSource {
    id: SourceId,
    keywords: bool,
    page_size: usize,
    results: HashMap<String, Vec<RawPaper>>,
    failures: HashMap<String, ScriptedFailure>,
    cancel_on: Option<(String, CancellationToken)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(id: SourceId) -> Self {
        Self {
            id,
            keywords: true,
            page_size: 100,
            results: HashMap::new(),
            failures: HashMap::new(),
            cancel_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers `query` (author name or comma-joined keywords) with `papers`.
    pub fn with(mut self, query: &str, papers: Vec<RawPaper>) -> Self {
        self.results.insert(query.to_string(), papers);
        self
    }

    pub fn failing(mut self, query: &str, failure: ScriptedFailure) -> Self {
        self.failures.insert(query.to_string(), failure);
        self
    }

    pub fn without_keywords(mut self) -> Self {
        self.keywords = false;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Cancels `token` when `query` is served.
    pub fn cancel_when(mut self, query: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((query.to_string(), token));
        self
    }

    /// Queries served so far, one entry per page.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LiteratureSource for ScriptedSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn supports(&self, kind: QueryKind) -> bool {
        kind == QueryKind::Author || self.keywords
    }

    fn max_page_size(&self) -> usize {
        self.page_size
    }

    async fn fetch_page(
        &self,
        request: &PageRequest,
        _ctx: &mut FetchContext<'_>,
    ) -> Result<Page, SourceError> {
        let label = request.query.label();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(label.clone());
        }
        if let Some((query, token)) = &self.cancel_on
            && *query == label
        {
            token.cancel();
        }

        match self.failures.get(&label) {
            Some(ScriptedFailure::Outage) => {
                return Err(SourceError::http_status(self.id, "scripted://", 503));
            }
            Some(ScriptedFailure::Unknown) => {
                return Err(SourceError::unknown_query(self.id, label));
            }
            None => {}
        }

        let papers = self.results.get(&label).cloned().unwrap_or_default();
        let start = request.cursor.offset.min(papers.len());
        let end = (start + request.page_size).min(papers.len());
        let page = papers[start..end].to_vec();
        if end < papers.len() {
            Ok(Page::with_next(page, PageCursor::at(end, None)))
        } else {
            Ok(Page::last(page))
        }
    }
}

/// A raw record with an arXiv id.
pub fn arxiv_paper(source: SourceId, id: &str, title: &str, authors: &[&str]) -> RawPaper {
    let mut raw = RawPaper::new(
        source,
        title,
        authors.iter().map(ToString::to_string).collect(),
    );
    raw.arxiv_id = Some(id.to_string());
    raw
}

/// A gateway with no pacing and near-instant retries.
pub fn fast_gateway() -> SourceGateway {
    SourceGateway::new(
        Arc::new(RateLimiter::disabled()),
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5), 2.0)
            .with_max_jitter(Duration::ZERO),
    )
}

/// An engine over the given sources, registered in order.
pub fn engine_with(sources: Vec<Arc<ScriptedSource>>) -> CollectionEngine {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(source);
    }
    CollectionEngine::new(registry, fast_gateway())
}
