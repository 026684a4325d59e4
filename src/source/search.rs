//! Lazy paginated result sequences over a [`LiteratureSource`].

use std::collections::VecDeque;

use futures_util::Stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{LiteratureSource, PageCursor, PageRequest, RawPaper, SearchQuery, SourceError};
use crate::fetch::{CallStats, SourceGateway};

/// Accounting for one search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    /// Network round-trips sent, retries included.
    pub calls: u64,
    /// Round-trips that repeated a failed attempt.
    pub retries: u64,
    /// Pages successfully fetched.
    pub pages: u64,
    /// Whether the sequence stopped because cancellation was requested.
    pub cancelled: bool,
}

impl SearchStats {
    fn absorb(&mut self, calls: CallStats) {
        self.calls += calls.calls;
        self.retries += calls.retries;
    }
}

/// A lazy, finite sequence of raw records for one query against one source.
///
/// Pages are fetched on demand, in order, and never past `limit` records.
/// The first error ends the sequence: it is yielded once and then `next`
/// returns `None`.
pub struct PaperSearch<'a> {
    source: &'a dyn LiteratureSource,
    gateway: &'a SourceGateway,
    query: SearchQuery,
    limit: usize,
    yielded: usize,
    buffer: VecDeque<RawPaper>,
    cursor: Option<PageCursor>,
    cancel: Option<CancellationToken>,
    stats: SearchStats,
}

/// Starts a search of `source` for `query`, yielding at most `limit` records.
///
/// Nothing is fetched until the first call to [`PaperSearch::next`].
#[must_use]
pub fn search<'a>(
    source: &'a dyn LiteratureSource,
    gateway: &'a SourceGateway,
    query: SearchQuery,
    limit: usize,
) -> PaperSearch<'a> {
    PaperSearch {
        source,
        gateway,
        query,
        limit,
        yielded: 0,
        buffer: VecDeque::new(),
        cursor: Some(PageCursor::start()),
        cancel: None,
        stats: SearchStats::default(),
    }
}

impl<'a> PaperSearch<'a> {
    /// Stops fetching further pages once `token` is cancelled.
    ///
    /// Records from a page already fetched are still yielded.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Accounting so far.
    #[must_use]
    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    /// The query being searched.
    #[must_use]
    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    /// Returns the next record, fetching a page if the buffer is drained.
    #[instrument(skip(self), fields(source = %self.source.id(), query = %self.query.label()))]
    pub async fn next(&mut self) -> Option<Result<RawPaper, SourceError>> {
        loop {
            if self.yielded >= self.limit {
                return None;
            }

            if let Some(paper) = self.buffer.pop_front() {
                self.yielded += 1;
                return Some(Ok(paper));
            }

            let cursor = self.cursor.take()?;

            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                debug!("search cancelled before next page");
                self.stats.cancelled = true;
                return None;
            }

            let page_size = (self.limit - self.yielded)
                .min(self.source.max_page_size())
                .max(1);
            let request = PageRequest {
                query: self.query.clone(),
                cursor,
                page_size,
            };

            let mut ctx = self.gateway.context(self.source.id());
            let result = self.source.fetch_page(&request, &mut ctx).await;
            self.stats.absorb(ctx.stats());

            match result {
                Ok(page) => {
                    self.stats.pages += 1;
                    debug!(
                        records = page.papers.len(),
                        skipped = page.skipped,
                        has_more = page.next.is_some(),
                        "fetched page"
                    );
                    // A page the source returned empty ends the sequence even
                    // if it offers a cursor; one emptied by mapping does not.
                    if !page.is_exhausted() {
                        self.cursor = page.next;
                    }
                    self.buffer.extend(page.papers);
                }
                Err(error) => return Some(Err(error)),
            }
        }
    }

    /// Converts the search into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<RawPaper, SourceError>> + 'a {
        futures_util::stream::unfold(self, |mut search| async move {
            search.next().await.map(|item| (item, search))
        })
    }
}

impl std::fmt::Debug for PaperSearch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperSearch")
            .field("source", &self.source.id())
            .field("query", &self.query)
            .field("limit", &self.limit)
            .field("yielded", &self.yielded)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures_util::StreamExt;

    use super::*;
    use crate::fetch::{FetchContext, RateLimiter, RetryPolicy};
    use crate::source::{Page, QueryKind, SourceId};

    /// Serves `total` numbered records in pages, failing on `fail_at_page` if set.
    struct NumberedSource {
        total: usize,
        fail_at_page: Option<usize>,
        pages_served: AtomicUsize,
    }

    impl NumberedSource {
        fn new(total: usize) -> Self {
            Self {
                total,
                fail_at_page: None,
                pages_served: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LiteratureSource for NumberedSource {
        fn id(&self) -> SourceId {
            SourceId::Arxiv
        }

        fn supports(&self, _kind: QueryKind) -> bool {
            true
        }

        fn max_page_size(&self) -> usize {
            4
        }

        async fn fetch_page(
            &self,
            request: &PageRequest,
            _ctx: &mut FetchContext<'_>,
        ) -> Result<Page, SourceError> {
            let page_index = self.pages_served.fetch_add(1, Ordering::SeqCst);
            if self.fail_at_page == Some(page_index) {
                return Err(SourceError::malformed(SourceId::Arxiv, "mem://", "truncated"));
            }
            let start = request.cursor.offset;
            let end = (start + request.page_size).min(self.total);
            let papers = (start..end)
                .map(|i| RawPaper::new(SourceId::Arxiv, format!("Paper {i}"), vec![]))
                .collect();
            if end < self.total {
                Ok(Page::with_next(papers, PageCursor::at(end, None)))
            } else {
                Ok(Page::last(papers))
            }
        }
    }

    fn gateway() -> SourceGateway {
        SourceGateway::new(Arc::new(RateLimiter::disabled()), RetryPolicy::default())
    }

    async fn titles(search: &mut PaperSearch<'_>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(item) = search.next().await {
            out.push(item.unwrap().title);
        }
        out
    }

    #[tokio::test]
    async fn test_search_pages_until_exhausted_in_order() {
        let source = NumberedSource::new(10);
        let gateway = gateway();
        let mut search = search(&source, &gateway, SearchQuery::author("A"), 100);

        let got = titles(&mut search).await;
        assert_eq!(got.len(), 10);
        assert_eq!(got[0], "Paper 0");
        assert_eq!(got[9], "Paper 9");
        assert_eq!(search.stats().pages, 3);
    }

    #[tokio::test]
    async fn test_search_stops_at_limit_without_extra_pages() {
        let source = NumberedSource::new(100);
        let gateway = gateway();
        let mut search = search(&source, &gateway, SearchQuery::author("A"), 6);

        assert_eq!(titles(&mut search).await.len(), 6);
        assert_eq!(source.pages_served.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_search_zero_limit_fetches_nothing() {
        let source = NumberedSource::new(5);
        let gateway = gateway();
        let mut search = search(&source, &gateway, SearchQuery::author("A"), 0);

        assert!(search.next().await.is_none());
        assert_eq!(source.pages_served.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_error_terminates_sequence_after_partial_results() {
        let source = NumberedSource {
            fail_at_page: Some(1),
            ..NumberedSource::new(20)
        };
        let gateway = gateway();
        let mut search = search(&source, &gateway, SearchQuery::author("A"), 20);

        let mut ok = 0;
        let mut errors = 0;
        while let Some(item) = search.next().await {
            match item {
                Ok(_) => ok += 1,
                Err(_) => errors += 1,
            }
        }
        assert_eq!(ok, 4);
        assert_eq!(errors, 1);
        assert!(search.next().await.is_none());
    }

    #[tokio::test]
    async fn test_search_cancellation_takes_effect_at_page_boundary() {
        let source = NumberedSource::new(20);
        let gateway = gateway();
        let token = CancellationToken::new();
        let mut search =
            search(&source, &gateway, SearchQuery::author("A"), 20).with_cancellation(token.clone());

        let first = search.next().await.unwrap().unwrap();
        assert_eq!(first.title, "Paper 0");
        token.cancel();

        // Rest of the current page is still delivered.
        assert_eq!(titles(&mut search).await.len(), 3);
        assert!(search.stats().cancelled);
        assert_eq!(source.pages_served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_search_into_stream_yields_same_records() {
        let source = NumberedSource::new(7);
        let gateway = gateway();
        let stream = search(&source, &gateway, SearchQuery::author("A"), 7).into_stream();

        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected.len(), 7);
        assert!(collected.iter().all(Result::is_ok));
    }

    /// Serves pre-built pages in order.
    struct PagedSource {
        pages: std::sync::Mutex<VecDeque<Page>>,
    }

    impl PagedSource {
        fn new(pages: Vec<Page>) -> Self {
            Self {
                pages: std::sync::Mutex::new(pages.into()),
            }
        }
    }

    #[async_trait]
    impl LiteratureSource for PagedSource {
        fn id(&self) -> SourceId {
            SourceId::SemanticScholar
        }

        fn supports(&self, _kind: QueryKind) -> bool {
            true
        }

        fn max_page_size(&self) -> usize {
            2
        }

        async fn fetch_page(
            &self,
            _request: &PageRequest,
            _ctx: &mut FetchContext<'_>,
        ) -> Result<Page, SourceError> {
            Ok(self.pages.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn titled(title: &str) -> RawPaper {
        RawPaper::new(SourceId::SemanticScholar, title, vec![])
    }

    #[tokio::test]
    async fn test_search_continues_past_page_emptied_by_mapping() {
        let source = PagedSource::new(vec![
            Page::with_next(vec![], PageCursor::at(2, None)).with_skipped(2),
            Page::last(vec![titled("Kept")]),
        ]);
        let gateway = gateway();
        let mut search = search(&source, &gateway, SearchQuery::author("A"), 10);

        assert_eq!(titles(&mut search).await, vec!["Kept".to_string()]);
        assert_eq!(search.stats().pages, 2);
    }

    #[tokio::test]
    async fn test_search_ends_on_page_the_source_returned_empty() {
        let source = PagedSource::new(vec![
            Page::with_next(vec![], PageCursor::at(2, None)),
            Page::last(vec![titled("Unreached")]),
        ]);
        let gateway = gateway();
        let mut search = search(&source, &gateway, SearchQuery::author("A"), 10);

        assert!(titles(&mut search).await.is_empty());
        assert_eq!(search.stats().pages, 1);
    }
}
