//! Literature source adapters behind a single capability interface.
//!
//! Each external API (arXiv, `PubMed`, Semantic Scholar) implements
//! [`LiteratureSource`], which fetches one page of raw records at a time.
//! Pagination cursors stay inside adapters: callers consume a
//! [`PaperSearch`], a lazy, finite sequence of [`RawPaper`] that pulls the next
//! page only when the current one is drained.
//!
//! # Architecture
//!
//! - [`LiteratureSource`] - Async trait that individual adapters implement
//! - [`SourceRegistry`] - Registration-ordered collection of adapters
//! - [`PaperSearch`] - Lazy paginated sequence with limit and cancellation
//! - [`ArxivSource`] - Atom query API
//! - [`PubMedSource`] - E-utilities `esearch` + `efetch`
//! - [`SemanticScholarSource`] - Graph API author/paper search
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use papernet_core::fetch::{HttpTimeouts, RateLimiter, RetryPolicy, SourceGateway};
//! use papernet_core::source::{ArxivSource, SearchQuery, search};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = SourceGateway::new(Arc::new(RateLimiter::with_defaults()), RetryPolicy::default());
//! let arxiv = ArxivSource::new(HttpTimeouts::default())?;
//! let mut papers = search(&arxiv, &gateway, SearchQuery::author("Alice Smith"), 25);
//! while let Some(item) = papers.next().await {
//!     println!("{}", item?.title);
//! }
//! # Ok(())
//! # }
//! ```

mod arxiv;
mod error;
mod pubmed;
mod registry;
mod search;
mod semantic_scholar;

pub use arxiv::ArxivSource;
pub use error::SourceError;
pub use pubmed::PubMedSource;
pub use registry::{SourceRegistry, build_default_sources};
pub use search::{PaperSearch, SearchStats, search};
pub use semantic_scholar::SemanticScholarSource;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fetch::FetchContext;

/// Identifies one external literature API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// arXiv preprint server.
    Arxiv,
    /// NCBI `PubMed`.
    PubMed,
    /// Semantic Scholar Graph API.
    SemanticScholar,
}

impl SourceId {
    /// All known sources in default registration order.
    pub const ALL: [SourceId; 3] = [Self::Arxiv, Self::PubMed, Self::SemanticScholar];

    /// Returns the stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arxiv => "arxiv",
            Self::PubMed => "pubmed",
            Self::SemanticScholar => "semantic_scholar",
        }
    }

    /// Ranks how much a source's citation counts are trusted.
    ///
    /// Semantic Scholar maintains a citation graph; the others report counts
    /// only incidentally, if at all.
    #[must_use]
    pub fn citation_authority(self) -> u8 {
        match self {
            Self::SemanticScholar => 2,
            Self::Arxiv | Self::PubMed => 1,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arxiv" => Ok(Self::Arxiv),
            "pubmed" => Ok(Self::PubMed),
            "semantic_scholar" | "semanticscholar" | "s2" => Ok(Self::SemanticScholar),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// What a query string denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Papers written by a named author.
    Author,
    /// Papers matching research keywords.
    Keyword,
}

/// A query against a literature source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Author display name as the caller knows it.
    Author(String),
    /// Keywords that must all match.
    Keywords(Vec<String>),
}

impl SearchQuery {
    /// Creates an author query.
    #[must_use]
    pub fn author(name: impl Into<String>) -> Self {
        Self::Author(name.into())
    }

    /// Creates a keyword query.
    #[must_use]
    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Keywords(keywords.into_iter().map(Into::into).collect())
    }

    /// Returns the kind of query.
    #[must_use]
    pub fn kind(&self) -> QueryKind {
        match self {
            Self::Author(_) => QueryKind::Author,
            Self::Keywords(_) => QueryKind::Keyword,
        }
    }

    /// Human-readable label used in logs and failure notes.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Author(name) => name.clone(),
            Self::Keywords(keywords) => keywords.join(", "),
        }
    }
}

/// One record as returned by a source, mapped into a superset shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPaper {
    /// Adapter that produced the record.
    pub source: SourceId,
    /// Title as delivered (may contain line breaks or markup remnants).
    pub title: String,
    /// Author display names in byline order.
    pub authors: Vec<String>,
    /// Publication date string in whatever form the source uses.
    pub published: Option<String>,
    /// arXiv identifier (with or without version suffix).
    pub arxiv_id: Option<String>,
    /// `PubMed` identifier.
    pub pubmed_id: Option<String>,
    /// Digital Object Identifier.
    pub doi: Option<String>,
    /// Abstract text.
    pub abstract_text: Option<String>,
    /// Journal or venue name.
    pub journal: Option<String>,
    /// Citation count at time of retrieval.
    pub citation_count: Option<u64>,
    /// Categories, MeSH terms, fields of study or author keywords.
    pub keywords: Vec<String>,
    /// Institution affiliations listed on the record.
    pub affiliations: Vec<String>,
}

impl RawPaper {
    /// Creates a record with the mandatory fields; everything else starts empty.
    #[must_use]
    pub fn new(source: SourceId, title: impl Into<String>, authors: Vec<String>) -> Self {
        Self {
            source,
            title: title.into(),
            authors,
            published: None,
            arxiv_id: None,
            pubmed_id: None,
            doi: None,
            abstract_text: None,
            journal: None,
            citation_count: None,
            keywords: Vec::new(),
            affiliations: Vec::new(),
        }
    }
}

/// Adapter-private pagination position.
///
/// `offset` counts records already consumed; `token` carries whatever else
/// the adapter needs to continue (e.g. a resolved author id).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// Number of records before this page.
    pub offset: usize,
    /// Adapter-specific continuation state.
    pub token: Option<String>,
}

impl PageCursor {
    /// Cursor for the first page.
    #[must_use]
    pub fn start() -> Self {
        Self::default()
    }

    /// Cursor at an offset, keeping any continuation token.
    #[must_use]
    pub fn at(offset: usize, token: Option<String>) -> Self {
        Self { offset, token }
    }
}

/// Parameters for fetching one page.
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// The query being paged through.
    pub query: SearchQuery,
    /// Where this page starts.
    pub cursor: PageCursor,
    /// Maximum records wanted on this page.
    pub page_size: usize,
}

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Records on this page, in source order.
    pub papers: Vec<RawPaper>,
    /// Cursor for the following page, `None` when the source is exhausted.
    pub next: Option<PageCursor>,
    /// Records the source returned that the adapter could not map (no title).
    pub skipped: usize,
}

impl Page {
    /// A final page.
    #[must_use]
    pub fn last(papers: Vec<RawPaper>) -> Self {
        Self {
            papers,
            next: None,
            skipped: 0,
        }
    }

    /// A page followed by more results.
    #[must_use]
    pub fn with_next(papers: Vec<RawPaper>, next: PageCursor) -> Self {
        Self {
            papers,
            next: Some(next),
            skipped: 0,
        }
    }

    /// Records how many returned records were dropped while mapping.
    #[must_use]
    pub fn with_skipped(mut self, skipped: usize) -> Self {
        self.skipped = skipped;
        self
    }

    /// True when the source itself returned nothing.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.papers.is_empty() && self.skipped == 0
    }
}

/// Trait that all literature sources implement.
///
/// Adapters perform every network round-trip through the supplied
/// [`FetchContext`], which gates the call on the source's rate limiter and
/// applies the bounded retry policy.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Arc<dyn LiteratureSource>` in the [`SourceRegistry`].
#[async_trait]
pub trait LiteratureSource: Send + Sync {
    /// Returns which API this adapter talks to.
    fn id(&self) -> SourceId;

    /// Returns true if this adapter can answer queries of the given kind.
    fn supports(&self, kind: QueryKind) -> bool;

    /// Largest page the API will return in one call.
    fn max_page_size(&self) -> usize;

    /// Fetches one page of results.
    async fn fetch_page(
        &self,
        request: &PageRequest,
        ctx: &mut FetchContext<'_>,
    ) -> Result<Page, SourceError>;
}
