//! Semantic Scholar adapter over the Graph API.
//!
//! Author queries resolve the best-matching author id first
//! (`/author/search`), then page through `/author/{id}/papers`. The resolved
//! id travels in the page cursor so later pages skip the lookup. Keyword
//! queries page through `/paper/search`.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{
    LiteratureSource, Page, PageCursor, PageRequest, QueryKind, RawPaper, SearchQuery, SourceError,
    SourceId,
};
use crate::fetch::{FetchContext, HttpTimeouts, build_source_http_client, standard_user_agent};

/// Default Graph API root.
pub const SEMANTIC_SCHOLAR_API_URL: &str = "https://api.semanticscholar.org/graph/v1";

/// `/paper/search` refuses limits above 100.
const S2_MAX_PAGE_SIZE: usize = 100;

/// Paper fields requested from every endpoint.
const PAPER_FIELDS: &str =
    "title,authors,abstract,year,publicationDate,citationCount,journal,venue,externalIds,fieldsOfStudy";

/// Semantic Scholar literature source.
#[derive(Debug, Clone)]
pub struct SemanticScholarSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarSource {
    /// Creates an adapter with the shared client policy.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(api_key: Option<String>, timeouts: HttpTimeouts) -> Result<Self, SourceError> {
        let user_agent = standard_user_agent(None);
        let client = build_source_http_client(SourceId::SemanticScholar, &user_agent, timeouts)?;
        Ok(Self::with_client(client).with_api_key(api_key))
    }

    /// Creates an adapter around an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: SEMANTIC_SCHOLAR_API_URL.to_string(),
            api_key: None,
        }
    }

    /// Points the adapter at a different API root (used by tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the partner API key sent as `x-api-key`.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|value| !value.trim().is_empty());
        self
    }

    fn url(&self, path: &str) -> Result<Url, SourceError> {
        Url::parse(&format!("{}{path}", self.base_url)).map_err(|error| {
            SourceError::client_build(SourceId::SemanticScholar, format!("invalid URL: {error}"))
        })
    }

    fn get(&self, url: &Url) -> reqwest::RequestBuilder {
        let builder = self.client.get(url.as_str());
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    async fn resolve_author_id(
        &self,
        name: &str,
        ctx: &mut FetchContext<'_>,
    ) -> Result<String, SourceError> {
        let mut url = self.url("/author/search")?;
        url.query_pairs_mut()
            .append_pair("query", name.trim())
            .append_pair("limit", "1")
            .append_pair("fields", "name");

        let found: AuthorSearchResponse = ctx.get_json(self.get(&url)).await?;
        let Some(author) = found.data.into_iter().next() else {
            debug!(author = name, "no Semantic Scholar author match");
            return Err(SourceError::unknown_query(SourceId::SemanticScholar, name));
        };
        debug!(author = name, author_id = %author.author_id, matched = ?author.name, "resolved author");
        Ok(author.author_id)
    }
}

#[derive(Debug, Deserialize)]
struct AuthorSearchResponse {
    #[serde(default)]
    data: Vec<AuthorMatch>,
}

#[derive(Debug, Deserialize)]
struct AuthorMatch {
    #[serde(rename = "authorId")]
    author_id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaperListResponse {
    #[serde(default)]
    next: Option<usize>,
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    authors: Vec<S2Author>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(default)]
    year: Option<u16>,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    citation_count: Option<u64>,
    #[serde(default)]
    journal: Option<S2Journal>,
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    external_ids: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    fields_of_study: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct S2Author {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2Journal {
    #[serde(default)]
    name: Option<String>,
}

impl S2Paper {
    fn external_id(&self, key: &str) -> Option<String> {
        let value = self.external_ids.as_ref()?.get(key)?;
        match value {
            serde_json::Value::String(text) => non_empty(text),
            serde_json::Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    fn into_raw(self) -> Option<RawPaper> {
        let title = non_empty(self.title.as_deref().unwrap_or_default())?;
        let arxiv_id = self.external_id("ArXiv");
        let pubmed_id = self.external_id("PubMed");
        let doi = self.external_id("DOI");
        let authors = self
            .authors
            .into_iter()
            .filter_map(|author| author.name.as_deref().and_then(non_empty))
            .collect();

        let mut raw = RawPaper::new(SourceId::SemanticScholar, title, authors);
        raw.arxiv_id = arxiv_id;
        raw.pubmed_id = pubmed_id;
        raw.doi = doi;
        raw.published = self
            .publication_date
            .as_deref()
            .and_then(non_empty)
            .or_else(|| self.year.map(|year| year.to_string()));
        raw.abstract_text = self.abstract_text.as_deref().and_then(non_empty);
        raw.journal = self
            .journal
            .and_then(|journal| journal.name)
            .as_deref()
            .and_then(non_empty)
            .or_else(|| self.venue.as_deref().and_then(non_empty));
        raw.citation_count = self.citation_count;
        raw.keywords = self.fields_of_study.unwrap_or_default();
        Some(raw)
    }
}

#[async_trait]
impl LiteratureSource for SemanticScholarSource {
    fn id(&self) -> SourceId {
        SourceId::SemanticScholar
    }

    fn supports(&self, _kind: QueryKind) -> bool {
        true
    }

    fn max_page_size(&self) -> usize {
        S2_MAX_PAGE_SIZE
    }

    #[instrument(skip(self, ctx), fields(query = %request.query.label(), offset = request.cursor.offset))]
    async fn fetch_page(
        &self,
        request: &PageRequest,
        ctx: &mut FetchContext<'_>,
    ) -> Result<Page, SourceError> {
        let (mut url, token) = match &request.query {
            SearchQuery::Author(name) => {
                let author_id = match &request.cursor.token {
                    Some(id) => id.clone(),
                    None => self.resolve_author_id(name, ctx).await?,
                };
                (self.url(&format!("/author/{author_id}/papers"))?, Some(author_id))
            }
            SearchQuery::Keywords(keywords) => {
                let mut url = self.url("/paper/search")?;
                url.query_pairs_mut().append_pair("query", &keywords.join(" "));
                (url, None)
            }
        };
        url.query_pairs_mut()
            .append_pair("fields", PAPER_FIELDS)
            .append_pair("offset", &request.cursor.offset.to_string())
            .append_pair("limit", &request.page_size.to_string());

        let response: PaperListResponse = ctx.get_json(self.get(&url)).await?;
        let fetched = response.data.len();
        let papers: Vec<RawPaper> = response
            .data
            .into_iter()
            .filter_map(S2Paper::into_raw)
            .collect();

        debug!(fetched, kept = papers.len(), next = ?response.next, "Semantic Scholar page");

        let skipped = fetched - papers.len();
        let page = match response.next {
            Some(next) if fetched > 0 && next > request.cursor.offset => {
                Page::with_next(papers, PageCursor::at(next, token))
            }
            _ => Page::last(papers),
        };
        Ok(page.with_skipped(skipped))
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_s2_paper_maps_external_ids_and_citations() {
        let json = r#"{
            "paperId": "abc",
            "title": "Gene Circuits",
            "authors": [{"authorId": "1", "name": "Alice Smith"}, {"authorId": null, "name": "Bob Lee"}],
            "abstract": null,
            "year": 2021,
            "publicationDate": null,
            "citationCount": 120,
            "journal": {"name": "Nature", "volume": "1"},
            "venue": "Nature",
            "externalIds": {"DOI": "10.1000/XYZ", "ArXiv": "2101.00001", "CorpusId": 1234},
            "fieldsOfStudy": ["Biology"]
        }"#;
        let paper: S2Paper = serde_json::from_str(json).unwrap();
        let raw = paper.into_raw().unwrap();

        assert_eq!(raw.title, "Gene Circuits");
        assert_eq!(raw.authors, vec!["Alice Smith", "Bob Lee"]);
        assert_eq!(raw.doi.as_deref(), Some("10.1000/XYZ"));
        assert_eq!(raw.arxiv_id.as_deref(), Some("2101.00001"));
        assert_eq!(raw.pubmed_id, None);
        assert_eq!(raw.citation_count, Some(120));
        assert_eq!(raw.journal.as_deref(), Some("Nature"));
        assert_eq!(raw.published.as_deref(), Some("2021"));
        assert_eq!(raw.keywords, vec!["Biology"]);
        assert!(raw.abstract_text.is_none());
    }

    #[test]
    fn test_s2_paper_without_title_is_dropped() {
        let paper: S2Paper = serde_json::from_str(r#"{"title": "  ", "authors": []}"#).unwrap();
        assert!(paper.into_raw().is_none());
    }

    #[test]
    fn test_s2_paper_falls_back_to_venue() {
        let paper: S2Paper =
            serde_json::from_str(r#"{"title": "T", "journal": null, "venue": "ICML"}"#).unwrap();
        assert_eq!(paper.into_raw().unwrap().journal.as_deref(), Some("ICML"));
    }
}
