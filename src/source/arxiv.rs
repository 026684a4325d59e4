//! arXiv adapter over the Atom query API.
//!
//! Author queries use the `au:` field prefix with the quoted display name;
//! keyword queries AND together quoted `all:` phrases. Results are sorted by
//! submission date, newest first, and paged with `start`/`max_results`.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use super::{
    LiteratureSource, Page, PageCursor, PageRequest, QueryKind, RawPaper, SearchQuery, SourceError,
    SourceId,
};
use crate::fetch::{FetchContext, HttpTimeouts, build_source_http_client, standard_user_agent};

/// Default arXiv query endpoint.
pub const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";

/// Largest `max_results` the API serves comfortably in one response.
const ARXIV_MAX_PAGE_SIZE: usize = 100;

/// arXiv literature source.
#[derive(Debug, Clone)]
pub struct ArxivSource {
    client: Client,
    base_url: String,
}

impl ArxivSource {
    /// Creates an adapter with the shared client policy.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(timeouts: HttpTimeouts) -> Result<Self, SourceError> {
        let client =
            build_source_http_client(SourceId::Arxiv, &standard_user_agent(None), timeouts)?;
        Ok(Self::with_client(client))
    }

    /// Creates an adapter around an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: ARXIV_API_URL.to_string(),
        }
    }

    /// Points the adapter at a different endpoint (used by tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn page_url(&self, request: &PageRequest) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.base_url).map_err(|error| {
            SourceError::client_build(SourceId::Arxiv, format!("invalid base URL: {error}"))
        })?;
        url.query_pairs_mut()
            .append_pair("search_query", &build_search_query(&request.query))
            .append_pair("start", &request.cursor.offset.to_string())
            .append_pair("max_results", &request.page_size.to_string())
            .append_pair("sortBy", "submittedDate")
            .append_pair("sortOrder", "descending");
        Ok(url)
    }
}

/// Builds the `search_query` expression for a query.
fn build_search_query(query: &SearchQuery) -> String {
    match query {
        SearchQuery::Author(name) => format!("au:\"{}\"", name.trim()),
        SearchQuery::Keywords(keywords) => keywords
            .iter()
            .map(|keyword| keyword.trim())
            .filter(|keyword| !keyword.is_empty())
            .map(|keyword| format!("all:\"{keyword}\""))
            .collect::<Vec<_>>()
            .join(" AND "),
    }
}

#[async_trait]
impl LiteratureSource for ArxivSource {
    fn id(&self) -> SourceId {
        SourceId::Arxiv
    }

    fn supports(&self, _kind: QueryKind) -> bool {
        true
    }

    fn max_page_size(&self) -> usize {
        ARXIV_MAX_PAGE_SIZE
    }

    #[instrument(skip(self, ctx), fields(query = %request.query.label(), offset = request.cursor.offset))]
    async fn fetch_page(
        &self,
        request: &PageRequest,
        ctx: &mut FetchContext<'_>,
    ) -> Result<Page, SourceError> {
        let url = self.page_url(request)?;
        let feed = ctx
            .get_parsed(self.client.get(url.as_str()), parse_atom_feed)
            .await?;

        if let Some(reason) = feed.api_error {
            return Err(SourceError::rejected(
                SourceId::Arxiv,
                request.query.label(),
                reason,
            ));
        }

        let fetched = feed.entries.len() + feed.skipped;
        let consumed = request.cursor.offset + fetched;
        let more = fetched >= request.page_size
            && feed.total_results.is_none_or(|total| consumed < total);

        debug!(fetched, total = ?feed.total_results, more, "parsed arXiv feed");

        let page = if more {
            Page::with_next(feed.entries, PageCursor::at(consumed, None))
        } else {
            Page::last(feed.entries)
        };
        Ok(page.with_skipped(feed.skipped))
    }
}

/// Parsed Atom response.
#[derive(Debug, Default)]
struct AtomFeed {
    total_results: Option<usize>,
    entries: Vec<RawPaper>,
    /// Entries without a usable title.
    skipped: usize,
    api_error: Option<String>,
}

/// Fields accumulated for the `<entry>` being read.
#[derive(Debug, Default)]
struct EntryAccum {
    id_url: String,
    title: String,
    summary: String,
    published: String,
    doi: String,
    journal_ref: String,
    authors: Vec<String>,
    affiliations: Vec<String>,
    categories: Vec<String>,
}

impl EntryAccum {
    fn into_raw(self) -> Option<RawPaper> {
        let title = collapse_whitespace(&self.title);
        if title.is_empty() {
            return None;
        }
        let mut raw = RawPaper::new(SourceId::Arxiv, title, self.authors);
        raw.arxiv_id = arxiv_id_from_url(&self.id_url);
        raw.published = non_empty(&self.published);
        raw.abstract_text = non_empty(&collapse_whitespace(&self.summary));
        raw.doi = non_empty(&self.doi);
        raw.journal = non_empty(&collapse_whitespace(&self.journal_ref));
        raw.keywords = self.categories;
        raw.affiliations = self.affiliations;
        Some(raw)
    }
}

/// Atom state machine keyed on element local names, so namespace prefixes
/// (`arxiv:`, `opensearch:`) do not matter.
#[derive(Debug, Default)]
struct AtomParser {
    feed: AtomFeed,
    entry: Option<EntryAccum>,
    in_author: bool,
    text: String,
    closed: bool,
}

impl AtomParser {
    fn handle_start(&mut self, e: &BytesStart<'_>) {
        let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
        match tag.as_str() {
            "entry" => self.entry = Some(EntryAccum::default()),
            "author" if self.entry.is_some() => self.in_author = true,
            "category" => self.handle_category(e),
            _ => {}
        }
        self.text.clear();
    }

    fn handle_category(&mut self, e: &BytesStart<'_>) {
        let Some(entry) = self.entry.as_mut() else {
            return;
        };
        for attr in e.attributes().flatten() {
            if attr.key.local_name().as_ref() == b"term"
                && let Ok(value) = attr.unescape_value()
                && !value.trim().is_empty()
            {
                entry.categories.push(value.trim().to_string());
            }
        }
    }

    fn handle_end(&mut self, local_name: &[u8]) -> Result<(), String> {
        let tag = String::from_utf8_lossy(local_name);
        let text = std::mem::take(&mut self.text);

        if tag == "entry" {
            if let Some(entry) = self.entry.take() {
                if entry.id_url.contains("/api/errors") {
                    self.feed.api_error = Some(collapse_whitespace(&entry.summary));
                } else if let Some(raw) = entry.into_raw() {
                    self.feed.entries.push(raw);
                } else {
                    self.feed.skipped += 1;
                }
            }
            return Ok(());
        }

        match (tag.as_ref(), self.entry.as_mut()) {
            ("author", Some(_)) => self.in_author = false,
            ("name", Some(entry)) if self.in_author => {
                let name = collapse_whitespace(&text);
                if !name.is_empty() {
                    entry.authors.push(name);
                }
            }
            ("affiliation", Some(entry)) if self.in_author => {
                let affiliation = collapse_whitespace(&text);
                if !affiliation.is_empty() && !entry.affiliations.contains(&affiliation) {
                    entry.affiliations.push(affiliation);
                }
            }
            ("id", Some(entry)) => entry.id_url = text.trim().to_string(),
            ("title", Some(entry)) => entry.title = text,
            ("summary", Some(entry)) => entry.summary = text,
            ("published", Some(entry)) => entry.published = text.trim().to_string(),
            ("doi", Some(entry)) => entry.doi = text.trim().to_string(),
            ("journal_ref", Some(entry)) => entry.journal_ref = text,
            ("totalResults", None) => {
                let total = text
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("invalid totalResults '{}'", text.trim()))?;
                self.feed.total_results = Some(total);
            }
            ("feed", None) => self.closed = true,
            _ => {}
        }
        Ok(())
    }
}

/// Parses an arXiv Atom response body.
fn parse_atom_feed(body: &str) -> Result<AtomFeed, String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut parser = AtomParser::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => parser.handle_start(e),
            Ok(Event::Empty(ref e)) => {
                if e.local_name().as_ref() == b"category" {
                    parser.handle_category(e);
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|error| error.to_string())?;
                parser.text.push_str(&text);
            }
            Ok(Event::CData(ref e)) => {
                parser.text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::End(ref e)) => parser.handle_end(e.local_name().as_ref())?,
            Ok(Event::Eof) => break,
            Err(error) => {
                return Err(format!(
                    "XML error at position {}: {error}",
                    reader.error_position()
                ));
            }
            _ => {}
        }
    }

    if !parser.closed {
        return Err("feed ended before </feed>".to_string());
    }
    Ok(parser.feed)
}

/// Extracts the identifier from an entry id such as `http://arxiv.org/abs/2301.00001v2`.
fn arxiv_id_from_url(id_url: &str) -> Option<String> {
    let id = id_url
        .split_once("/abs/")
        .map_or(id_url, |(_, rest)| rest)
        .trim()
        .trim_end_matches('/');
    non_empty(id)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title>ArXiv Query</title>
  <id>http://arxiv.org/api/abc</id>
  <opensearch:totalResults>2</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/abs/2301.00001v2</id>
    <published>2023-01-02T10:00:00Z</published>
    <title>Gene Circuits
      in Bacteria</title>
    <summary>  We build &amp; test circuits. </summary>
    <author><name>Alice Smith</name><arxiv:affiliation>MIT</arxiv:affiliation></author>
    <author><name>Bob Lee</name></author>
    <arxiv:doi>10.1000/xyz</arxiv:doi>
    <arxiv:journal_ref>Nature 1 (2023)</arxiv:journal_ref>
    <category term="q-bio.MN" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/hep-th/9901001v1</id>
    <published>1999-01-01T00:00:00Z</published>
    <title>Strings</title>
    <summary>Old one.</summary>
    <author><name>Carol Wu</name></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_atom_feed_maps_entry_fields() {
        let feed = parse_atom_feed(FEED).unwrap();
        assert_eq!(feed.total_results, Some(2));
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(first.title, "Gene Circuits in Bacteria");
        assert_eq!(first.authors, vec!["Alice Smith", "Bob Lee"]);
        assert_eq!(first.arxiv_id.as_deref(), Some("2301.00001v2"));
        assert_eq!(first.doi.as_deref(), Some("10.1000/xyz"));
        assert_eq!(first.journal.as_deref(), Some("Nature 1 (2023)"));
        assert_eq!(first.abstract_text.as_deref(), Some("We build & test circuits."));
        assert_eq!(first.published.as_deref(), Some("2023-01-02T10:00:00Z"));
        assert_eq!(first.keywords, vec!["q-bio.MN", "cs.LG"]);
        assert_eq!(first.affiliations, vec!["MIT"]);

        assert_eq!(feed.entries[1].arxiv_id.as_deref(), Some("hep-th/9901001v1"));
    }

    #[test]
    fn test_parse_atom_feed_counts_untitled_entries_as_skipped() {
        let body = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2301.00009v1</id>
    <title>   </title>
    <author><name>Dana Fox</name></author>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2301.00010v1</id>
    <title>Kept</title>
  </entry>
</feed>"#;
        let feed = parse_atom_feed(body).unwrap();
        assert_eq!(feed.entries.len(), 1);
        assert_eq!(feed.skipped, 1);
    }

    #[test]
    fn test_parse_atom_feed_rejects_truncated_body() {
        let truncated = &FEED[..FEED.len() / 2];
        assert!(parse_atom_feed(truncated).is_err());
    }

    #[test]
    fn test_parse_atom_feed_surfaces_api_error_entry() {
        let body = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format</id>
    <title>Error</title>
    <summary>incorrect id format</summary>
  </entry>
</feed>"#;
        let feed = parse_atom_feed(body).unwrap();
        assert!(feed.entries.is_empty());
        assert_eq!(feed.api_error.as_deref(), Some("incorrect id format"));
    }

    #[test]
    fn test_build_search_query_author_and_keywords() {
        assert_eq!(
            build_search_query(&SearchQuery::author(" Alice Smith ")),
            "au:\"Alice Smith\""
        );
        assert_eq!(
            build_search_query(&SearchQuery::keywords(["synthetic biology", "", "crispr"])),
            "all:\"synthetic biology\" AND all:\"crispr\""
        );
    }

    #[test]
    fn test_page_url_carries_paging_and_sort() {
        let source = ArxivSource::with_client(Client::new()).with_base_url("http://localhost/api/query");
        let request = PageRequest {
            query: SearchQuery::author("Alice Smith"),
            cursor: PageCursor::at(50, None),
            page_size: 25,
        };
        let url = source.page_url(&request).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("start".to_string(), "50".to_string())));
        assert!(pairs.contains(&("max_results".to_string(), "25".to_string())));
        assert!(pairs.contains(&("sortBy".to_string(), "submittedDate".to_string())));
        assert!(pairs.contains(&("search_query".to_string(), "au:\"Alice Smith\"".to_string())));
    }
}
