//! `PubMed` adapter over the NCBI E-utilities.
//!
//! Each page costs two round-trips: `esearch` (JSON) pages through matching
//! PMIDs, then `efetch` (XML) retrieves the records for those PMIDs. Both
//! calls pass through the rate limiter independently.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{
    LiteratureSource, Page, PageCursor, PageRequest, QueryKind, RawPaper, SearchQuery, SourceError,
    SourceId,
};
use crate::fetch::{FetchContext, HttpTimeouts, build_source_http_client, standard_user_agent};

/// Default E-utilities base URL.
pub const PUBMED_EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// `efetch` accepts a few hundred ids per GET comfortably.
const PUBMED_MAX_PAGE_SIZE: usize = 200;

/// Tool name reported to NCBI alongside the contact email.
const NCBI_TOOL_NAME: &str = "papernet";

/// Inline markup NCBI allows inside titles and abstracts.
const INLINE_MARKUP: [&str; 6] = ["i", "b", "u", "sup", "sub", "mml:math"];

/// `PubMed` literature source.
#[derive(Debug, Clone)]
pub struct PubMedSource {
    client: Client,
    base_url: String,
    email: Option<String>,
    api_key: Option<String>,
}

impl PubMedSource {
    /// Creates an adapter with the shared client policy.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(
        email: Option<String>,
        api_key: Option<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, SourceError> {
        let user_agent = standard_user_agent(email.as_deref());
        let client = build_source_http_client(SourceId::PubMed, &user_agent, timeouts)?;
        Ok(Self::with_client(client)
            .with_email(email)
            .with_api_key(api_key))
    }

    /// Creates an adapter around an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: PUBMED_EUTILS_URL.to_string(),
            email: None,
            api_key: None,
        }
    }

    /// Points the adapter at a different E-utilities root (used by tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the contact email NCBI asks clients to send.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email.filter(|value| !value.trim().is_empty());
        self
    }

    /// Sets the NCBI API key (raises the allowed rate to 10 calls/s).
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|value| !value.trim().is_empty());
        self
    }

    fn endpoint(&self, name: &str) -> Result<Url, SourceError> {
        let mut url = Url::parse(&format!("{}/{name}", self.base_url)).map_err(|error| {
            SourceError::client_build(SourceId::PubMed, format!("invalid base URL: {error}"))
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("db", "pubmed");
            pairs.append_pair("tool", NCBI_TOOL_NAME);
            if let Some(email) = &self.email {
                pairs.append_pair("email", email);
            }
            if let Some(api_key) = &self.api_key {
                pairs.append_pair("api_key", api_key);
            }
        }
        Ok(url)
    }

    fn esearch_url(&self, request: &PageRequest) -> Result<Url, SourceError> {
        let mut url = self.endpoint("esearch.fcgi")?;
        url.query_pairs_mut()
            .append_pair("term", &build_term(&request.query))
            .append_pair("retmode", "json")
            .append_pair("retstart", &request.cursor.offset.to_string())
            .append_pair("retmax", &request.page_size.to_string())
            .append_pair("sort", "pub_date");
        Ok(url)
    }

    fn efetch_url(&self, ids: &[String]) -> Result<Url, SourceError> {
        let mut url = self.endpoint("efetch.fcgi")?;
        url.query_pairs_mut()
            .append_pair("id", &ids.join(","))
            .append_pair("retmode", "xml");
        Ok(url)
    }
}

/// Builds the `esearch` term for a query.
fn build_term(query: &SearchQuery) -> String {
    match query {
        SearchQuery::Author(name) => format!("\"{}\"[Author]", name.trim()),
        SearchQuery::Keywords(keywords) => keywords
            .iter()
            .map(|keyword| keyword.trim())
            .filter(|keyword| !keyword.is_empty())
            .map(|keyword| format!("\"{keyword}\""))
            .collect::<Vec<_>>()
            .join(" AND "),
    }
}

#[derive(Debug, Deserialize)]
struct EsearchEnvelope {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

#[async_trait]
impl LiteratureSource for PubMedSource {
    fn id(&self) -> SourceId {
        SourceId::PubMed
    }

    fn supports(&self, _kind: QueryKind) -> bool {
        true
    }

    fn max_page_size(&self) -> usize {
        PUBMED_MAX_PAGE_SIZE
    }

    #[instrument(skip(self, ctx), fields(query = %request.query.label(), offset = request.cursor.offset))]
    async fn fetch_page(
        &self,
        request: &PageRequest,
        ctx: &mut FetchContext<'_>,
    ) -> Result<Page, SourceError> {
        let url = self.esearch_url(request)?;
        let envelope: EsearchEnvelope = ctx.get_json(self.client.get(url.as_str())).await?;
        let result = envelope.esearchresult;

        if let Some(reason) = result.error {
            return Err(SourceError::rejected(
                SourceId::PubMed,
                request.query.label(),
                reason,
            ));
        }

        let total = result
            .count
            .as_deref()
            .and_then(|count| count.trim().parse::<usize>().ok());
        let ids = result.idlist;
        debug!(ids = ids.len(), total = ?total, "esearch page");

        if ids.is_empty() {
            return Ok(Page::last(Vec::new()));
        }

        let url = self.efetch_url(&ids)?;
        let papers = ctx
            .get_parsed(self.client.get(url.as_str()), parse_efetch_xml)
            .await?;

        let skipped = ids.len().saturating_sub(papers.len());
        let consumed = request.cursor.offset + ids.len();
        let more = ids.len() >= request.page_size && total.is_none_or(|total| consumed < total);
        let page = if more {
            Page::with_next(papers, PageCursor::at(consumed, None))
        } else {
            Page::last(papers)
        };
        Ok(page.with_skipped(skipped))
    }
}

#[derive(Debug, Default)]
struct AuthorAccum {
    last_name: String,
    fore_name: String,
    collective: String,
}

impl AuthorAccum {
    fn display_name(&self) -> Option<String> {
        let last = self.last_name.trim();
        let fore = self.fore_name.trim();
        match (fore.is_empty(), last.is_empty()) {
            (false, false) => Some(format!("{fore} {last}")),
            (true, false) => Some(last.to_string()),
            _ => {
                let collective = self.collective.trim();
                (!collective.is_empty()).then(|| collective.to_string())
            }
        }
    }
}

#[derive(Debug, Default)]
struct ArticleAccum {
    pmid: String,
    title: String,
    abstract_parts: Vec<String>,
    authors: Vec<String>,
    author: AuthorAccum,
    affiliations: Vec<String>,
    journal: String,
    year: String,
    month: String,
    day: String,
    medline_date: String,
    doi: String,
    elocation_doi: String,
    keywords: Vec<String>,
}

impl ArticleAccum {
    fn published(&self) -> Option<String> {
        let year = self.year.trim();
        if year.is_empty() {
            let medline = self.medline_date.trim();
            return (!medline.is_empty()).then(|| medline.to_string());
        }
        let parts: Vec<&str> = [year, self.month.trim(), self.day.trim()]
            .into_iter()
            .take_while(|part| !part.is_empty())
            .collect();
        Some(parts.join(" "))
    }

    fn into_raw(self) -> Option<RawPaper> {
        let title = collapse_whitespace(&self.title);
        if title.is_empty() {
            return None;
        }
        let published = self.published();
        let mut raw = RawPaper::new(SourceId::PubMed, title, self.authors);
        raw.pubmed_id = non_empty(&self.pmid);
        raw.published = published;
        raw.abstract_text = non_empty(&collapse_whitespace(&self.abstract_parts.join(" ")));
        raw.journal = non_empty(&collapse_whitespace(&self.journal));
        raw.doi = non_empty(&self.doi).or_else(|| non_empty(&self.elocation_doi));
        raw.keywords = self.keywords;
        raw.affiliations = self.affiliations;
        Some(raw)
    }
}

/// `efetch` state machine driven by the element path.
#[derive(Debug, Default)]
struct EfetchParser {
    papers: Vec<RawPaper>,
    article: Option<ArticleAccum>,
    path: Vec<String>,
    text: String,
    id_type: Option<String>,
    closed: bool,
}

impl EfetchParser {
    fn parent(&self) -> &str {
        self.path.last().map_or("", String::as_str)
    }

    fn grandparent(&self) -> &str {
        self.path
            .len()
            .checked_sub(2)
            .and_then(|index| self.path.get(index))
            .map_or("", String::as_str)
    }

    fn handle_start(&mut self, e: &BytesStart<'_>) {
        let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
        if INLINE_MARKUP.contains(&tag.as_str()) {
            return;
        }
        match tag.as_str() {
            "PubmedArticle" => self.article = Some(ArticleAccum::default()),
            "Author" => {
                if let Some(article) = self.article.as_mut() {
                    article.author = AuthorAccum::default();
                }
            }
            "ArticleId" | "ELocationID" => {
                self.id_type = e.attributes().flatten().find_map(|attr| {
                    let key = attr.key.local_name();
                    (key.as_ref() == b"IdType" || key.as_ref() == b"EIdType")
                        .then(|| attr.unescape_value().ok().map(|value| value.to_string()))
                        .flatten()
                });
            }
            _ => {}
        }
        self.path.push(tag);
        self.text.clear();
    }

    fn handle_end(&mut self, name: &[u8]) {
        let tag = String::from_utf8_lossy(name).to_string();
        if INLINE_MARKUP.contains(&tag.as_str()) {
            return;
        }
        self.path.pop();
        let text = std::mem::take(&mut self.text);

        if tag == "PubmedArticleSet" {
            self.closed = true;
            return;
        }
        if tag == "PubmedArticle" {
            if let Some(raw) = self.article.take().and_then(ArticleAccum::into_raw) {
                self.papers.push(raw);
            }
            return;
        }

        let parent = self.parent().to_string();
        let grandparent = self.grandparent().to_string();
        let id_type = self.id_type.take();
        let Some(article) = self.article.as_mut() else {
            return;
        };

        match (tag.as_str(), parent.as_str()) {
            ("PMID", "MedlineCitation") => article.pmid = text.trim().to_string(),
            ("ArticleTitle", _) => article.title = text,
            ("AbstractText", _) => article.abstract_parts.push(text),
            ("LastName", "Author") => article.author.last_name = text,
            ("ForeName", "Author") => article.author.fore_name = text,
            ("CollectiveName", "Author") => article.author.collective = text,
            ("Author", "AuthorList") => {
                if let Some(name) = article.author.display_name() {
                    article.authors.push(collapse_whitespace(&name));
                }
            }
            ("Affiliation", "AffiliationInfo") => {
                let affiliation = collapse_whitespace(&text);
                if !affiliation.is_empty() && !article.affiliations.contains(&affiliation) {
                    article.affiliations.push(affiliation);
                }
            }
            ("Title", "Journal") => article.journal = text,
            ("Year", "PubDate") => article.year = text,
            ("Month", "PubDate") => article.month = text,
            ("Day", "PubDate") => article.day = text,
            ("MedlineDate", "PubDate") => article.medline_date = text,
            ("DescriptorName", "MeshHeading") | ("Keyword", "KeywordList") => {
                let keyword = collapse_whitespace(&text);
                if !keyword.is_empty() && !article.keywords.contains(&keyword) {
                    article.keywords.push(keyword);
                }
            }
            ("ArticleId", "ArticleIdList")
                if grandparent == "PubmedData" && id_type.as_deref() == Some("doi") =>
            {
                article.doi = text.trim().to_string();
            }
            ("ELocationID", "Article") if id_type.as_deref() == Some("doi") => {
                article.elocation_doi = text.trim().to_string();
            }
            _ => {}
        }
    }
}

/// Parses an `efetch` `PubmedArticleSet` document.
fn parse_efetch_xml(body: &str) -> Result<Vec<RawPaper>, String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(false);
    let mut parser = EfetchParser::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => parser.handle_start(e),
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|error| error.to_string())?;
                parser.text.push_str(&text);
            }
            Ok(Event::End(ref e)) => parser.handle_end(e.name().as_ref()),
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
        return Err("document ended before </PubmedArticleSet>".to_string());
    }
    Ok(parser.papers)
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

    const EFETCH: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE PubmedArticleSet PUBLIC "-//NLM//DTD PubMedArticle, 1st January 2024//EN" "https://dtd.nlm.nih.gov/ncbi/pubmed/out/pubmed_240101.dtd">
<PubmedArticleSet>
<PubmedArticle>
  <MedlineCitation Status="MEDLINE" Owner="NLM">
    <PMID Version="1">31000001</PMID>
    <Article PubModel="Print">
      <Journal>
        <JournalIssue CitedMedium="Internet">
          <PubDate><Year>2019</Year><Month>Mar</Month><Day>5</Day></PubDate>
        </JournalIssue>
        <Title>Cell Systems</Title>
      </Journal>
      <ArticleTitle>Designing <i>E. coli</i> gene circuits.</ArticleTitle>
      <ELocationID EIdType="doi" ValidYN="Y">10.1016/elocation</ELocationID>
      <Abstract>
        <AbstractText Label="BACKGROUND">Circuits matter.</AbstractText>
        <AbstractText Label="RESULTS">They work &amp; scale.</AbstractText>
      </Abstract>
      <AuthorList CompleteYN="Y">
        <Author ValidYN="Y">
          <LastName>Smith</LastName><ForeName>Alice</ForeName><Initials>A</Initials>
          <AffiliationInfo><Affiliation>Dept. of Bioengineering, MIT.</Affiliation></AffiliationInfo>
        </Author>
        <Author ValidYN="Y">
          <LastName>Lee</LastName><ForeName>Bob</ForeName>
        </Author>
        <Author ValidYN="Y">
          <CollectiveName>iGEM Consortium</CollectiveName>
        </Author>
      </AuthorList>
    </Article>
    <MeshHeadingList>
      <MeshHeading><DescriptorName UI="D004926" MajorTopicYN="N">Escherichia coli</DescriptorName></MeshHeading>
    </MeshHeadingList>
    <KeywordList Owner="NOTNLM"><Keyword MajorTopicYN="N">synthetic biology</Keyword></KeywordList>
    <CommentsCorrectionsList>
      <CommentsCorrections RefType="CommentIn"><PMID Version="1">99999999</PMID></CommentsCorrections>
    </CommentsCorrectionsList>
  </MedlineCitation>
  <PubmedData>
    <ArticleIdList>
      <ArticleId IdType="pubmed">31000001</ArticleId>
      <ArticleId IdType="doi">10.1016/j.cels.2019.01.001</ArticleId>
    </ArticleIdList>
    <ReferenceList>
      <Reference><ArticleIdList><ArticleId IdType="doi">10.9999/other</ArticleId></ArticleIdList></Reference>
    </ReferenceList>
  </PubmedData>
</PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_efetch_maps_article_fields() {
        let papers = parse_efetch_xml(EFETCH).unwrap();
        assert_eq!(papers.len(), 1);

        let paper = &papers[0];
        assert_eq!(paper.pubmed_id.as_deref(), Some("31000001"));
        assert_eq!(paper.title, "Designing E. coli gene circuits.");
        assert_eq!(
            paper.authors,
            vec!["Alice Smith", "Bob Lee", "iGEM Consortium"]
        );
        assert_eq!(paper.journal.as_deref(), Some("Cell Systems"));
        assert_eq!(paper.published.as_deref(), Some("2019 Mar 5"));
        assert_eq!(paper.doi.as_deref(), Some("10.1016/j.cels.2019.01.001"));
        assert_eq!(
            paper.abstract_text.as_deref(),
            Some("Circuits matter. They work & scale.")
        );
        assert_eq!(paper.keywords, vec!["Escherichia coli", "synthetic biology"]);
        assert_eq!(paper.affiliations, vec!["Dept. of Bioengineering, MIT."]);
    }

    #[test]
    fn test_parse_efetch_falls_back_to_elocation_doi_and_medline_date() {
        let body = r#"<PubmedArticleSet><PubmedArticle><MedlineCitation>
<PMID>1</PMID><Article><Journal><JournalIssue><PubDate><MedlineDate>1998 Dec-1999 Jan</MedlineDate></PubDate></JournalIssue></Journal>
<ArticleTitle>Old paper</ArticleTitle><ELocationID EIdType="doi">10.1/E</ELocationID></Article>
</MedlineCitation></PubmedArticle></PubmedArticleSet>"#;
        let papers = parse_efetch_xml(body).unwrap();
        assert_eq!(papers[0].doi.as_deref(), Some("10.1/E"));
        assert_eq!(papers[0].published.as_deref(), Some("1998 Dec-1999 Jan"));
        assert!(papers[0].authors.is_empty());
    }

    #[test]
    fn test_parse_efetch_rejects_truncated_document() {
        let truncated = &EFETCH[..EFETCH.len() - 40];
        assert!(parse_efetch_xml(truncated).is_err());
    }

    #[test]
    fn test_build_term() {
        assert_eq!(build_term(&SearchQuery::author("Alice Smith")), "\"Alice Smith\"[Author]");
        assert_eq!(
            build_term(&SearchQuery::keywords(["crispr", "yeast"])),
            "\"crispr\" AND \"yeast\""
        );
    }

    #[test]
    fn test_endpoint_includes_identification_params() {
        let source = PubMedSource::with_client(Client::new())
            .with_base_url("http://localhost/eutils/")
            .with_email(Some("lab@example.org".to_string()))
            .with_api_key(Some("k".to_string()));
        let url = source.efetch_url(&["1".to_string(), "2".to_string()]).unwrap();
        assert_eq!(url.path(), "/eutils/efetch.fcgi");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("email".to_string(), "lab@example.org".to_string())));
        assert!(pairs.contains(&("api_key".to_string(), "k".to_string())));
        assert!(pairs.contains(&("id".to_string(), "1,2".to_string())));
    }
}
