//! SQLite persistence for the corpus.
//!
//! [`SqliteCorpusStore`] implements [`CorpusSink`]: each generation's
//! [`CorpusDelta`] is written in one transaction. A new session starts from
//! [`SqliteCorpusStore::load_corpus`], so merges and edge increments build on
//! what earlier runs stored. Upserts never lower a count or clear a field,
//! and persisting the same delta twice leaves the database unchanged.

mod error;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info, instrument, warn};

pub use error::{StoreDbErrorKind, StoreError};

use crate::corpus::{
    Author, AuthorKey, AuthorPair, Collaboration, CollaborationGraph, Corpus, ExternalIds, Paper,
    PaperAuthor, PaperKey, PartialDate, title_key,
};
use crate::db::Database;
use crate::engine::{CorpusDelta, CorpusSink};
use crate::source::SourceId;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Pause before writing a generation again after the database was busy.
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Attempts per generation write while the database stays busy.
const BUSY_WRITE_ATTEMPTS: u32 = 3;

/// A collaboration row as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCollaboration {
    /// Smaller author key.
    pub author_a: String,
    /// Larger author key.
    pub author_b: String,
    /// Papers co-authored, counted per generation sighting.
    pub count: u64,
    /// Paper keys backing the edge.
    pub papers: Vec<String>,
}

/// Corpus sink backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct SqliteCorpusStore {
    db: Database,
}

impl SqliteCorpusStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Writes one generation's changes atomically.
    ///
    /// A write that finds the database locked by another connection is
    /// attempted again, up to three times in total.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any statement fails (nothing from
    /// this delta is kept), or [`StoreError::Encode`] if a list column cannot
    /// be serialized.
    #[instrument(skip(self, delta), fields(
        generation = delta.generation,
        papers = delta.papers.len(),
        collaborations = delta.collaborations.len()
    ))]
    pub async fn write_delta(&self, delta: &CorpusDelta) -> Result<()> {
        retry_when_busy(|| self.write_delta_once(delta)).await?;
        debug!("delta persisted");
        Ok(())
    }

    async fn write_delta_once(&self, delta: &CorpusDelta) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        for paper in &delta.papers {
            upsert_paper(&mut tx, paper, delta.generation).await?;
        }
        for author in &delta.authors {
            upsert_author(&mut tx, author).await?;
        }
        for collaboration in &delta.collaborations {
            upsert_collaboration(&mut tx, collaboration).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Rebuilds the stored corpus: papers with their bylines, sources and
    /// keywords, author nodes, and collaboration edges with their counts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a query fails, or
    /// [`StoreError::Decode`] if a row holds a value the corpus cannot take.
    #[instrument(skip(self))]
    pub async fn load_corpus(&self) -> Result<Corpus> {
        let pool = self.db.pool();

        let mut bylines: HashMap<String, Vec<PaperAuthor>> = HashMap::new();
        let mut author_papers: HashMap<String, BTreeSet<PaperKey>> = HashMap::new();
        let rows = sqlx::query(
            "SELECT paper_key, author_key, name FROM paper_authors ORDER BY paper_key, position",
        )
        .fetch_all(pool)
        .await?;
        for row in rows {
            let paper_key: String = row.get("paper_key");
            let author_key: String = row.get("author_key");
            author_papers
                .entry(author_key.clone())
                .or_default()
                .insert(PaperKey::from_stored(paper_key.clone()));
            bylines.entry(paper_key).or_default().push(PaperAuthor::new(
                AuthorKey::from_stored(author_key),
                row.get("name"),
            ));
        }

        let mut sources: HashMap<String, BTreeSet<SourceId>> = HashMap::new();
        for row in sqlx::query("SELECT paper_key, source FROM paper_sources")
            .fetch_all(pool)
            .await?
        {
            let key: String = row.get("paper_key");
            let source: String = row.get("source");
            let source = source
                .parse::<SourceId>()
                .map_err(|reason| decode_error(&key, "source", reason))?;
            sources.entry(key).or_default().insert(source);
        }

        let mut keywords: HashMap<String, BTreeSet<String>> = HashMap::new();
        for row in sqlx::query("SELECT paper_key, keyword FROM paper_keywords")
            .fetch_all(pool)
            .await?
        {
            keywords
                .entry(row.get("paper_key"))
                .or_default()
                .insert(row.get("keyword"));
        }

        let rows = sqlx::query(
            r"SELECT paper_key, title, abstract, published, arxiv_id, pubmed_id, doi, journal,
                     citation_count, citation_source, affiliations
              FROM papers",
        )
        .fetch_all(pool)
        .await?;
        let mut papers = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("paper_key");
            let title: String = row.get("title");
            let published: Option<String> = row.get("published");
            let citation_count: Option<i64> = row.get("citation_count");
            let citation_source: Option<String> = row.get("citation_source");
            let affiliations: String = row.get("affiliations");

            papers.push(Paper {
                title_key: title_key(&title),
                title,
                authors: bylines.remove(&key).unwrap_or_default(),
                abstract_text: row.get("abstract"),
                published: published.as_deref().and_then(PartialDate::parse),
                ids: ExternalIds {
                    arxiv: row.get("arxiv_id"),
                    pubmed: row.get("pubmed_id"),
                    doi: row.get("doi"),
                },
                journal: row.get("journal"),
                citation_count: citation_count
                    .map(|count| from_db_int(&key, "citation_count", count))
                    .transpose()?,
                citation_source: citation_source
                    .map(|source| source.parse::<SourceId>())
                    .transpose()
                    .map_err(|reason| decode_error(&key, "citation_source", reason))?,
                keywords: keywords.remove(&key).unwrap_or_default(),
                affiliations: decode_list(&key, "affiliations", &affiliations)?,
                sources: sources.remove(&key).unwrap_or_default(),
                key: PaperKey::from_stored(key),
            });
        }

        let rows = sqlx::query("SELECT author_key, display_name, depth, discovery_seq FROM authors")
            .fetch_all(pool)
            .await?;
        let mut authors = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("author_key");
            let depth: i64 = row.get("depth");
            let discovery_seq: i64 = row.get("discovery_seq");
            authors.push(Author {
                display_name: row.get("display_name"),
                papers: author_papers.remove(&key).unwrap_or_default(),
                depth: u32::try_from(depth).map_err(|error| decode_error(&key, "depth", error))?,
                discovery_seq: from_db_int(&key, "discovery_seq", discovery_seq)?,
                key: AuthorKey::from_stored(key),
            });
        }

        let rows = sqlx::query("SELECT author_a, author_b, count, papers FROM collaborations")
            .fetch_all(pool)
            .await?;
        let edges = rows
            .iter()
            .map(collaboration_from_row)
            .collect::<Result<Vec<_>>>()?;

        let corpus = Corpus::restore(papers, CollaborationGraph::restore(authors, edges));
        info!(
            papers = corpus.paper_count(),
            authors = corpus.graph().author_count(),
            collaborations = corpus.graph().edge_count(),
            "stored corpus loaded"
        );
        Ok(corpus)
    }

    /// Number of stored papers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn paper_count(&self) -> Result<i64> {
        count_rows(&self.db, "SELECT COUNT(*) FROM papers").await
    }

    /// Number of stored authors.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn author_count(&self) -> Result<i64> {
        count_rows(&self.db, "SELECT COUNT(*) FROM authors").await
    }

    /// Number of stored collaboration edges.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn collaboration_count(&self) -> Result<i64> {
        count_rows(&self.db, "SELECT COUNT(*) FROM collaborations").await
    }

    /// Reads the edge between two authors, in either order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails, or
    /// [`StoreError::Decode`] if the row is malformed.
    pub async fn collaboration(
        &self,
        a: &AuthorKey,
        b: &AuthorKey,
    ) -> Result<Option<StoredCollaboration>> {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let row = sqlx::query(
            r"SELECT author_a, author_b, count, papers
              FROM collaborations
              WHERE author_a = ? AND author_b = ?",
        )
        .bind(first.as_str())
        .bind(second.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let edge = collaboration_from_row(&row)?;
        Ok(Some(StoredCollaboration {
            author_a: edge.pair.first().to_string(),
            author_b: edge.pair.second().to_string(),
            count: edge.count,
            papers: edge.papers.iter().map(ToString::to_string).collect(),
        }))
    }

    /// Author keys of a paper in byline order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn paper_authors(&self, key: &PaperKey) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT author_key FROM paper_authors WHERE paper_key = ? ORDER BY position",
        )
        .bind(key.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Sources that reported a paper, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn paper_sources(&self, key: &PaperKey) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT source FROM paper_sources WHERE paper_key = ? ORDER BY source",
        )
        .bind(key.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Stored citation count and its source for a paper.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn citation(&self, key: &PaperKey) -> Result<Option<(i64, String)>> {
        let row = sqlx::query(
            "SELECT citation_count, citation_source FROM papers WHERE paper_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.and_then(|row| {
            let count: Option<i64> = row.get("citation_count");
            let source: Option<String> = row.get("citation_source");
            count.zip(source)
        }))
    }
}

#[async_trait]
impl CorpusSink for SqliteCorpusStore {
    async fn persist(&self, delta: &CorpusDelta) -> Result<()> {
        self.write_delta(delta).await
    }
}

/// Runs `operation` again while it fails on a busy or locked database.
async fn retry_when_busy<T, F, Fut>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Err(error) if error.is_busy_or_locked() && attempt < BUSY_WRITE_ATTEMPTS => {
                warn!(attempt, error = %error, "database busy; retrying write");
                tokio::time::sleep(BUSY_RETRY_DELAY).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

async fn count_rows(db: &Database, sql: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(sql)
        .fetch_one(db.pool())
        .await?;
    Ok(count)
}

fn collaboration_from_row(row: &SqliteRow) -> Result<Collaboration> {
    let first: String = row.get("author_a");
    let second: String = row.get("author_b");
    let count: i64 = row.get("count");
    let papers: String = row.get("papers");

    let pair = AuthorPair::new(
        AuthorKey::from_stored(first.clone()),
        AuthorKey::from_stored(second),
    )
    .ok_or_else(|| decode_error(&first, "author_b", "edge joins an author to itself"))?;
    let papers: Vec<String> = decode_list(&first, "papers", &papers)?;

    Ok(Collaboration {
        pair,
        count: from_db_int(&first, "count", count)?,
        papers: papers.into_iter().map(PaperKey::from_stored).collect(),
    })
}

fn decode_error(key: &str, field: &'static str, reason: impl fmt::Display) -> StoreError {
    StoreError::Decode {
        key: key.to_string(),
        field,
        reason: reason.to_string(),
    }
}

fn decode_list<T: DeserializeOwned>(key: &str, field: &'static str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|error| decode_error(key, field, error))
}

fn encode_list<'a>(
    key: &str,
    field: &'static str,
    values: impl IntoIterator<Item = &'a str>,
) -> Result<String> {
    let values: Vec<&str> = values.into_iter().collect();
    serde_json::to_string(&values).map_err(|error| StoreError::Encode {
        key: key.to_string(),
        field,
        reason: error.to_string(),
    })
}

fn to_db_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db_int(key: &str, field: &'static str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|error| decode_error(key, field, error))
}

async fn upsert_paper(
    tx: &mut Transaction<'_, Sqlite>,
    paper: &Paper,
    generation: u32,
) -> Result<()> {
    let key = paper.key.as_str();
    let affiliations = encode_list(
        key,
        "affiliations",
        paper.affiliations.iter().map(String::as_str),
    )?;
    let published = paper.published.map(|date| date.to_string());

    // Title and first_generation keep their first-written values; nullable
    // fields are only ever filled, never cleared.
    sqlx::query(
        r"INSERT INTO papers (
            paper_key, title, abstract, published, arxiv_id, pubmed_id, doi, journal,
            citation_count, citation_source, affiliations, first_generation, last_generation
          )
          VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
          ON CONFLICT(paper_key) DO UPDATE SET
            abstract = COALESCE(papers.abstract, excluded.abstract),
            published = COALESCE(excluded.published, papers.published),
            arxiv_id = COALESCE(papers.arxiv_id, excluded.arxiv_id),
            pubmed_id = COALESCE(papers.pubmed_id, excluded.pubmed_id),
            doi = COALESCE(papers.doi, excluded.doi),
            journal = COALESCE(papers.journal, excluded.journal),
            citation_count = COALESCE(excluded.citation_count, papers.citation_count),
            citation_source = CASE
              WHEN excluded.citation_count IS NULL THEN papers.citation_source
              ELSE excluded.citation_source
            END,
            affiliations = excluded.affiliations,
            last_generation = MAX(papers.last_generation, excluded.last_generation),
            updated_at = datetime('now')",
    )
    .bind(key)
    .bind(&paper.title)
    .bind(paper.abstract_text.as_deref())
    .bind(published)
    .bind(paper.ids.arxiv.as_deref())
    .bind(paper.ids.pubmed.as_deref())
    .bind(paper.ids.doi.as_deref())
    .bind(paper.journal.as_deref())
    .bind(paper.citation_count.map(to_db_int))
    .bind(paper.citation_source.map(|source| source.as_str()))
    .bind(affiliations)
    .bind(i64::from(generation))
    .bind(i64::from(generation))
    .execute(&mut **tx)
    .await?;

    for source in &paper.sources {
        sqlx::query("INSERT OR IGNORE INTO paper_sources (paper_key, source) VALUES (?, ?)")
            .bind(key)
            .bind(source.as_str())
            .execute(&mut **tx)
            .await?;
    }

    // The byline may have been replaced by a longer one on merge.
    sqlx::query("DELETE FROM paper_authors WHERE paper_key = ?")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    for (position, author) in paper.authors.iter().enumerate() {
        sqlx::query(
            "INSERT INTO paper_authors (paper_key, position, author_key, name) VALUES (?, ?, ?, ?)",
        )
        .bind(key)
        .bind(i64::try_from(position).unwrap_or(i64::MAX))
        .bind(author.key.as_str())
        .bind(&author.name)
        .execute(&mut **tx)
        .await?;
    }

    for keyword in &paper.keywords {
        sqlx::query("INSERT OR IGNORE INTO paper_keywords (paper_key, keyword) VALUES (?, ?)")
            .bind(key)
            .bind(keyword)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

async fn upsert_author(tx: &mut Transaction<'_, Sqlite>, author: &Author) -> Result<()> {
    sqlx::query(
        r"INSERT INTO authors (author_key, display_name, depth, discovery_seq, paper_count)
          VALUES (?, ?, ?, ?, ?)
          ON CONFLICT(author_key) DO UPDATE SET
            depth = MIN(authors.depth, excluded.depth),
            paper_count = MAX(authors.paper_count, excluded.paper_count),
            updated_at = datetime('now')",
    )
    .bind(author.key.as_str())
    .bind(&author.display_name)
    .bind(i64::from(author.depth))
    .bind(to_db_int(author.discovery_seq))
    .bind(i64::try_from(author.papers.len()).unwrap_or(i64::MAX))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_collaboration(
    tx: &mut Transaction<'_, Sqlite>,
    collaboration: &Collaboration,
) -> Result<()> {
    let first = collaboration.pair.first().as_str();
    let second = collaboration.pair.second().as_str();
    let papers = encode_list(
        first,
        "papers",
        collaboration.papers.iter().map(PaperKey::as_str),
    )?;

    sqlx::query(
        r"INSERT INTO collaborations (author_a, author_b, count, papers)
          VALUES (?, ?, ?, ?)
          ON CONFLICT(author_a, author_b) DO UPDATE SET
            count = MAX(collaborations.count, excluded.count),
            papers = excluded.papers,
            updated_at = datetime('now')",
    )
    .bind(first)
    .bind(second)
    .bind(to_db_int(collaboration.count))
    .bind(papers)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
