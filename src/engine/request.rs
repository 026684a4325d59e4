//! Collection requests and their limits.

use serde::{Deserialize, Serialize};

use super::SessionError;

/// Papers requested per author per source unless overridden.
pub const DEFAULT_MAX_PAPERS_PER_AUTHOR: usize = 50;
/// Seed generation plus two expansion rounds.
pub const DEFAULT_MAX_GENERATIONS: u32 = 3;
/// Session-wide ceiling on distinct papers.
pub const DEFAULT_MAX_TOTAL_PAPERS: usize = 1_000;
/// New authors carried into each generation.
pub const DEFAULT_MAX_NEW_AUTHORS_PER_GENERATION: usize = 10;
/// Session-wide ceiling on queried authors.
pub const DEFAULT_MAX_AUTHORS: usize = 200;
/// Papers requested by a keyword collection unless overridden.
pub const DEFAULT_MAX_KEYWORD_PAPERS: usize = 100;

/// Bounds on one author-driven session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionLimits {
    /// Records requested per author from each source.
    pub max_papers_per_author: usize,
    /// Generations to run, the seed generation included.
    pub max_generations: u32,
    /// Distinct papers the session may touch.
    pub max_total_papers: usize,
    /// Frontier size carried into each new generation.
    pub max_new_authors_per_generation: usize,
    /// Authors the session may query.
    pub max_authors: usize,
}

impl Default for ExpansionLimits {
    fn default() -> Self {
        Self {
            max_papers_per_author: DEFAULT_MAX_PAPERS_PER_AUTHOR,
            max_generations: DEFAULT_MAX_GENERATIONS,
            max_total_papers: DEFAULT_MAX_TOTAL_PAPERS,
            max_new_authors_per_generation: DEFAULT_MAX_NEW_AUTHORS_PER_GENERATION,
            max_authors: DEFAULT_MAX_AUTHORS,
        }
    }
}

impl ExpansionLimits {
    pub(crate) fn validate(&self) -> Result<(), SessionError> {
        for (name, value) in [
            ("max_papers_per_author", self.max_papers_per_author),
            ("max_total_papers", self.max_total_papers),
            ("max_new_authors_per_generation", self.max_new_authors_per_generation),
            ("max_authors", self.max_authors),
        ] {
            if value == 0 {
                return Err(SessionError::config(format!("{name} must be at least 1")));
            }
        }
        if self.max_generations == 0 {
            return Err(SessionError::config("max_generations must be at least 1"));
        }
        Ok(())
    }
}

/// Input of [`CollectionEngine::collect_by_authors`](super::CollectionEngine::collect_by_authors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorCollectionRequest {
    /// Seed author names, queried in this order.
    pub seeds: Vec<String>,
    /// Whether to grow the frontier from discovered co-authors.
    pub expand: bool,
    /// Session bounds.
    pub limits: ExpansionLimits,
}

impl AuthorCollectionRequest {
    /// Request with default limits.
    pub fn new<I, S>(seeds: I, expand: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            expand,
            limits: ExpansionLimits::default(),
        }
    }

    /// Replaces the limits.
    #[must_use]
    pub fn with_limits(mut self, limits: ExpansionLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Input of [`CollectionEngine::collect_by_keywords`](super::CollectionEngine::collect_by_keywords).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordCollectionRequest {
    /// Keywords combined into one query per source.
    pub keywords: Vec<String>,
    /// Distinct papers to collect across all sources.
    pub max_papers: usize,
}

impl KeywordCollectionRequest {
    /// Request for `keywords` capped at `max_papers`.
    pub fn new<I, S>(keywords: I, max_papers: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            max_papers,
        }
    }
}
