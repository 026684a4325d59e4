//! Papernet Core Library
//!
//! This library collects academic paper metadata from literature APIs
//! (arXiv, `PubMed`, Semantic Scholar), merges the records into a single
//! deduplicated corpus, and grows a co-authorship network outward from seed
//! authors one generation at a time.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`fetch`] - Per-source rate limiting, bounded retry, HTTP client policy
//! - [`source`] - Source adapters behind the [`LiteratureSource`] interface
//! - [`corpus`] - Normalization, identity merge, collaboration graph, analysis
//! - [`engine`] - Generation-by-generation network expansion sessions
//! - [`config`] - Engine configuration file parsing
//! - [`db`] / [`store`] - Optional `SQLite` persistence of the corpus

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod corpus;
pub mod db;
pub mod engine;
pub mod fetch;
pub mod source;
pub mod store;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig, load_config};
pub use corpus::{
    Corpus, NetworkAnalysis, Paper, PaperKey, SharedCorpus, analyze_network, network_analysis,
};
pub use db::Database;
pub use engine::{
    AuthorCollectionRequest, CollectionEngine, CollectionSession, ExpansionLimits,
    KeywordCollectionRequest, SessionError, TerminationReason,
};
pub use fetch::{RateLimiter, RetryPolicy, SourceGateway};
pub use source::{LiteratureSource, RawPaper, SearchQuery, SourceId, SourceRegistry};
pub use store::{SqliteCorpusStore, StoreError};
