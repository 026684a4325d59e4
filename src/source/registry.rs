//! Registration-ordered collection of literature sources.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    ArxivSource, LiteratureSource, PubMedSource, QueryKind, SemanticScholarSource, SourceId,
};
use crate::config::EngineConfig;

/// The set of adapters a session fans out to.
///
/// Sources are queried in registration order, which keeps exploration
/// deterministic for identical inputs.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn LiteratureSource>>,
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter. A second adapter for the same source replaces the first.
    #[tracing::instrument(skip(self, source), fields(source_id = %source.id()))]
    pub fn register(&mut self, source: Arc<dyn LiteratureSource>) {
        let id = source.id();
        if let Some(slot) = self.sources.iter_mut().find(|existing| existing.id() == id) {
            debug!("replacing registered source");
            *slot = source;
        } else {
            debug!("registering source");
            self.sources.push(source);
        }
    }

    /// Returns the number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if no sources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Registered source ids in order.
    #[must_use]
    pub fn ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|source| source.id()).collect()
    }

    /// Sources able to answer queries of `kind`, in registration order.
    #[must_use]
    pub fn sources_for(&self, kind: QueryKind) -> Vec<Arc<dyn LiteratureSource>> {
        self.sources
            .iter()
            .filter(|source| source.supports(kind))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.ids())
            .finish()
    }
}

/// Builds the registry for the sources enabled in `config`.
///
/// An adapter whose client cannot be constructed is skipped with a warning;
/// the engine rejects an empty registry when a session starts.
#[must_use]
pub fn build_default_sources(config: &EngineConfig) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    let timeouts = config.http_timeouts();

    for id in &config.sources {
        let built: Result<Arc<dyn LiteratureSource>, _> = match id {
            SourceId::Arxiv => ArxivSource::new(timeouts)
                .map(|source| Arc::new(source) as Arc<dyn LiteratureSource>),
            SourceId::PubMed => PubMedSource::new(
                config.contact_email.clone(),
                config.pubmed_api_key.clone(),
                timeouts,
            )
            .map(|source| Arc::new(source) as Arc<dyn LiteratureSource>),
            SourceId::SemanticScholar => {
                SemanticScholarSource::new(config.semantic_scholar_api_key.clone(), timeouts)
                    .map(|source| Arc::new(source) as Arc<dyn LiteratureSource>)
            }
        };

        match built {
            Ok(source) => registry.register(source),
            Err(error) => warn!(
                source = %id,
                error = %error,
                "source unavailable; continuing with remaining sources"
            ),
        }
    }

    registry
}
