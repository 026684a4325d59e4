//! Fatal session errors.

use thiserror::Error;

use super::CollectionSession;
use crate::corpus::CorpusError;
use crate::store::StoreError;

/// Errors that abort a collection session.
///
/// Adapter failures never surface here; they are recorded on the session
/// as partial failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The request or engine setup cannot run (e.g. no sources for the query kind).
    #[error("invalid collection setup: {reason}")]
    Config {
        /// What is wrong.
        reason: String,
    },

    /// The shared corpus is unusable.
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    /// Writing a generation to storage failed; `session` holds the results up
    /// to that point.
    #[error("storage write failed after generation {}: {source}", .session.generation)]
    Storage {
        /// The session as it stood when the write failed.
        session: Box<CollectionSession>,
        /// The underlying store error.
        #[source]
        source: StoreError,
    },
}

impl SessionError {
    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// The partial session carried by a storage failure.
    #[must_use]
    pub fn partial_session(&self) -> Option<&CollectionSession> {
        match self {
            Self::Storage { session, .. } => Some(session),
            Self::Config { .. } | Self::Corpus(_) => None,
        }
    }
}
