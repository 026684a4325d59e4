//! Error types for literature source operations.
//!
//! Every network round-trip made on behalf of an adapter reports failures as a
//! [`SourceError`]. The retry layer classifies these into transient and
//! permanent failures; the expansion controller downgrades whatever survives
//! the retry budget into a partial-failure note on the session.

use thiserror::Error;

use super::SourceId;

/// Errors that can occur while querying a literature source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("{source_id} network error calling {url}: {source}")]
    Network {
        /// The source being queried.
        source_id: SourceId,
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("{source_id} timeout calling {url}")]
    Timeout {
        /// The source being queried.
        source_id: SourceId,
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("{source_id} returned HTTP {status} for {url}")]
    HttpStatus {
        /// The source being queried.
        source_id: SourceId,
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429/503 responses).
        retry_after: Option<String>,
    },

    /// The response body could not be parsed into a page of records.
    #[error("{source_id} returned a malformed page for {url}: {reason}")]
    MalformedPage {
        /// The source being queried.
        source_id: SourceId,
        /// The URL whose body was malformed.
        url: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// The source has no entity matching the query (e.g. unknown author).
    #[error("{source_id} has no match for query '{query}'")]
    UnknownQuery {
        /// The source being queried.
        source_id: SourceId,
        /// The query that matched nothing.
        query: String,
    },

    /// The source refused the query itself.
    #[error("{source_id} rejected query '{query}': {reason}")]
    Rejected {
        /// The source being queried.
        source_id: SourceId,
        /// The rejected query.
        query: String,
        /// Why the query was rejected.
        reason: String,
    },

    /// HTTP client or request construction failed.
    #[error("{source_id} client setup failed: {reason}")]
    ClientBuild {
        /// The source whose client failed.
        source_id: SourceId,
        /// Construction diagnostic.
        reason: String,
    },
}

impl SourceError {
    /// Creates a network error, mapping reqwest timeouts to [`SourceError::Timeout`].
    pub fn network(source_id: SourceId, url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                source_id,
                url: url.into(),
            }
        } else {
            Self::Network {
                source_id,
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(source_id: SourceId, url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            source_id,
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error carrying the server's Retry-After value.
    pub fn http_status_with_retry_after(
        source_id: SourceId,
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            source_id,
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a malformed page error.
    pub fn malformed(source_id: SourceId, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPage {
            source_id,
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown-query error.
    pub fn unknown_query(source_id: SourceId, query: impl Into<String>) -> Self {
        Self::UnknownQuery {
            source_id,
            query: query.into(),
        }
    }

    /// Creates a rejected-query error.
    pub fn rejected(
        source_id: SourceId,
        query: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            source_id,
            query: query.into(),
            reason: reason.into(),
        }
    }

    /// Creates a client construction error.
    pub fn client_build(source_id: SourceId, reason: impl Into<String>) -> Self {
        Self::ClientBuild {
            source_id,
            reason: reason.into(),
        }
    }

    /// Returns the source that produced this error.
    #[must_use]
    pub fn source_id(&self) -> SourceId {
        match self {
            Self::Network { source_id, .. }
            | Self::Timeout { source_id, .. }
            | Self::HttpStatus { source_id, .. }
            | Self::MalformedPage { source_id, .. }
            | Self::UnknownQuery { source_id, .. }
            | Self::Rejected { source_id, .. }
            | Self::ClientBuild { source_id, .. } => *source_id,
        }
    }

    /// Returns the raw Retry-After header value, if the server sent one.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}
