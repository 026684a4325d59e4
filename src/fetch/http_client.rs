//! HTTP client settings every source adapter is built with.

use std::time::Duration;

use reqwest::Client;

use crate::source::{SourceError, SourceId};

/// Project URL sent in every User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/fierce/papernet";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect and whole-request timeouts for a source client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// TCP connect timeout.
    pub connect: Duration,
    /// Timeout for the full request, body included.
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            request: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl HttpTimeouts {
    /// Timeouts from whole seconds.
    #[must_use]
    pub fn from_secs(connect_secs: u64, request_secs: u64) -> Self {
        Self {
            connect: Duration::from_secs(connect_secs),
            request: Duration::from_secs(request_secs),
        }
    }
}

/// User-Agent shared by all adapters.
///
/// NCBI and arXiv ask clients to name a contact, which goes in as `mailto:`.
#[must_use]
pub fn standard_user_agent(contact_email: Option<&str>) -> String {
    let version = env!("CARGO_PKG_VERSION");
    match contact_email.map(str::trim).filter(|email| !email.is_empty()) {
        Some(email) => {
            format!("papernet/{version} (academic-research-tool; +{PROJECT_UA_URL}; mailto:{email})")
        }
        None => format!("papernet/{version} (academic-research-tool; +{PROJECT_UA_URL})"),
    }
}

/// Builds a gzip-enabled client for `source` with the given User-Agent and timeouts.
///
/// # Errors
///
/// Returns [`SourceError::ClientBuild`] when reqwest cannot build the client
/// (for instance when no TLS backend can be initialized).
pub fn build_source_http_client(
    source: SourceId,
    user_agent: &str,
    timeouts: HttpTimeouts,
) -> Result<Client, SourceError> {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.request)
        .user_agent(user_agent)
        .gzip(true)
        .build()
        .map_err(|error| {
            SourceError::client_build(source, format!("HTTP client construction failed: {error}"))
        })
}
