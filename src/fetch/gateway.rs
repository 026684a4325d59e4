//! Rate-limited, retrying HTTP round-trips on behalf of source adapters.
//!
//! Adapters never call `reqwest` directly. They hand a prepared
//! [`reqwest::RequestBuilder`] to a [`FetchContext`], which for every attempt:
//!
//! 1. waits for the source's [`RateLimiter`] permit,
//! 2. sends the request and maps transport failures into [`SourceError`],
//! 3. parses the body (a parse failure is a transient malformed page),
//! 4. classifies any error and consults the [`RetryPolicy`].
//!
//! A server `Retry-After` on 429 is fed back into the limiter so that every
//! caller of that source waits, not only the one that was refused.

use std::sync::Arc;

use reqwest::RequestBuilder;
use reqwest::header::RETRY_AFTER;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use crate::source::{SourceError, SourceId};

/// Shared gate through which all source traffic flows.
#[derive(Debug, Clone)]
pub struct SourceGateway {
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl SourceGateway {
    /// Creates a gateway over a shared limiter.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self { limiter, retry }
    }

    /// Returns the shared limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Returns the retry policy applied to each call.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Opens a per-query context for `source`.
    #[must_use]
    pub fn context(&self, source: SourceId) -> FetchContext<'_> {
        FetchContext {
            gateway: self,
            source,
            stats: CallStats::default(),
        }
    }
}

/// Network accounting for one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallStats {
    /// Round-trips sent (retries included).
    pub calls: u64,
    /// Attempts that were repeated after a failure.
    pub retries: u64,
}

impl CallStats {
    /// Adds another tally into this one.
    pub fn absorb(&mut self, other: CallStats) {
        self.calls += other.calls;
        self.retries += other.retries;
    }
}

/// Per-query handle adapters use for network calls.
#[derive(Debug)]
pub struct FetchContext<'a> {
    gateway: &'a SourceGateway,
    source: SourceId,
    stats: CallStats,
}

impl FetchContext<'_> {
    /// Source this context is bound to.
    #[must_use]
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Calls made through this context so far.
    #[must_use]
    pub fn stats(&self) -> CallStats {
        self.stats
    }

    /// Fetches a body as text.
    ///
    /// # Errors
    ///
    /// Returns the last [`SourceError`] once retries are exhausted or the
    /// failure is permanent.
    pub async fn get_text(&mut self, request: RequestBuilder) -> Result<String, SourceError> {
        self.get_parsed(request, |body| Ok(body.to_string())).await
    }

    /// Fetches and deserializes a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MalformedPage`] if the body never deserializes,
    /// or the last transport error.
    pub async fn get_json<T>(&mut self, request: RequestBuilder) -> Result<T, SourceError>
    where
        T: DeserializeOwned + Send,
    {
        self.get_parsed(request, |body| {
            serde_json::from_str::<T>(body).map_err(|error| error.to_string())
        })
        .await
    }

    /// Fetches a body and runs `parse` over it, retrying the whole round-trip
    /// when the parser rejects the body.
    ///
    /// # Errors
    ///
    /// Returns the last [`SourceError`] once retries are exhausted or the
    /// failure is permanent.
    #[instrument(skip(self, request, parse), fields(source = %self.source))]
    pub async fn get_parsed<T, F>(
        &mut self,
        request: RequestBuilder,
        parse: F,
    ) -> Result<T, SourceError>
    where
        T: Send,
        F: Fn(&str) -> Result<T, String> + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            let Some(this_attempt) = request.try_clone() else {
                return Err(SourceError::client_build(
                    self.source,
                    "request body cannot be replayed",
                ));
            };

            let error = match self.attempt_once(this_attempt, &parse).await {
                Ok(parsed) => return Ok(parsed),
                Err(error) => error,
            };

            let failure = classify_error(&error);
            if failure == FailureType::RateLimited
                && let Some(delay) = error.retry_after().and_then(parse_retry_after)
            {
                self.gateway
                    .limiter
                    .record_rate_limit(self.source, delay)
                    .await;
            }

            match self.gateway.retry.should_retry(failure, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        source = %self.source,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "source call failed, retrying"
                    );
                    self.stats.retries += 1;
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(source = %self.source, attempt, reason, "giving up on source call");
                    return Err(error);
                }
            }
        }
    }

    async fn attempt_once<T, F>(&mut self, request: RequestBuilder, parse: &F) -> Result<T, SourceError>
    where
        F: Fn(&str) -> Result<T, String> + Sync,
    {
        let (client, built) = request.build_split();
        let request = built.map_err(|error| {
            SourceError::client_build(self.source, format!("invalid request: {error}"))
        })?;
        let url = request.url().to_string();

        let _permit = self.gateway.limiter.acquire(self.source).await;
        self.stats.calls += 1;
        debug!(source = %self.source, url = %url, "calling source");

        let response = client
            .execute(request)
            .await
            .map_err(|error| SourceError::network(self.source, &url, error))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            return Err(SourceError::http_status_with_retry_after(
                self.source,
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|error| SourceError::network(self.source, &url, error))?;

        parse(&body).map_err(|reason| SourceError::malformed(self.source, url, reason))
    }
}
