//! Bounded retry with exponential backoff for source calls.
//!
//! A failed round-trip is first classified by [`classify_error`]; the
//! [`RetryPolicy`] then decides, from that class and the attempt number,
//! whether another attempt is worth making and how long to wait first.
//!
//! # Example
//!
//! ```
//! use papernet_core::fetch::{RetryPolicy, FailureType, RetryDecision, classify_error};
//! use papernet_core::source::{SourceError, SourceId};
//!
//! let policy = RetryPolicy::default();
//! let error = SourceError::http_status(SourceId::PubMed, "https://eutils.ncbi.nlm.nih.gov", 503);
//! assert_eq!(classify_error(&error), FailureType::Transient);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => println!("attempt {attempt} in {delay:?}"),
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::source::SourceError;

/// Default number of attempts per call, the first one included.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// How a failed call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Timeouts, dropped connections, 5xx, bodies that do not parse.
    Transient,
    /// The query itself is at fault (4xx, unknown author, rejected syntax).
    Permanent,
    /// HTTP 429. Retried after the server's Retry-After has been recorded
    /// on the limiter.
    RateLimited,
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make attempt number `attempt`.
    Retry {
        /// Backoff before the next attempt.
        delay: Duration,
        /// 1-based number of the attempt about to be made.
        attempt: u32,
    },
    /// Stop and surface the last error.
    DoNotRetry {
        /// Why no further attempt is made.
        reason: String,
    },
}

/// Attempt ceiling plus backoff schedule.
///
/// The wait before attempt `n + 1` is
/// `min(base_delay * multiplier^(n - 1), max_delay)` plus up to
/// `max_jitter` of random spread. With the defaults a call is tried three
/// times, roughly 1 s and 2 s apart.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            DEFAULT_BASE_DELAY,
            DEFAULT_MAX_DELAY,
            DEFAULT_BACKOFF_MULTIPLIER,
        )
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is raised to at least one.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Default schedule with a different attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Replaces the jitter bound. Zero disables jitter.
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Attempt ceiling, the first attempt included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what to do after attempt number `attempt` failed with `failure_type`.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure".to_string(),
            };
        }
        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: format!("{} attempts exhausted", self.max_attempts),
            };
        }

        let delay = self.backoff(attempt) + self.jitter();
        debug!(attempt, delay_ms = delay.as_millis(), "scheduling retry");
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Deterministic part of the wait after attempt `attempt` failed.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = f64::from(self.backoff_multiplier).powi(exponent);
        if !factor.is_finite() || factor < 0.0 {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        rand::thread_rng().gen_range(Duration::ZERO..=self.max_jitter)
    }
}

/// Maps a source error onto the retry classes.
///
/// HTTP 408 and every 5xx are transient, 429 is rate limiting and any other
/// 4xx is permanent. Network errors are transient unless they look like TLS
/// or certificate problems, which another attempt will not fix. A body that
/// does not parse is treated as a truncated transfer and retried.
#[instrument]
pub fn classify_error(error: &SourceError) -> FailureType {
    match error {
        SourceError::HttpStatus { status, .. } => match *status {
            429 => FailureType::RateLimited,
            408 | 500..=599 => FailureType::Transient,
            _ => FailureType::Permanent,
        },
        SourceError::Network { source, .. } if is_tls_error(source) => FailureType::Permanent,
        SourceError::Network { .. }
        | SourceError::Timeout { .. }
        | SourceError::MalformedPage { .. } => FailureType::Transient,
        SourceError::UnknownQuery { .. }
        | SourceError::Rejected { .. }
        | SourceError::ClientBuild { .. } => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let text = error.to_string().to_lowercase();
    ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|needle| text.contains(needle))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::SourceId;

    fn status(code: u16) -> SourceError {
        SourceError::http_status(SourceId::SemanticScholar, "http://example.com", code)
    }

    fn exact(max_attempts: u32, max_delay: Duration) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_secs(1), max_delay, 2.0)
            .with_max_jitter(Duration::ZERO)
    }

    #[test]
    fn test_default_policy_tries_three_times() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.max_jitter, DEFAULT_MAX_JITTER);
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = exact(10, Duration::from_secs(5));
        let delays: Vec<u64> = (1..=5).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
        assert_eq!(policy.backoff(200), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            assert!(policy.jitter() <= DEFAULT_MAX_JITTER);
        }
        assert_eq!(exact(3, DEFAULT_MAX_DELAY).jitter(), Duration::ZERO);
    }

    #[test]
    fn test_classify_http_statuses() {
        for code in [400, 401, 403, 404, 410, 422] {
            assert_eq!(classify_error(&status(code)), FailureType::Permanent, "{code}");
        }
        for code in [408, 500, 502, 503, 504, 599] {
            assert_eq!(classify_error(&status(code)), FailureType::Transient, "{code}");
        }
        assert_eq!(classify_error(&status(429)), FailureType::RateLimited);
    }

    #[test]
    fn test_classify_non_http_errors() {
        let malformed = SourceError::malformed(SourceId::Arxiv, "http://x", "unexpected EOF");
        let timeout = SourceError::Timeout {
            source_id: SourceId::PubMed,
            url: "http://x".to_string(),
        };
        let unknown = SourceError::unknown_query(SourceId::SemanticScholar, "Nobody Atall");
        let rejected = SourceError::rejected(SourceId::PubMed, "((", "syntax error");

        assert_eq!(classify_error(&malformed), FailureType::Transient);
        assert_eq!(classify_error(&timeout), FailureType::Transient);
        assert_eq!(classify_error(&unknown), FailureType::Permanent);
        assert_eq!(classify_error(&rejected), FailureType::Permanent);
    }

    #[test]
    fn test_permanent_failures_are_not_retried() {
        match RetryPolicy::default().should_retry(FailureType::Permanent, 1) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("permanent")),
            RetryDecision::Retry { .. } => panic!("permanent failures must not retry"),
        }
    }

    #[test]
    fn test_retry_schedule_until_exhausted() {
        let policy = exact(3, DEFAULT_MAX_DELAY);

        assert_eq!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(1),
                attempt: 2
            }
        );
        assert_eq!(
            policy.should_retry(FailureType::RateLimited, 2),
            RetryDecision::Retry {
                delay: Duration::from_secs(2),
                attempt: 3
            }
        );
        match policy.should_retry(FailureType::Transient, 3) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("exhausted")),
            RetryDecision::Retry { .. } => panic!("third failure ends the call"),
        }
    }
}
