//! Outbound call discipline shared by all literature sources.
//!
//! - [`RateLimiter`] - per-source cadence gate (FIFO, never rejects)
//! - [`RetryPolicy`] / [`classify_error`] - bounded exponential backoff
//! - [`SourceGateway`] / [`FetchContext`] - acquire, send, classify, retry
//! - [`build_source_http_client`] - shared client construction policy

mod gateway;
mod http_client;
mod rate_limiter;
mod retry;

pub use gateway::{CallStats, FetchContext, SourceGateway};
pub use http_client::{HttpTimeouts, build_source_http_client, standard_user_agent};
pub use rate_limiter::{
    DEFAULT_MAX_IN_FLIGHT, RateLimiter, SourceCadence, SourcePermit, parse_retry_after,
};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
