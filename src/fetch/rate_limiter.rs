//! Per-source rate limiting for literature API calls.
//!
//! This module provides the [`RateLimiter`] struct which gates every outbound
//! call on the cadence allowed by the target source, so that no source ever
//! sees more than `max_calls` requests inside any rolling `window`.
//!
//! # Overview
//!
//! Each source has independent state: calls to arXiv never wait on `PubMed`'s
//! budget. Within one source, waiters are served strictly in request order
//! (the per-source `tokio::sync::Mutex` is fair), and a separate semaphore
//! caps how many calls may be in flight at once.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use papernet_core::fetch::{RateLimiter, SourceCadence};
//! use papernet_core::source::SourceId;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(
//!     [(SourceId::Arxiv, SourceCadence::min_interval(Duration::from_secs(3)))],
//!     1,
//! );
//!
//! // First call proceeds immediately
//! let permit = limiter.acquire(SourceId::Arxiv).await;
//! drop(permit);
//!
//! // Second call to the same source waits out the interval
//! let _permit = limiter.acquire(SourceId::Arxiv).await;
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::source::SourceId;

/// Warning threshold for cumulative delay per source (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Default number of concurrent in-flight calls per source.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;

/// Allowed call cadence for one source: at most `max_calls` per rolling `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceCadence {
    max_calls: u32,
    window: Duration,
}

impl SourceCadence {
    /// At most `max_calls` calls inside any rolling `window`.
    #[must_use]
    pub fn per_window(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
        }
    }

    /// At least `interval` between consecutive calls.
    #[must_use]
    pub fn min_interval(interval: Duration) -> Self {
        Self::per_window(1, interval)
    }

    /// Published limits for each source.
    ///
    /// | Source | Cadence |
    /// |--------|---------|
    /// | arXiv | 1 call / 3 s |
    /// | `PubMed` | 3 calls / 1 s (no API key) |
    /// | Semantic Scholar | 100 calls / 5 min (unauthenticated pool) |
    #[must_use]
    pub fn default_for(source: SourceId) -> Self {
        match source {
            SourceId::Arxiv => Self::min_interval(Duration::from_secs(3)),
            SourceId::PubMed => Self::per_window(3, Duration::from_secs(1)),
            SourceId::SemanticScholar => Self::per_window(100, Duration::from_secs(300)),
        }
    }

    /// Returns the maximum calls per window.
    #[must_use]
    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    /// Returns the rolling window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Per-source rate limiter for literature API calls.
///
/// Designed to be wrapped in `Arc` and shared by every adapter and session
/// using the same sources. Uses `DashMap` for concurrent access to per-source
/// state and `tokio::sync::Mutex` for FIFO, atomic read-update of the call
/// window.
#[derive(Debug)]
pub struct RateLimiter {
    /// Configured cadences; sources not listed use [`SourceCadence::default_for`].
    cadences: HashMap<SourceId, SourceCadence>,

    /// Maximum concurrent in-flight calls per source.
    max_in_flight: usize,

    /// Whether rate limiting is disabled (tests and replay tooling).
    disabled: bool,

    /// Per-source state tracking.
    /// Uses Arc so the `DashMap` shard lock is released before awaiting.
    sources: DashMap<SourceId, Arc<SourceState>>,
}

/// State tracked for each source.
#[derive(Debug)]
struct SourceState {
    cadence: SourceCadence,

    /// Timestamps of calls inside the current window plus any server-imposed block.
    /// Held across the wait so later callers queue behind earlier ones.
    window: Mutex<CallWindow>,

    /// Caps concurrent in-flight calls.
    in_flight: Arc<Semaphore>,

    /// Cumulative delay applied to this source (in milliseconds).
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct CallWindow {
    recent: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl SourceState {
    fn new(cadence: SourceCadence, max_in_flight: usize) -> Self {
        Self {
            cadence,
            window: Mutex::new(CallWindow::default()),
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Adds to the cumulative delay and returns the new total.
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

/// Proof that a call may proceed; holds the source's in-flight slot until dropped.
#[derive(Debug)]
pub struct SourcePermit {
    _in_flight: Option<OwnedSemaphorePermit>,
}

impl RateLimiter {
    /// Creates a limiter with explicit cadences for some sources.
    #[must_use]
    #[instrument(skip_all, fields(max_in_flight))]
    pub fn new(
        cadences: impl IntoIterator<Item = (SourceId, SourceCadence)>,
        max_in_flight: usize,
    ) -> Self {
        debug!("creating rate limiter");
        Self {
            cadences: cadences.into_iter().collect(),
            max_in_flight: max_in_flight.max(1),
            disabled: false,
            sources: DashMap::new(),
        }
    }

    /// Creates a limiter using each source's published cadence.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new([], DEFAULT_MAX_IN_FLIGHT)
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            cadences: HashMap::new(),
            max_in_flight: usize::MAX >> 4,
            disabled: true,
            sources: DashMap::new(),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the cadence applied to a source.
    #[must_use]
    pub fn cadence(&self, source: SourceId) -> SourceCadence {
        self.cadences
            .get(&source)
            .copied()
            .unwrap_or_else(|| SourceCadence::default_for(source))
    }

    fn state_for(&self, source: SourceId) -> Arc<SourceState> {
        self.sources
            .entry(source)
            .or_insert_with(|| Arc::new(SourceState::new(self.cadence(source), self.max_in_flight)))
            .clone()
    }

    /// Waits until a call to `source` is permitted.
    ///
    /// Never rejects: it only delays. Callers are served in the order they
    /// called `acquire`. The returned permit must be held for the duration of
    /// the network call so the in-flight cap is honoured.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn acquire(&self, source: SourceId) -> SourcePermit {
        if self.disabled {
            return SourcePermit { _in_flight: None };
        }

        // Clone Arc to release DashMap lock before awaiting
        let state = self.state_for(source);

        let in_flight = match Arc::clone(&state.in_flight).acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!(source = %source, "in-flight semaphore closed; continuing without slot");
                None
            }
        };

        let mut window = state.window.lock().await;
        loop {
            let now = Instant::now();

            if let Some(until) = window.blocked_until {
                if until > now {
                    let delay = until - now;
                    let cumulative = state.add_cumulative_delay(delay);
                    debug!(
                        delay_ms = delay.as_millis(),
                        cumulative_ms = cumulative.as_millis(),
                        "waiting out server-imposed rate limit"
                    );
                    tokio::time::sleep_until(until).await;
                    continue;
                }
                window.blocked_until = None;
            }

            let cadence = state.cadence;
            while window
                .recent
                .front()
                .is_some_and(|first| *first + cadence.window <= now)
            {
                window.recent.pop_front();
            }

            if window.recent.len() < cadence.max_calls as usize {
                window.recent.push_back(now);
                break;
            }

            let Some(oldest) = window.recent.front().copied() else {
                window.recent.push_back(now);
                break;
            };
            let ready_at = oldest + cadence.window;
            let delay = ready_at.saturating_duration_since(now);
            let cumulative = state.add_cumulative_delay(delay);

            debug!(
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "applying rate limit delay"
            );

            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                warn!(
                    source = %source,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive rate limiting - consider lowering per-author or per-generation limits"
                );
            }

            tokio::time::sleep_until(ready_at).await;
        }

        SourcePermit {
            _in_flight: in_flight,
        }
    }

    /// Records a server-mandated delay (from a Retry-After header).
    ///
    /// Subsequent acquisitions for `source` wait until the delay has passed.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn record_rate_limit(&self, source: SourceId, delay: Duration) {
        if self.disabled {
            return;
        }

        let state = self.state_for(source);
        let cumulative = state.add_cumulative_delay(delay);
        let until = Instant::now() + delay;
        {
            let mut window = state.window.lock().await;
            window.blocked_until = Some(window.blocked_until.map_or(until, |b| b.max(until)));
        }

        debug!(
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                source = %source,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - source may be under heavy load"
            );
        }
    }

    /// Returns the cumulative delay imposed on a source so far.
    #[must_use]
    pub fn cumulative_delay(&self, source: SourceId) -> Duration {
        self.sources.get(&source).map_or(Duration::ZERO, |state| {
            Duration::from_millis(state.cumulative_delay_ms.load(Ordering::SeqCst))
        })
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use papernet_core::fetch::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        if let Ok(duration) = datetime.duration_since(now) {
            Some(duration.min(MAX_RETRY_AFTER))
        } else {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}
