//! Engine configuration: defaults, `key = value` file parsing and validation.
//!
//! The file format is a flat list of `key = value` lines. Blank lines and
//! lines starting with `#` are ignored; values may be wrapped in double
//! quotes. Unknown keys are rejected so typos do not silently fall back to
//! defaults.
//!
//! ```text
//! sources = arxiv, semantic_scholar
//! contact_email = "lab@example.org"
//! max_generations = 2
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::engine::ExpansionLimits;
use crate::fetch::{
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_RETRIES, HttpTimeouts, RateLimiter, RetryPolicy,
    SourceCadence,
};
use crate::source::SourceId;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(32);
const CONFIG_DIR_NAME: &str = "papernet";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A line is not `key = value`.
    #[error("{}:{line}: expected `key = value`", .path.display())]
    Syntax {
        /// File path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
    },

    /// A key this engine does not know.
    #[error("Unknown configuration key '{key}' at line {line}")]
    UnknownKey {
        /// The key as written.
        key: String,
        /// 1-based line number.
        line: usize,
    },

    /// A value that cannot be parsed or is out of range.
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue {
        /// The key.
        key: String,
        /// What is wrong.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Cadence override for one source; unset halves fall back to the
/// source's published limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CadenceOverride {
    /// Calls allowed per window.
    pub calls: Option<u32>,
    /// Window length in milliseconds.
    pub window_ms: Option<u64>,
}

impl CadenceOverride {
    fn resolve(self, source: SourceId) -> Option<SourceCadence> {
        if self.calls.is_none() && self.window_ms.is_none() {
            return None;
        }
        let default = SourceCadence::default_for(source);
        let calls = self.calls.unwrap_or_else(|| default.max_calls());
        let window = self
            .window_ms
            .map_or_else(|| default.window(), Duration::from_millis);
        Some(SourceCadence::per_window(calls, window))
    }
}

/// Everything needed to build a [`CollectionEngine`](crate::engine::CollectionEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Sources to register, in query order.
    pub sources: Vec<SourceId>,
    /// Contact address sent to `PubMed` and in the user agent.
    pub contact_email: Option<String>,
    /// NCBI API key (raises the `PubMed` allowance).
    pub pubmed_api_key: Option<String>,
    /// Semantic Scholar API key.
    pub semantic_scholar_api_key: Option<String>,
    /// arXiv cadence override.
    pub arxiv_cadence: CadenceOverride,
    /// `PubMed` cadence override.
    pub pubmed_cadence: CadenceOverride,
    /// Semantic Scholar cadence override.
    pub semantic_scholar_cadence: CadenceOverride,
    /// Concurrent calls per source.
    pub max_in_flight_per_source: usize,
    /// Attempts per call, the first included.
    pub max_retries: u32,
    /// First retry delay.
    pub retry_base_delay_ms: u64,
    /// TCP connect timeout for source clients.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout for source clients.
    pub read_timeout_secs: u64,
    /// Default bounds for author sessions.
    pub limits: ExpansionLimits,
    /// SQLite file to persist into, if any.
    pub database: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sources: SourceId::ALL.to_vec(),
            contact_email: None,
            pubmed_api_key: None,
            semantic_scholar_api_key: None,
            arxiv_cadence: CadenceOverride::default(),
            pubmed_cadence: CadenceOverride::default(),
            semantic_scholar_cadence: CadenceOverride::default(),
            max_in_flight_per_source: DEFAULT_MAX_IN_FLIGHT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            limits: ExpansionLimits::default(),
            database: None,
        }
    }
}

impl EngineConfig {
    /// Cadences that differ from the published defaults.
    #[must_use]
    pub fn cadences(&self) -> Vec<(SourceId, SourceCadence)> {
        [
            (SourceId::Arxiv, self.arxiv_cadence),
            (SourceId::PubMed, self.pubmed_cadence),
            (SourceId::SemanticScholar, self.semantic_scholar_cadence),
        ]
        .into_iter()
        .filter_map(|(source, cadence)| cadence.resolve(source).map(|c| (source, c)))
        .collect()
    }

    /// Builds the rate limiter for this configuration.
    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.cadences(), self.max_in_flight_per_source)
    }

    /// Builds the retry policy for this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
            MAX_RETRY_DELAY,
            2.0,
        )
    }

    /// Client timeouts for the source adapters.
    #[must_use]
    pub fn http_timeouts(&self) -> HttpTimeouts {
        HttpTimeouts::from_secs(self.connect_timeout_secs, self.read_timeout_secs)
    }

    /// Parses `key = value` text on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for malformed lines, unknown keys or invalid values.
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Syntax {
                    path: path.to_path_buf(),
                    line: index + 1,
                });
            };
            let key = key.trim();
            let value = unquote(value.trim());
            config.set(key, value, index + 1)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`EngineConfig::parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an empty source list or zero limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::invalid("sources", "at least one source is required"));
        }
        if self.max_in_flight_per_source == 0 {
            return Err(ConfigError::invalid("max_in_flight_per_source", "must be at least 1"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("max_retries", "must be at least 1"));
        }
        self.limits
            .validate()
            .map_err(|error| ConfigError::invalid("limits", error.to_string()))
    }

    fn set(&mut self, key: &str, value: &str, line: usize) -> Result<(), ConfigError> {
        match key {
            "sources" => {
                let mut sources = Vec::new();
                for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    let id = part
                        .parse::<SourceId>()
                        .map_err(|reason| ConfigError::invalid(key, reason))?;
                    if !sources.contains(&id) {
                        sources.push(id);
                    }
                }
                self.sources = sources;
            }
            "contact_email" => self.contact_email = non_empty(value),
            "pubmed_api_key" => self.pubmed_api_key = non_empty(value),
            "semantic_scholar_api_key" => self.semantic_scholar_api_key = non_empty(value),
            "arxiv_calls" => self.arxiv_cadence.calls = Some(parse_positive(key, value)?),
            "arxiv_window_ms" => self.arxiv_cadence.window_ms = Some(parse_positive(key, value)?),
            "pubmed_calls" => self.pubmed_cadence.calls = Some(parse_positive(key, value)?),
            "pubmed_window_ms" => self.pubmed_cadence.window_ms = Some(parse_positive(key, value)?),
            "semantic_scholar_calls" => {
                self.semantic_scholar_cadence.calls = Some(parse_positive(key, value)?);
            }
            "semantic_scholar_window_ms" => {
                self.semantic_scholar_cadence.window_ms = Some(parse_positive(key, value)?);
            }
            "max_in_flight_per_source" => {
                self.max_in_flight_per_source = parse_positive(key, value)?;
            }
            "max_retries" => self.max_retries = parse_positive(key, value)?,
            "retry_base_delay_ms" => self.retry_base_delay_ms = parse_number(key, value)?,
            "connect_timeout_secs" => self.connect_timeout_secs = parse_positive(key, value)?,
            "read_timeout_secs" => self.read_timeout_secs = parse_positive(key, value)?,
            "max_papers_per_author" => {
                self.limits.max_papers_per_author = parse_positive(key, value)?;
            }
            "max_generations" => self.limits.max_generations = parse_positive(key, value)?,
            "max_total_papers" => self.limits.max_total_papers = parse_positive(key, value)?,
            "max_new_authors_per_generation" => {
                self.limits.max_new_authors_per_generation = parse_positive(key, value)?;
            }
            "max_authors" => self.limits.max_authors = parse_positive(key, value)?,
            "database" => self.database = non_empty(value).map(PathBuf::from),
            other => {
                return Err(ConfigError::UnknownKey {
                    key: other.to_string(),
                    line,
                });
            }
        }
        Ok(())
    }
}

/// A config resolved from the default location.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Where the file was looked for, if a location could be resolved.
    pub path: Option<PathBuf>,
    /// Effective configuration (defaults when no file exists).
    pub config: EngineConfig,
    /// Whether the file existed.
    pub loaded_from_file: bool,
}

/// `$XDG_CONFIG_HOME/papernet/config.toml`, falling back to
/// `$HOME/.config/papernet/config.toml`.
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME")
                .filter(|value| !value.is_empty())
                .map(|home| PathBuf::from(home).join(".config"))
        })?;
    Some(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Loads `explicit` if given, else the default path if it exists, else defaults.
///
/// # Errors
///
/// An explicit path must exist; any file that exists must parse.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    if let Some(path) = explicit {
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: EngineConfig::from_file(path)?,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    match &path {
        Some(candidate) if candidate.is_file() => {
            debug!(path = %candidate.display(), "loading config file");
            Ok(LoadedConfig {
                config: EngineConfig::from_file(candidate)?,
                path,
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            config: EngineConfig::default(),
            loaded_from_file: false,
        }),
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("'{value}' is not a valid number")))
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
{
    let parsed: T = parse_number(key, value)?;
    if parsed == T::default() {
        return Err(ConfigError::invalid(key, "must be at least 1"));
    }
    Ok(parsed)
}
