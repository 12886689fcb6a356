// Client-wide defaults, loadable from TOML and FLOWFETCH_* environment variables

use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use flowfetch_parse::{OverflowPolicy, DEFAULT_DONE_MARKER, DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::retry::{Backoff, RetryOn, RetryPolicy};

const DEFAULT_USER_AGENT: &str = concat!("flowfetch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Attempts after the first
    pub retries: u32,
    /// Per-attempt timeout covering headers and body; 0 disables it
    pub timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_base: f64,
    /// Fraction of each delay that may be randomly shaved off, in `[0, 1]`
    pub jitter: f64,
    pub respect_retry_after: bool,
    /// Largest frame (or JSON value) a stream may buffer
    pub max_buffer: usize,
    pub initial_buffer: usize,
    /// Fail the stream on the first malformed payload instead of skipping it
    pub strict_json: bool,
    pub on_buffer_overflow: OverflowPolicy,
    pub done_marker: Option<String>,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout_ms: 30_000,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_base: 2.0,
            jitter: 0.2,
            respect_retry_after: true,
            max_buffer: DEFAULT_MAX_CAPACITY,
            initial_buffer: DEFAULT_INITIAL_CAPACITY,
            strict_json: false,
            on_buffer_overflow: OverflowPolicy::Error,
            done_marker: Some(DEFAULT_DONE_MARKER.to_string()),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. built-in defaults
    /// 2. config/flowfetch.toml (optional)
    /// 3. FLOWFETCH_* environment variables, e.g. `FLOWFETCH_TIMEOUT_MS=5000`
    pub fn load() -> Result<Self> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/flowfetch").required(false))
            .add_source(Environment::with_prefix("FLOWFETCH").try_parsing(true))
            .build()?;

        let cfg: ClientConfig = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load config from a specific file, without environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = ConfigLoader::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;

        let cfg: ClientConfig = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(invalid(format!("jitter must be within [0, 1], got {}", self.jitter)));
        }
        if !self.backoff_base.is_finite() || self.backoff_base < 1.0 {
            return Err(invalid(format!("backoff_base must be >= 1, got {}", self.backoff_base)));
        }
        if self.max_buffer == 0 {
            return Err(invalid("max_buffer must be positive".to_string()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(invalid(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::Exponential {
            initial: Duration::from_millis(self.initial_backoff_ms),
            max: Duration::from_millis(self.max_backoff_ms),
            base: self.backoff_base,
            jitter: self.jitter,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff: self.backoff(),
            retry_on: RetryOn::Default,
            respect_retry_after: self.respect_retry_after,
        }
    }
}

fn invalid(message: String) -> crate::FetchError {
    ConfigError::Message(message).into()
}
