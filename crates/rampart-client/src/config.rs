//! Per-client configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CallError, CallResult};

/// Where the API key is attached to outgoing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyPlacement {
    /// `x-api-key` header.
    #[default]
    Header,
    /// `apikey` query parameter (block-explorer style).
    Query,
    /// `Authorization: Bearer ...`.
    Bearer,
}

/// Configuration for one [`crate::ResilientClient`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL every logical endpoint is joined onto.
    pub base_url: String,

    /// API key, if the upstream wants one.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub api_key_placement: ApiKeyPlacement,

    /// Steady-state token refill rate.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Token bucket capacity.
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Tries per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Delay before the second attempt.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Per-attempt timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Failures before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Failure-counting window: a failure arriving more than this long after
    /// the previous one starts a fresh count.
    #[serde(default = "default_breaker_timeout_ms")]
    pub breaker_timeout_ms: u64,

    /// How long the breaker stays open before admitting a trial call.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// In-process entries kept before FIFO eviction.
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: usize,

    /// Disk mirror directory. `None` uses the platform cache dir.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_requests_per_second() -> f64 {
    5.0
}

fn default_burst_size() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout_ms() -> u64 {
    60_000
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_cache_max_size() -> usize {
    1000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost")
    }
}

impl ClientConfig {
    /// Defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            api_key_placement: ApiKeyPlacement::default(),
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
            max_attempts: default_max_attempts(),
            backoff_multiplier: default_backoff_multiplier(),
            initial_delay_ms: default_initial_delay_ms(),
            timeout_ms: default_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            breaker_timeout_ms: default_breaker_timeout_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
            cache_enabled: true,
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_max_size: default_cache_max_size(),
            cache_dir: None,
        }
    }

    /// Create config from environment variables, falling back to `defaults`.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `{PREFIX}_BASE_URL` | Base URL |
    /// | `{PREFIX}_API_KEY` | API key |
    /// | `{PREFIX}_TIMEOUT_MS` | Per-attempt timeout |
    /// | `{PREFIX}_MAX_ATTEMPTS` | Tries per call |
    /// | `{PREFIX}_REQUESTS_PER_SECOND` | Token refill rate |
    pub fn from_env(prefix: &str, defaults: ClientConfig) -> Self {
        let var = |name: &str| std::env::var(format!("{}_{}", prefix, name)).ok();

        Self {
            base_url: var("BASE_URL").unwrap_or(defaults.base_url),
            api_key: var("API_KEY")
                .filter(|k| !k.is_empty())
                .or(defaults.api_key),
            timeout_ms: var("TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_ms),
            max_attempts: var("MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            requests_per_second: var("REQUESTS_PER_SECOND")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.requests_per_second),
            ..defaults
        }
    }

    /// Reject settings the resilience policies cannot run with.
    pub fn validate(&self) -> CallResult<()> {
        let fail = |message: &str| {
            Err(CallError::Config {
                message: message.to_string(),
            })
        };

        if url::Url::parse(&self.base_url).is_err() {
            return fail("base_url is not a valid URL");
        }
        if self.requests_per_second.is_nan() || self.requests_per_second <= 0.0 {
            return fail("requests_per_second must be positive");
        }
        if self.burst_size == 0 {
            return fail("burst_size must be at least 1");
        }
        if self.max_attempts == 0 {
            return fail("max_attempts must be at least 1");
        }
        if self.backoff_multiplier < 1.0 {
            return fail("backoff_multiplier must be >= 1.0");
        }
        if self.failure_threshold == 0 {
            return fail("failure_threshold must be at least 1");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>, placement: ApiKeyPlacement) -> Self {
        self.api_key = Some(key.into());
        self.api_key_placement = placement;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: f64, burst_size: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self.burst_size = burst_size;
        self
    }

    pub fn with_retry(
        mut self,
        max_attempts: u32,
        initial_delay_ms: u64,
        backoff_multiplier: f64,
    ) -> Self {
        self.max_attempts = max_attempts;
        self.initial_delay_ms = initial_delay_ms;
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_breaker(mut self, failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        self.failure_threshold = failure_threshold;
        self.reset_timeout_ms = reset_timeout_ms;
        self
    }

    pub fn with_cache(mut self, enabled: bool, ttl_ms: u64, max_size: usize) -> Self {
        self.cache_enabled = enabled;
        self.cache_ttl_ms = ttl_ms;
        self.cache_max_size = max_size;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_validate() {
        ClientConfig::new("https://api.example.com").validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = ClientConfig::new("https://api.example.com").with_rate_limit(0.0, 1);
        assert!(matches!(cfg.validate(), Err(CallError::Config { .. })));

        let cfg = ClientConfig::new("https://api.example.com").with_retry(0, 10, 2.0);
        assert!(cfg.validate().is_err());

        let cfg = ClientConfig::new("not a url");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_yaml_like_json() {
        let cfg: ClientConfig = serde_json::from_str(
            r#"{"base_url": "https://api.llama.fi", "requests_per_second": 2.5}"#,
        )
        .unwrap();
        assert_eq!(cfg.requests_per_second, 2.5);
        assert_eq!(cfg.max_attempts, 3);
        assert!(cfg.cache_enabled);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("RAMPART_TEST_BASE_URL", "https://env.example.com");
        std::env::set_var("RAMPART_TEST_MAX_ATTEMPTS", "7");
        std::env::set_var("RAMPART_TEST_API_KEY", "");

        let cfg = ClientConfig::from_env(
            "RAMPART_TEST",
            ClientConfig::new("https://default.example.com"),
        );
        assert_eq!(cfg.base_url, "https://env.example.com");
        assert_eq!(cfg.max_attempts, 7);
        assert!(cfg.api_key.is_none());

        std::env::remove_var("RAMPART_TEST_BASE_URL");
        std::env::remove_var("RAMPART_TEST_MAX_ATTEMPTS");
        std::env::remove_var("RAMPART_TEST_API_KEY");
    }
}
