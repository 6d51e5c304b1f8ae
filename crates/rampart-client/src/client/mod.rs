//! Resilient call client.
//!
//! Public API: no status code knowledge. All HTTP/status mapping in http.rs.
//!
//! Every [`ResilientClient::execute`] runs its checks in a fixed order:
//!
//! 1. cache lookup (when a cache key is given and caching is enabled); a hit
//!    returns immediately with `cached = true`
//! 2. circuit-breaker admission
//! 3. rate-limiter admission (may suspend the caller)
//! 4. the retrying HTTP call

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::cache::ResponseCache;
use crate::config::ClientConfig;
use crate::error::{CallError, CallResult};
use crate::rate_limit::RateLimiter;

mod http;

use http::HttpBackend;

const USER_AGENT_VALUE: &str = concat!("rampart-client/", env!("CARGO_PKG_VERSION"));

/// Shape of one outbound request, minus the base URL.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: reqwest::Method,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Overrides the client's per-attempt timeout.
    pub timeout: Option<Duration>,
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self::get()
    }
}

impl RequestSpec {
    pub fn get() -> Self {
        Self {
            method: reqwest::Method::GET,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn post(body: serde_json::Value) -> Self {
        Self {
            method: reqwest::Method::POST,
            body: Some(body),
            ..Self::get()
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of [`ResilientClient::execute`].
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub data: serde_json::Value,
    pub status: u16,
    /// True when served from cache without a network call.
    pub cached: bool,
    /// When the payload was fetched from the upstream.
    pub timestamp: DateTime<Utc>,
}

impl ApiResponse {
    /// Decode the payload into a typed response.
    pub fn decode<T: DeserializeOwned>(self, endpoint: &str) -> CallResult<T> {
        serde_json::from_value(self.data).map_err(|e| CallError::Decode {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }
}

/// One upstream, with its own breaker, limiter, and cache.
#[derive(Debug)]
pub struct ResilientClient {
    name: String,
    http: HttpBackend,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    cache: Option<ResponseCache>,
}

impl ResilientClient {
    /// Build a client; `name` labels logs and namespaces the disk cache.
    pub fn new(name: impl Into<String>, config: ClientConfig) -> CallResult<Self> {
        config.validate()?;
        let name = name.into();

        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .build()
            .map_err(|e| CallError::Config {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        let breaker = CircuitBreaker::new(
            name.clone(),
            config.failure_threshold,
            Duration::from_millis(config.breaker_timeout_ms),
            Duration::from_millis(config.reset_timeout_ms),
        );
        let limiter = RateLimiter::new(config.requests_per_second, config.burst_size);
        let cache = config.cache_enabled.then(|| {
            let dir = config
                .cache_dir
                .as_ref()
                .map(|d| d.join(&name))
                .or_else(|| ResponseCache::default_dir(&name));
            ResponseCache::new(config.cache_max_size, config.cache_ttl(), dir)
        });

        let base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            name,
            http: HttpBackend {
                client,
                base_url,
                config,
            },
            breaker,
            limiter,
            cache,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.http.config
    }

    /// Execute one logical call with every resilience policy applied.
    pub async fn execute(
        &self,
        endpoint: &str,
        spec: RequestSpec,
        cache_key: Option<&str>,
    ) -> CallResult<ApiResponse> {
        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            if let Some(entry) = cache.get(key).await {
                return Ok(ApiResponse {
                    data: entry.data,
                    status: 200,
                    cached: true,
                    timestamp: entry.timestamp,
                });
            }
        }

        self.breaker.check(endpoint)?;
        self.limiter.acquire().await;

        debug!(client = %self.name, endpoint, "executing call");
        match self.http.request(endpoint, &spec).await {
            Ok(success) => {
                self.breaker.record_success();
                let timestamp = match (&self.cache, cache_key) {
                    (Some(cache), Some(key)) => cache.put(key, success.data.clone()).await.timestamp,
                    _ => Utc::now(),
                };
                Ok(ApiResponse {
                    data: success.data,
                    status: success.status,
                    cached: false,
                    timestamp,
                })
            }
            Err(e) => {
                if e.indicates_upstream_fault() {
                    self.breaker.record_failure();
                } else {
                    self.breaker.record_success();
                }
                Err(e)
            }
        }
    }

    /// `execute` followed by typed decoding.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        spec: RequestSpec,
        cache_key: Option<&str>,
    ) -> CallResult<T> {
        self.execute(endpoint, spec, cache_key)
            .await?
            .decode(endpoint)
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    pub fn limiter_tokens(&self) -> f64 {
        self.limiter.available()
    }

    pub async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
        }
    }
}
