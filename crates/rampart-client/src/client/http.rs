//! HTTP layer: per-attempt timeout, status mapping, retry with backoff.
//!
//! This is the ONLY place that interprets status codes.

use std::time::Duration;

use rand::Rng;
use reqwest::header::AUTHORIZATION;
use tracing::{debug, warn};

use crate::config::{ApiKeyPlacement, ClientConfig};
use crate::error::{CallError, CallResult};

use super::RequestSpec;

/// Body and status of a successful attempt.
#[derive(Debug)]
pub(crate) struct HttpSuccess {
    pub status: u16,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) config: ClientConfig,
}

impl HttpBackend {
    pub(crate) fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        if endpoint.is_empty() {
            return self.base_url.clone();
        }
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Delay before attempt `attempt + 1`: `initial * multiplier^(attempt-1)`, ±25%.
    pub(crate) fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_ms = self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(exp);
        let jitter: f64 = rand::thread_rng().gen_range(0.75_f64..=1.25_f64);
        Duration::from_millis((base_ms * jitter).round().max(0.0) as u64)
    }

    /// Run up to `max_attempts` tries. Non-retryable errors return at once;
    /// running out of attempts wraps the last error in `RetriesExhausted`.
    pub(crate) async fn request(
        &self,
        endpoint: &str,
        spec: &RequestSpec,
    ) -> CallResult<HttpSuccess> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self.request_once(endpoint, spec).await;

            match result {
                Ok(success) => return Ok(success),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = match &e {
                        CallError::RateLimited {
                            retry_after: Some(retry_after),
                            ..
                        } => (*retry_after).min(Duration::from_secs(30)),
                        _ => self.backoff_for(attempt),
                    };

                    warn!(
                        endpoint,
                        error = %e,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying request"
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(CallError::RetriesExhausted {
                        endpoint: endpoint.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(&self, endpoint: &str, spec: &RequestSpec) -> CallResult<HttpSuccess> {
        let url = self.url_for(endpoint);
        let mut request = self.client.request(spec.method.clone(), &url);

        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &spec.body {
            request = request.json(body);
        }
        if let Some(key) = &self.config.api_key {
            request = match self.config.api_key_placement {
                ApiKeyPlacement::Header => request.header("x-api-key", key.as_str()),
                ApiKeyPlacement::Query => request.query(&[("apikey", key.as_str())]),
                ApiKeyPlacement::Bearer => request.header(AUTHORIZATION, format!("Bearer {}", key)),
            };
        }

        let timeout = spec.timeout.unwrap_or_else(|| self.config.timeout());
        debug!(url = %url, method = %spec.method, "sending request");

        // The timeout covers the whole attempt, body included; dropping the
        // future aborts the in-flight request.
        match tokio::time::timeout(timeout, Self::send(request, endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Timeout {
                endpoint: endpoint.to_string(),
                timeout,
            }),
        }
    }

    async fn send(request: reqwest::RequestBuilder, endpoint: &str) -> CallResult<HttpSuccess> {
        let response = request.send().await?;
        let status = response.status().as_u16();

        match status {
            200..=299 => {
                let bytes = response.bytes().await?;
                let data = if bytes.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::from_slice(&bytes).map_err(|e| CallError::Decode {
                        endpoint: endpoint.to_string(),
                        message: e.to_string(),
                    })?
                };
                Ok(HttpSuccess { status, data })
            }

            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);

                Err(CallError::RateLimited {
                    endpoint: endpoint.to_string(),
                    retry_after,
                })
            }

            _ => {
                let message = response
                    .text()
                    .await
                    .map(|t| t.chars().take(200).collect::<String>())
                    .unwrap_or_default();
                Err(CallError::Http {
                    status,
                    endpoint: endpoint.to_string(),
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(initial_delay_ms: u64, multiplier: f64) -> HttpBackend {
        HttpBackend {
            client: reqwest::Client::new(),
            base_url: "https://api.example.com/v1".into(),
            config: ClientConfig::new("https://api.example.com/v1").with_retry(
                5,
                initial_delay_ms,
                multiplier,
            ),
        }
    }

    #[test]
    fn test_backoff_grows_within_jitter_band() {
        let b = backend(100, 2.0);
        for (attempt, base) in [(1u32, 100.0), (2, 200.0), (3, 400.0)] {
            for _ in 0..20 {
                let ms = b.backoff_for(attempt).as_millis() as f64;
                assert!(ms >= base * 0.75 - 1.0 && ms <= base * 1.25 + 1.0, "{ms} vs {base}");
            }
        }
    }

    #[test]
    fn test_url_joining() {
        let b = backend(1, 1.0);
        assert_eq!(b.url_for("/protocol/aave"), "https://api.example.com/v1/protocol/aave");
        assert_eq!(b.url_for("protocols"), "https://api.example.com/v1/protocols");
        assert_eq!(b.url_for(""), "https://api.example.com/v1");
        assert_eq!(b.url_for("https://other.example.com/x"), "https://other.example.com/x");
    }
}
