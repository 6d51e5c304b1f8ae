//! Error types for outbound calls.

use std::time::Duration;

/// Errors raised by [`crate::ResilientClient`] and the clients built on it.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Upstream answered with a non-success status.
    #[error("HTTP {status} from {endpoint}: {message}")]
    Http {
        status: u16,
        endpoint: String,
        message: String,
    },

    /// Upstream answered 429.
    #[error("rate limited by {endpoint}: retry after {retry_after:?}")]
    RateLimited {
        endpoint: String,
        retry_after: Option<Duration>,
    },

    /// A single attempt exceeded the per-attempt timeout.
    #[error("request to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    /// Transport failure (connect, TLS, body read).
    #[error("network error: {message}")]
    Network { message: String },

    /// The circuit breaker rejected the call without touching the network.
    #[error("circuit breaker open for {endpoint}: next trial in {retry_in:?}")]
    BreakerOpen {
        endpoint: String,
        retry_in: Duration,
    },

    /// Every attempt failed with a retryable error.
    #[error("giving up on {endpoint} after {attempts} attempts: {last}")]
    RetriesExhausted {
        endpoint: String,
        attempts: u32,
        last: Box<CallError>,
    },

    /// Response body could not be decoded.
    #[error("invalid response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// Client configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl CallError {
    /// Whether another attempt may succeed.
    ///
    /// 5xx, 408, 429, timeouts and transport failures are retryable. Other
    /// 4xx responses and breaker rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500 || *status == 408,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Network { .. } => true,
            Self::RetriesExhausted { .. }
            | Self::BreakerOpen { .. }
            | Self::Decode { .. }
            | Self::Config { .. } => false,
        }
    }

    /// HTTP status, when the error came from an upstream response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Http { .. } => "HTTP_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Network { .. } => "NETWORK_ERROR",
            Self::BreakerOpen { .. } => "BREAKER_OPEN",
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            Self::Decode { .. } => "DECODE_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
        }
    }

    /// True for errors that count against the circuit breaker.
    ///
    /// A 4xx or an undecodable body still proves the upstream is answering;
    /// only the retryable class (and its exhaustion) signals degradation.
    pub(crate) fn indicates_upstream_fault(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } => true,
            other => other.is_retryable(),
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for outbound calls.
pub type CallResult<T> = Result<T, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> CallError {
        CallError::Http {
            status,
            endpoint: "/x".into(),
            message: String::new(),
        }
    }

    #[test]
    fn test_retry_classification() {
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(http(408).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(CallError::Timeout {
            endpoint: "/x".into(),
            timeout: Duration::from_millis(5)
        }
        .is_retryable());
        assert!(!CallError::BreakerOpen {
            endpoint: "/x".into(),
            retry_in: Duration::ZERO
        }
        .is_retryable());
    }

    #[test]
    fn test_exhausted_reports_last_status() {
        let err = CallError::RetriesExhausted {
            endpoint: "/x".into(),
            attempts: 3,
            last: Box::new(http(502)),
        };
        assert_eq!(err.status(), Some(502));
        assert_eq!(err.code(), "RETRIES_EXHAUSTED");
        assert!(!err.is_retryable());
    }
}
