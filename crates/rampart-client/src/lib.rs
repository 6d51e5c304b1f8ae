//! Resilient external-call layer for DeFi data sources.
//!
//! Every outbound request goes through a [`ResilientClient`], which applies,
//! in order:
//!
//! - a two-tier response cache (in-process map mirrored to disk)
//! - a three-state circuit breaker
//! - a token-bucket rate limiter
//! - retry with exponential backoff and ±25% jitter, with a per-attempt timeout
//!
//! # Quick Start
//!
//! ```no_run
//! use rampart_client::{ClientConfig, RequestSpec, ResilientClient};
//!
//! # async fn example() -> Result<(), rampart_client::CallError> {
//! let client = ResilientClient::new(
//!     "protocol-data",
//!     ClientConfig::new("https://api.llama.fi").with_rate_limit(2.0, 5),
//! )?;
//!
//! let response = client
//!     .execute("protocols", RequestSpec::get(), Some("protocols:all"))
//!     .await?;
//! println!("cached={} status={}", response.cached, response.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `{PREFIX}_BASE_URL` | Upstream base URL |
//! | `{PREFIX}_API_KEY` | API key |
//! | `{PREFIX}_TIMEOUT_MS` | Per-attempt timeout (default: 10000) |
//! | `{PREFIX}_MAX_ATTEMPTS` | Tries per call (default: 3) |
//! | `{PREFIX}_REQUESTS_PER_SECOND` | Token refill rate (default: 5) |

pub mod breaker;
pub mod cache;
pub mod client;
pub mod config;
mod digest;
pub mod error;
pub mod rate_limit;
pub mod sources;

// Re-export main types
pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use cache::{CacheEntry, ResponseCache};
pub use client::{ApiResponse, RequestSpec, ResilientClient};
pub use config::{ApiKeyPlacement, ClientConfig};
pub use error::{CallError, CallResult};
pub use rate_limit::RateLimiter;
pub use sources::{
    ContractInfo, ExplorerClient, MarketClient, MarketOverview, ProtocolData, ProtocolDataClient,
};
