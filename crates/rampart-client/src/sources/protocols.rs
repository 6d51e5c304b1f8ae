//! DeFi protocol-data client (DefiLlama-style `/protocols` listing).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::{RequestSpec, ResilientClient};
use crate::config::ClientConfig;
use crate::error::{CallError, CallResult};

use super::lenient_f64;

const PROTOCOLS_CACHE_KEY: &str = "protocols:all";

/// Off-chain facts about a protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolData {
    pub name: String,
    pub slug: Option<String>,
    pub category: Option<String>,
    pub tvl_usd: Option<f64>,
    pub chains: Vec<String>,
    pub audit_count: Option<u32>,
    pub listed_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub address: Option<String>,
}

impl ProtocolData {
    fn from_listing(item: &Value) -> Option<Self> {
        let text = |field: &str| {
            item.get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty() && *s != "-")
                .map(String::from)
        };

        let name = text("name")?;
        let chains = item
            .get("chains")
            .and_then(Value::as_array)
            .map(|cs| cs.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();

        Some(Self {
            name,
            slug: text("slug"),
            category: text("category"),
            tvl_usd: item.get("tvl").and_then(lenient_f64),
            chains,
            audit_count: item.get("audits").and_then(lenient_f64).map(|n| n as u32),
            listed_at: item
                .get("listedAt")
                .and_then(lenient_f64)
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0)),
            url: text("url"),
            address: text("address").map(|a| normalize_address(&a)),
        })
    }
}

/// Strip a `chain:` prefix and lowercase.
fn normalize_address(raw: &str) -> String {
    raw.rsplit(':').next().unwrap_or(raw).trim().to_ascii_lowercase()
}

#[derive(Debug)]
pub struct ProtocolDataClient {
    client: ResilientClient,
}

impl ProtocolDataClient {
    pub fn new(config: ClientConfig) -> CallResult<Self> {
        Ok(Self {
            client: ResilientClient::new("protocol-data", config)?,
        })
    }

    pub fn inner(&self) -> &ResilientClient {
        &self.client
    }

    /// Find a protocol by display name or slug (case-insensitive).
    pub async fn protocol_by_name(&self, name: &str) -> CallResult<Option<ProtocolData>> {
        let needle = name.trim().to_ascii_lowercase();
        let found = self
            .find(|p| {
                p.name.to_ascii_lowercase() == needle
                    || p.slug.as_deref().map(str::to_ascii_lowercase).as_deref()
                        == Some(needle.as_str())
            })
            .await?;
        debug!(name, found = found.is_some(), "protocol lookup by name");
        Ok(found)
    }

    /// Find the protocol whose listed contract address is `address`.
    pub async fn protocol_by_address(&self, address: &str) -> CallResult<Option<ProtocolData>> {
        let needle = normalize_address(address);
        let found = self
            .find(|p| p.address.as_deref() == Some(needle.as_str()))
            .await?;
        debug!(address, found = found.is_some(), "protocol lookup by address");
        Ok(found)
    }

    /// Every listed protocol, served from one cached `/protocols` call.
    pub async fn list(&self) -> CallResult<Vec<ProtocolData>> {
        let response = self
            .client
            .execute("protocols", RequestSpec::get(), Some(PROTOCOLS_CACHE_KEY))
            .await?;

        let items = response.data.as_array().ok_or_else(|| CallError::Decode {
            endpoint: "protocols".to_string(),
            message: "expected a JSON array".to_string(),
        })?;
        Ok(items.iter().filter_map(ProtocolData::from_listing).collect())
    }

    async fn find<F>(&self, predicate: F) -> CallResult<Option<ProtocolData>>
    where
        F: Fn(&ProtocolData) -> bool,
    {
        Ok(self.list().await?.into_iter().find(|p| predicate(p)))
    }
}
