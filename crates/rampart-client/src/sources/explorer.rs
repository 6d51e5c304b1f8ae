//! Block-explorer client (Etherscan-style `module`/`action` API).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::{RequestSpec, ResilientClient};
use crate::config::{ApiKeyPlacement, ClientConfig};
use crate::error::{CallError, CallResult};

use super::lenient_f64;

/// On-chain facts about one contract address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub address: String,
    /// Source code is published and verified.
    pub verified: bool,
    pub contract_name: Option<String>,
    pub compiler_version: Option<String>,
    pub is_proxy: bool,
    pub implementation: Option<String>,
    /// Timestamp of the first transaction touching the contract.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ExplorerClient {
    client: ResilientClient,
}

impl ExplorerClient {
    pub fn new(config: ClientConfig) -> CallResult<Self> {
        let mut config = config;
        if config.api_key.is_some() {
            config.api_key_placement = ApiKeyPlacement::Query;
        }
        Ok(Self {
            client: ResilientClient::new("explorer", config)?,
        })
    }

    pub fn inner(&self) -> &ResilientClient {
        &self.client
    }

    /// Verification status, proxy info and creation time for `address`.
    pub async fn contract_info(&self, address: &str) -> CallResult<ContractInfo> {
        let address = address.to_ascii_lowercase();

        let source = self
            .call(
                RequestSpec::get()
                    .query("module", "contract")
                    .query("action", "getsourcecode")
                    .query("address", address.as_str()),
                &format!("explorer:source:{}", address),
            )
            .await?;
        let first = source
            .as_array()
            .and_then(|items| items.first())
            .cloned()
            .unwrap_or(Value::Null);

        let text = |field: &str| {
            first
                .get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let verified = text("SourceCode").is_some();
        let is_proxy = text("Proxy").as_deref() == Some("1");

        let created_at = self.first_transaction_time(&address).await?;
        debug!(address = %address, verified, is_proxy, "fetched contract info");

        Ok(ContractInfo {
            verified,
            contract_name: text("ContractName"),
            compiler_version: text("CompilerVersion"),
            is_proxy,
            implementation: text("Implementation"),
            created_at,
            address,
        })
    }

    async fn first_transaction_time(&self, address: &str) -> CallResult<Option<DateTime<Utc>>> {
        let txs = self
            .call(
                RequestSpec::get()
                    .query("module", "account")
                    .query("action", "txlist")
                    .query("address", address)
                    .query("page", "1")
                    .query("offset", "1")
                    .query("sort", "asc"),
                &format!("explorer:first-tx:{}", address),
            )
            .await?;

        Ok(txs
            .as_array()
            .and_then(|items| items.first())
            .and_then(|tx| tx.get("timeStamp"))
            .and_then(lenient_f64)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0)))
    }

    /// Unwrap the `{status, message, result}` envelope.
    async fn call(&self, spec: RequestSpec, cache_key: &str) -> CallResult<Value> {
        let response = self.client.execute("", spec, Some(cache_key)).await?;
        let mut body = response.data;

        let failed = body.get("status").and_then(Value::as_str) == Some("0");
        let result = body.get_mut("result").map(Value::take).unwrap_or(Value::Null);

        // Explorers answer "0" with an empty result for addresses without
        // history; only a string result signals an actual error.
        if failed {
            if let Value::String(message) = &result {
                return Err(CallError::Decode {
                    endpoint: "explorer".to_string(),
                    message: message.clone(),
                });
            }
        }
        Ok(result)
    }
}
