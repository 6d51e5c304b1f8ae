//! Market-wide data client (historical total-TVL series).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{RequestSpec, ResilientClient};
use crate::config::ClientConfig;
use crate::error::{CallError, CallResult};

use super::lenient_f64;

const OVERVIEW_ENDPOINT: &str = "v2/historicalChainTvl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOverview {
    pub total_tvl_usd: f64,
    /// Change between the last two data points, in percent.
    pub tvl_change_24h_pct: Option<f64>,
    pub as_of: Option<DateTime<Utc>>,
}

impl MarketOverview {
    fn from_series(series: &[Value]) -> Option<Self> {
        let points: Vec<(Option<f64>, f64)> = series
            .iter()
            .filter_map(|p| {
                let tvl = p.get("tvl").and_then(lenient_f64)?;
                Some((p.get("date").and_then(lenient_f64), tvl))
            })
            .collect();

        let (date, total) = *points.last()?;
        let change = points
            .len()
            .checked_sub(2)
            .and_then(|i| points.get(i))
            .filter(|(_, prev)| *prev > 0.0)
            .map(|(_, prev)| (total - prev) / prev * 100.0);

        Some(Self {
            total_tvl_usd: total,
            tvl_change_24h_pct: change,
            as_of: date.and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0)),
        })
    }
}

#[derive(Debug)]
pub struct MarketClient {
    client: ResilientClient,
}

impl MarketClient {
    pub fn new(config: ClientConfig) -> CallResult<Self> {
        Ok(Self {
            client: ResilientClient::new("market", config)?,
        })
    }

    pub fn inner(&self) -> &ResilientClient {
        &self.client
    }

    pub async fn overview(&self) -> CallResult<MarketOverview> {
        let response = self
            .client
            .execute(OVERVIEW_ENDPOINT, RequestSpec::get(), Some("market:overview"))
            .await?;

        response
            .data
            .as_array()
            .and_then(|series| MarketOverview::from_series(series))
            .ok_or_else(|| CallError::Decode {
                endpoint: OVERVIEW_ENDPOINT.to_string(),
                message: "expected a non-empty [{date, tvl}] series".to_string(),
            })
    }
}
