//! Data-collection seams and the two collection stages.
//!
//! Both stages are fault tolerant: a failing lookup becomes a warning and
//! "no data", and the stage carries on with what it has.

use async_trait::async_trait;
use rampart_client::{
    ContractInfo, ExplorerClient, MarketClient, MarketOverview, ProtocolData, ProtocolDataClient,
};
use tracing::{debug, warn};

use crate::model::Protocol;

/// On-chain metadata per contract address.
#[async_trait]
pub trait ChainDataSource: Send + Sync {
    async fn contract_info(&self, address: &str) -> anyhow::Result<ContractInfo>;
}

/// Off-chain protocol listings and market-wide data.
#[async_trait]
pub trait ProtocolDataSource: Send + Sync {
    async fn protocol_by_name(&self, name: &str) -> anyhow::Result<Option<ProtocolData>>;

    async fn protocol_by_address(&self, address: &str) -> anyhow::Result<Option<ProtocolData>>;

    async fn market_overview(&self) -> anyhow::Result<MarketOverview>;
}

#[async_trait]
impl ChainDataSource for ExplorerClient {
    async fn contract_info(&self, address: &str) -> anyhow::Result<ContractInfo> {
        Ok(ExplorerClient::contract_info(self, address).await?)
    }
}

/// [`ProtocolDataSource`] over the protocol-listing and market clients.
#[derive(Debug)]
pub struct OffchainClients {
    pub protocols: ProtocolDataClient,
    pub market: MarketClient,
}

#[async_trait]
impl ProtocolDataSource for OffchainClients {
    async fn protocol_by_name(&self, name: &str) -> anyhow::Result<Option<ProtocolData>> {
        Ok(self.protocols.protocol_by_name(name).await?)
    }

    async fn protocol_by_address(&self, address: &str) -> anyhow::Result<Option<ProtocolData>> {
        Ok(self.protocols.protocol_by_address(address).await?)
    }

    async fn market_overview(&self) -> anyhow::Result<MarketOverview> {
        Ok(self.market.overview().await?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainData {
    pub contracts: Vec<ContractInfo>,
    /// `(address, error)` per failed lookup.
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct OffchainData {
    pub protocol: Option<ProtocolData>,
    pub market: Option<MarketOverview>,
    pub warnings: Vec<String>,
}

/// Look up each address in turn; one failure does not stop the rest.
pub async fn collect_chain_data(source: &dyn ChainDataSource, addresses: &[String]) -> ChainData {
    let mut data = ChainData::default();
    for address in addresses {
        match source.contract_info(address).await {
            Ok(info) => data.contracts.push(info),
            Err(e) => {
                warn!(address = %address, error = %format!("{:#}", e), "contract lookup failed");
                data.failures.push((address.clone(), format!("{:#}", e)));
            }
        }
    }
    debug!(
        found = data.contracts.len(),
        failed = data.failures.len(),
        "blockchain data collected"
    );
    data
}

/// Protocol listing by name, then by each address; then the market overview.
pub async fn collect_offchain_data(source: &dyn ProtocolDataSource, protocol: &Protocol) -> OffchainData {
    let mut data = OffchainData::default();

    match source.protocol_by_name(&protocol.name).await {
        Ok(found) => data.protocol = found,
        Err(e) => data
            .warnings
            .push(format!("protocol lookup by name failed: {:#}", e)),
    }

    if data.protocol.is_none() {
        for address in &protocol.contract_addresses {
            match source.protocol_by_address(address).await {
                Ok(Some(found)) => {
                    data.protocol = Some(found);
                    break;
                }
                Ok(None) => {}
                Err(e) => data
                    .warnings
                    .push(format!("protocol lookup for {} failed: {:#}", address, e)),
            }
        }
    }

    match source.market_overview().await {
        Ok(overview) => data.market = Some(overview),
        Err(e) => data
            .warnings
            .push(format!("market overview unavailable: {:#}", e)),
    }

    for warning in &data.warnings {
        warn!(protocol = %protocol.name, "{}", warning);
    }
    data
}
