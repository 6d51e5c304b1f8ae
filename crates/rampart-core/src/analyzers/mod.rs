//! Category analyzers and the guarded fan-out that runs them.
//!
//! An [`Analyzer`] may fail or even panic; [`run_all`] turns every such
//! failure into [`AnalyzerOutcome::Degraded`] carrying the configured default
//! score, so a single analyzer can never fail an assessment.

mod governance;
mod liquidity;
mod reputation;
mod technical;
pub mod tool;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use rampart_client::{ContractInfo, MarketOverview, ProtocolData};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::AnalyzerDefaults;
use crate::model::{AnalysisDepth, Finding, Protocol, ProtocolMetadata, ScoreCategory};

pub use governance::GovernanceAnalyzer;
pub use liquidity::LiquidityAnalyzer;
pub use reputation::ReputationAnalyzer;
pub use technical::TechnicalAnalyzer;
pub use tool::{StaticAnalysisConfig, ToolRunner};

/// Everything collected for one assessment before analysis.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub assessment_id: String,
    pub protocol: Protocol,
    pub depth: AnalysisDepth,
    /// Reference time for age calculations.
    pub as_of: DateTime<Utc>,
    pub contracts: Vec<ContractInfo>,
    /// Addresses whose on-chain lookup failed.
    pub unavailable_contracts: Vec<String>,
    pub protocol_data: Option<ProtocolData>,
    pub market: Option<MarketOverview>,
}

impl AnalysisInput {
    /// Earliest known creation or listing time.
    pub fn launched_at(&self) -> Option<DateTime<Utc>> {
        self.contracts
            .iter()
            .filter_map(|c| c.created_at)
            .chain(self.protocol_data.as_ref().and_then(|p| p.listed_at))
            .min()
    }

    pub fn age_days(&self) -> Option<f64> {
        self.launched_at()
            .map(|t| (self.as_of - t).num_seconds().max(0) as f64 / 86_400.0)
    }

    pub fn tvl_usd(&self) -> Option<f64> {
        self.protocol_data.as_ref().and_then(|p| p.tvl_usd)
    }

    pub fn audit_count(&self) -> Option<u32> {
        self.protocol_data.as_ref().and_then(|p| p.audit_count)
    }

    /// Scoring-engine view of the protocol.
    pub fn protocol_metadata(&self) -> ProtocolMetadata {
        ProtocolMetadata {
            age_days: self.age_days(),
            tvl_usd: self.tvl_usd(),
            audit_count: self.audit_count(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzerOutput {
    /// 0-100, higher is riskier.
    pub score: f64,
    pub findings: Vec<Finding>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Result of one guarded analyzer invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerOutcome {
    Ok(AnalyzerOutput),
    /// The analyzer failed; `score` is the configured default.
    Degraded { score: f64, reason: String },
}

impl AnalyzerOutcome {
    pub fn score(&self) -> f64 {
        match self {
            Self::Ok(output) => output.score,
            Self::Degraded { score, .. } => *score,
        }
    }

    pub fn findings(&self) -> &[Finding] {
        match self {
            Self::Ok(output) => &output.findings,
            Self::Degraded { .. } => &[],
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// One risk dimension's analysis.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn category(&self) -> ScoreCategory;

    /// Producer id stamped on findings.
    fn name(&self) -> &str;

    async fn analyze(&self, input: &AnalysisInput) -> anyhow::Result<AnalyzerOutput>;
}

/// The four built-in analyzers; `tool` enables static analysis in the technical one.
pub fn default_analyzers(tool: Option<ToolRunner>) -> Vec<Arc<dyn Analyzer>> {
    vec![
        Arc::new(TechnicalAnalyzer::new(tool)),
        Arc::new(LiquidityAnalyzer),
        Arc::new(GovernanceAnalyzer),
        Arc::new(ReputationAnalyzer),
    ]
}

/// Run every analyzer concurrently and wait for all of them.
///
/// Output order follows `analyzers`, not completion order.
pub async fn run_all(
    analyzers: &[Arc<dyn Analyzer>],
    input: Arc<AnalysisInput>,
    defaults: &AnalyzerDefaults,
) -> Vec<(ScoreCategory, AnalyzerOutcome)> {
    let mut join_set = JoinSet::new();
    for (index, analyzer) in analyzers.iter().enumerate() {
        let analyzer = Arc::clone(analyzer);
        let input = Arc::clone(&input);
        join_set.spawn(async move {
            let result = AssertUnwindSafe(analyzer.analyze(&input))
                .catch_unwind()
                .await;
            (index, result)
        });
    }

    let mut settled: Vec<Option<AnalyzerOutcome>> = vec![None; analyzers.len()];
    while let Some(joined) = join_set.join_next().await {
        let (index, result) = match joined {
            Ok(pair) => pair,
            // Aborted by runtime shutdown; filled with a default below.
            Err(e) => {
                debug!(error = %e, "analyzer task did not complete");
                continue;
            }
        };
        let category = analyzers[index].category();
        let outcome = match result {
            Ok(Ok(mut output)) => {
                output.score = output.score.clamp(0.0, 100.0);
                AnalyzerOutcome::Ok(output)
            }
            Ok(Err(e)) => degraded(category, defaults, format!("{:#}", e)),
            Err(panic) => degraded(category, defaults, panic_message(panic.as_ref())),
        };
        settled[index] = Some(outcome);
    }

    analyzers
        .iter()
        .zip(settled)
        .map(|(analyzer, outcome)| {
            let category = analyzer.category();
            let outcome = outcome.unwrap_or_else(|| {
                degraded(category, defaults, "analyzer task was aborted".to_string())
            });
            (category, outcome)
        })
        .collect()
}

fn degraded(category: ScoreCategory, defaults: &AnalyzerDefaults, reason: String) -> AnalyzerOutcome {
    let score = defaults.score_for(category);
    warn!(analyzer = %category, default_score = score, reason = %reason, "analyzer degraded");
    AnalyzerOutcome::Degraded { score, reason }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("analyzer panicked: {}", detail)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn contract(address: &str) -> ContractInfo {
        ContractInfo {
            address: address.to_string(),
            verified: true,
            contract_name: Some("Pool".into()),
            compiler_version: Some("v0.8.20".into()),
            is_proxy: false,
            implementation: None,
            created_at: None,
        }
    }

    pub(crate) fn protocol_data(tvl: Option<f64>, audits: Option<u32>) -> ProtocolData {
        ProtocolData {
            name: "Example".into(),
            slug: Some("example".into()),
            category: Some("Dexes".into()),
            tvl_usd: tvl,
            chains: vec!["Ethereum".into(), "Arbitrum".into()],
            audit_count: audits,
            listed_at: None,
            url: None,
            address: None,
        }
    }

    pub(crate) fn input() -> AnalysisInput {
        let now = Utc::now();
        AnalysisInput {
            assessment_id: "a1".into(),
            protocol: Protocol {
                id: "p1".into(),
                name: "Example".into(),
                contract_addresses: vec!["0x00000000000000000000000000000000000000aa".into()],
                chain: "ethereum".into(),
                website: None,
                category: None,
                created_at: now,
                updated_at: now,
            },
            depth: AnalysisDepth::Standard,
            as_of: now,
            contracts: Vec::new(),
            unavailable_contracts: Vec::new(),
            protocol_data: None,
            market: None,
        }
    }
}
