use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use super::{AnalysisInput, Analyzer, AnalyzerOutput};
use crate::model::{Finding, FindingCategory, ScoreCategory, Severity};

const SOURCE: &str = "governance-analyzer";
const BASE_SCORE: f64 = 40.0;

/// Admin control surface: upgradeability and how much of it is verifiable.
#[derive(Debug, Default)]
pub struct GovernanceAnalyzer;

#[async_trait]
impl Analyzer for GovernanceAnalyzer {
    fn category(&self) -> ScoreCategory {
        ScoreCategory::Governance
    }

    fn name(&self) -> &str {
        SOURCE
    }

    async fn analyze(&self, input: &AnalysisInput) -> anyhow::Result<AnalyzerOutput> {
        let mut score = BASE_SCORE;
        let mut findings = Vec::new();

        let upgradeable: Vec<&str> = input
            .contracts
            .iter()
            .filter(|c| c.is_proxy)
            .map(|c| c.address.as_str())
            .collect();
        if !upgradeable.is_empty() {
            score += 20.0;
            findings.push(
                Finding::new(
                    FindingCategory::Governance,
                    Severity::High,
                    "Admin-controlled upgrades",
                    SOURCE,
                )
                .with_description(format!(
                    "{} contract(s) can have their logic replaced by an admin",
                    upgradeable.len()
                ))
                .with_recommendation("Require a timelock and multisig on upgrade authority")
                .with_confidence(75)
                .with_metadata("addresses", json!(upgradeable)),
            );
        }

        if input.contracts.iter().any(|c| !c.verified) {
            score += 10.0;
            findings.push(
                Finding::new(
                    FindingCategory::Governance,
                    Severity::Medium,
                    "Governance logic not verifiable",
                    SOURCE,
                )
                .with_description("Unverified contracts hide who holds privileged roles")
                .with_confidence(70),
            );
        }

        if input.protocol_data.is_none() {
            score += 10.0;
            findings.push(
                Finding::new(
                    FindingCategory::Governance,
                    Severity::Medium,
                    "No governance information available",
                    SOURCE,
                )
                .with_description("The protocol is not listed with any data provider")
                .with_recommendation("Look up the protocol's governance process before depositing")
                .with_confidence(50),
            );
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("upgradeable_contracts".into(), json!(upgradeable.len()));

        Ok(AnalyzerOutput {
            score,
            findings,
            metadata,
        })
    }
}
