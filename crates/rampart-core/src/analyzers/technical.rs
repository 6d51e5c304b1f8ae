//! TECHNICAL category analyzer.
//!
//! Starts from a base score of 35. Unverified sources and upgradeable
//! proxies add risk, as does a deployment younger than 30 days. When a
//! [`ToolRunner`] is configured and the depth is not basic, verified
//! contracts also go through static analysis and each tool finding adds
//! risk by severity. A tool failure fails the analyzer, which the
//! orchestrator then replaces with the default score.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{AnalysisInput, Analyzer, AnalyzerOutput, ToolRunner};
use crate::model::{AnalysisDepth, Finding, FindingCategory, ScoreCategory, Severity};

const SOURCE: &str = "technical-analyzer";
const BASE_SCORE: f64 = 35.0;

/// Contract verification, upgradeability and deployment age, plus optional
/// static analysis for non-basic depths.
#[derive(Debug, Default)]
pub struct TechnicalAnalyzer {
    tool: Option<ToolRunner>,
}

impl TechnicalAnalyzer {
    pub fn new(tool: Option<ToolRunner>) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl Analyzer for TechnicalAnalyzer {
    fn category(&self) -> ScoreCategory {
        ScoreCategory::Technical
    }

    fn name(&self) -> &str {
        SOURCE
    }

    async fn analyze(&self, input: &AnalysisInput) -> anyhow::Result<AnalyzerOutput> {
        let mut score = BASE_SCORE;
        let mut findings = Vec::new();

        for address in &input.unavailable_contracts {
            score += 5.0;
            findings.push(
                Finding::new(
                    FindingCategory::Operational,
                    Severity::Low,
                    "Contract data unavailable",
                    SOURCE,
                )
                .with_description(format!(
                    "On-chain metadata for {} could not be retrieved",
                    address
                ))
                .with_recommendation("Re-run the assessment once the block explorer is reachable")
                .with_confidence(60)
                .with_metadata("address", json!(address)),
            );
        }

        for contract in &input.contracts {
            if !contract.verified {
                score += 25.0;
                findings.push(
                    Finding::new(
                        FindingCategory::Technical,
                        Severity::High,
                        "Unverified contract source",
                        SOURCE,
                    )
                    .with_description(format!(
                        "Source code for {} is not published on the block explorer",
                        contract.address
                    ))
                    .with_recommendation("Do not deposit funds into contracts with unpublished source")
                    .with_confidence(95)
                    .with_metadata("address", json!(contract.address)),
                );
            }

            if contract.is_proxy {
                score += 10.0;
                findings.push(
                    Finding::new(
                        FindingCategory::Technical,
                        Severity::Medium,
                        "Upgradeable proxy contract",
                        SOURCE,
                    )
                    .with_description(format!(
                        "{} delegates to an implementation that can be replaced",
                        contract.address
                    ))
                    .with_recommendation("Check who can upgrade the implementation and under what delay")
                    .with_confidence(90)
                    .with_metadata("address", json!(contract.address))
                    .with_metadata("implementation", json!(contract.implementation)),
                );
            }

            if let Some(created) = contract.created_at {
                let age_days = (input.as_of - created).num_days();
                if age_days < 30 {
                    score += 10.0;
                    findings.push(
                        Finding::new(
                            FindingCategory::Technical,
                            Severity::Medium,
                            "Recently deployed contract",
                            SOURCE,
                        )
                        .with_description(format!(
                            "{} was deployed {} days ago",
                            contract.address, age_days
                        ))
                        .with_recommendation("Prefer battle-tested deployments for large positions")
                        .with_confidence(85)
                        .with_metadata("address", json!(contract.address)),
                    );
                }
            }
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("contracts_analyzed".into(), json!(input.contracts.len()));

        if let Some(tool) = &self.tool {
            if input.depth != AnalysisDepth::Basic {
                let mut tool_findings = Vec::new();
                for contract in input.contracts.iter().filter(|c| c.verified) {
                    tool_findings.extend(tool.run(&contract.address).await?);
                }
                debug!(
                    assessment_id = %input.assessment_id,
                    count = tool_findings.len(),
                    "static analysis findings"
                );
                metadata.insert("static_analysis_findings".into(), json!(tool_findings.len()));
                score += tool_findings
                    .iter()
                    .map(|f| match f.severity {
                        Severity::Critical => 15.0,
                        Severity::High => 8.0,
                        Severity::Medium => 3.0,
                        _ => 0.0,
                    })
                    .sum::<f64>();
                findings.extend(tool_findings);
            }
        }

        Ok(AnalyzerOutput {
            score: score.min(100.0),
            findings,
            metadata,
        })
    }
}
