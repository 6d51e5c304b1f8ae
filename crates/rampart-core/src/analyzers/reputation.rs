use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use super::{AnalysisInput, Analyzer, AnalyzerOutput};
use crate::model::{Finding, FindingCategory, ScoreCategory, Severity};

const SOURCE: &str = "reputation-analyzer";
const BASE_SCORE: f64 = 35.0;

/// Operating history, audits and listing presence.
#[derive(Debug, Default)]
pub struct ReputationAnalyzer;

#[async_trait]
impl Analyzer for ReputationAnalyzer {
    fn category(&self) -> ScoreCategory {
        ScoreCategory::Reputation
    }

    fn name(&self) -> &str {
        SOURCE
    }

    async fn analyze(&self, input: &AnalysisInput) -> anyhow::Result<AnalyzerOutput> {
        let mut score = BASE_SCORE;
        let mut findings = Vec::new();
        let mut metadata = BTreeMap::new();

        match input.age_days() {
            None => {
                score += 10.0;
                findings.push(
                    Finding::new(
                        FindingCategory::Reputation,
                        Severity::Medium,
                        "Unknown operating history",
                        SOURCE,
                    )
                    .with_description("No deployment or listing date could be determined")
                    .with_confidence(60),
                );
            }
            Some(age) if age < 90.0 => {
                score += 20.0;
                findings.push(
                    Finding::new(
                        FindingCategory::Reputation,
                        Severity::High,
                        "Limited operating history",
                        SOURCE,
                    )
                    .with_description(format!("Protocol has operated for {:.0} days", age))
                    .with_recommendation("Wait for a longer track record before committing funds")
                    .with_confidence(85),
                );
            }
            Some(age) if age < 365.0 => {
                score += 10.0;
                findings.push(
                    Finding::new(
                        FindingCategory::Reputation,
                        Severity::Low,
                        "Less than a year of operation",
                        SOURCE,
                    )
                    .with_description(format!("Protocol has operated for {:.0} days", age))
                    .with_confidence(85),
                );
            }
            Some(_) => {}
        }
        if let Some(age) = input.age_days() {
            metadata.insert("age_days".into(), json!(age.floor()));
        }

        match input.audit_count() {
            None | Some(0) => {
                score += 20.0;
                findings.push(
                    Finding::new(
                        FindingCategory::Reputation,
                        Severity::High,
                        "No public security audits",
                        SOURCE,
                    )
                    .with_description("No audit reports are listed for this protocol")
                    .with_recommendation("Treat unaudited code as high risk; request audit reports")
                    .with_confidence(75),
                );
            }
            Some(1) => score += 5.0,
            Some(n) if n >= 3 => score -= 10.0,
            Some(_) => {}
        }

        if input.protocol_data.is_none() {
            score += 10.0;
            findings.push(
                Finding::new(
                    FindingCategory::Reputation,
                    Severity::Medium,
                    "Not listed with data providers",
                    SOURCE,
                )
                .with_description("The protocol does not appear in public DeFi listings")
                .with_confidence(60),
            );
        }

        Ok(AnalyzerOutput {
            score,
            findings,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{input, protocol_data};
    use super::*;

    #[tokio::test]
    async fn test_unknown_protocol() {
        let out = ReputationAnalyzer.analyze(&input()).await.unwrap();
        assert_eq!(out.score, BASE_SCORE + 10.0 + 20.0 + 10.0);
        assert_eq!(out.findings.len(), 3);
    }

    #[tokio::test]
    async fn test_established_audited_protocol() {
        let mut input = input();
        let mut data = protocol_data(Some(1e9), Some(4));
        data.listed_at = Some(input.as_of - chrono::Duration::days(900));
        input.protocol_data = Some(data);

        let out = ReputationAnalyzer.analyze(&input).await.unwrap();
        assert_eq!(out.score, BASE_SCORE - 10.0);
        assert!(out.findings.is_empty());
        assert_eq!(out.metadata["age_days"], json!(900.0));
    }
}
