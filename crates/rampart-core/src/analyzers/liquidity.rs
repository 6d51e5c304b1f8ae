use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use super::{AnalysisInput, Analyzer, AnalyzerOutput};
use crate::model::{Finding, FindingCategory, ScoreCategory, Severity};

const SOURCE: &str = "liquidity-analyzer";

/// Share of total DeFi TVL above which a protocol is flagged as systemic.
const SYSTEMIC_SHARE_PCT: f64 = 5.0;

/// TVL bands, chain spread and market concentration.
#[derive(Debug, Default)]
pub struct LiquidityAnalyzer;

#[async_trait]
impl Analyzer for LiquidityAnalyzer {
    fn category(&self) -> ScoreCategory {
        ScoreCategory::Liquidity
    }

    fn name(&self) -> &str {
        SOURCE
    }

    async fn analyze(&self, input: &AnalysisInput) -> anyhow::Result<AnalyzerOutput> {
        let mut findings = Vec::new();
        let mut metadata = BTreeMap::new();

        let Some(tvl) = input.tvl_usd() else {
            findings.push(
                Finding::new(
                    FindingCategory::Liquidity,
                    Severity::Medium,
                    "TVL data unavailable",
                    SOURCE,
                )
                .with_description("No total-value-locked figure was found for this protocol")
                .with_recommendation("Confirm on-chain liquidity manually before sizing positions")
                .with_confidence(70),
            );
            return Ok(AnalyzerOutput {
                score: 60.0,
                findings,
                metadata,
            });
        };
        metadata.insert("tvl_usd".into(), json!(tvl));

        let (mut score, band) = if tvl < 1_000_000.0 {
            (80.0, Some((Severity::High, "Very low total value locked")))
        } else if tvl < 10_000_000.0 {
            (60.0, Some((Severity::Medium, "Low total value locked")))
        } else if tvl < 100_000_000.0 {
            (40.0, Some((Severity::Low, "Moderate total value locked")))
        } else {
            (20.0, None)
        };

        if let Some((severity, title)) = band {
            findings.push(
                Finding::new(FindingCategory::Liquidity, severity, title, SOURCE)
                    .with_description(format!("Protocol TVL is ${:.0}", tvl))
                    .with_recommendation("Size positions to the available exit liquidity")
                    .with_confidence(85),
            );
        }

        let chains = input
            .protocol_data
            .as_ref()
            .map(|p| p.chains.len())
            .unwrap_or(0);
        if chains == 1 {
            score += 5.0;
            findings.push(
                Finding::new(
                    FindingCategory::Liquidity,
                    Severity::Low,
                    "Single-chain deployment",
                    SOURCE,
                )
                .with_description("All liquidity sits on one chain")
                .with_confidence(80),
            );
        }

        if let Some(market) = input.market.as_ref().filter(|m| m.total_tvl_usd > 0.0) {
            let share = tvl / market.total_tvl_usd * 100.0;
            metadata.insert("market_share_pct".into(), json!(share));
            if share > SYSTEMIC_SHARE_PCT {
                score += 5.0;
                findings.push(
                    Finding::new(
                        FindingCategory::Operational,
                        Severity::Low,
                        "Systemically large protocol",
                        SOURCE,
                    )
                    .with_description(format!(
                        "Holds {:.1}% of total DeFi TVL; stress elsewhere propagates here",
                        share
                    ))
                    .with_confidence(70),
                );
            }
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
    use rampart_client::MarketOverview;

    #[tokio::test]
    async fn test_missing_tvl() {
        let out = LiquidityAnalyzer.analyze(&input()).await.unwrap();
        assert_eq!(out.score, 60.0);
        assert_eq!(out.findings[0].title, "TVL data unavailable");
    }

    #[tokio::test]
    async fn test_tvl_bands() {
        for (tvl, expected) in [(5e5, 80.0), (5e6, 60.0), (5e7, 40.0), (5e9, 20.0)] {
            let mut input = input();
            input.protocol_data = Some(protocol_data(Some(tvl), None));
            let out = LiquidityAnalyzer.analyze(&input).await.unwrap();
            assert_eq!(out.score, expected, "tvl {tvl}");
        }
    }

    #[tokio::test]
    async fn test_market_share_flagged() {
        let mut input = input();
        let mut data = protocol_data(Some(1e10), None);
        data.chains = vec!["Ethereum".into()];
        input.protocol_data = Some(data);
        input.market = Some(MarketOverview {
            total_tvl_usd: 1e11,
            tvl_change_24h_pct: None,
            as_of: None,
        });

        let out = LiquidityAnalyzer.analyze(&input).await.unwrap();
        assert_eq!(out.score, 30.0);
        let share = out.metadata["market_share_pct"].as_f64().unwrap();
        assert!((share - 10.0).abs() < 1e-9);
        assert!(out
            .findings
            .iter()
            .any(|f| f.category == FindingCategory::Operational));
    }
}
