//! Weighted risk scoring.
//!
//! [`ScoringEngine::calculate`] is a pure function of its inputs and the
//! engine's configuration. Per category:
//!
//! 1. start from the configured baseline
//! 2. add each finding's `severity points × confidence multiplier`, routed by
//!    [`FindingCategory::distribution`](crate::model::FindingCategory::distribution)
//! 3. blend in external metrics at 30% when present
//! 4. add protocol-metadata adjustments (age, TVL, audits)
//! 5. clamp to `[0, 100]`
//!
//! The overall score is the weighted sum of the four categories.

mod config;

use serde::{Deserialize, Serialize};

pub use config::{
    CategoryWeights, ConfidenceMultipliers, RiskThresholds, ScoringConfiguration,
    ScoringOverrides, SeverityWeights,
};

use crate::error::Result;
use crate::model::{CategoryScores, Finding, ProtocolMetadata, RiskLevel, ScoreCategory};

/// Share of the final category score taken from external metrics.
const EXTERNAL_METRIC_WEIGHT: f64 = 0.3;
const MAX_RECOMMENDATIONS: usize = 10;
/// Category score at which category-specific advice kicks in.
const CATEGORY_ALERT_SCORE: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub category_scores: CategoryScores,
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
    /// CRITICAL and HIGH findings.
    pub critical_findings: Vec<Finding>,
    /// 0-100.
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfiguration,
}

impl ScoringEngine {
    /// Fails when the configuration is invalid (weights not summing to 1.0).
    pub fn new(config: ScoringConfiguration) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn with_overrides(overrides: ScoringOverrides) -> Result<Self> {
        Self::new(overrides.apply_to(ScoringConfiguration::default()))
    }

    pub fn config(&self) -> &ScoringConfiguration {
        &self.config
    }

    /// Replace the configuration wholesale; the old one stays on failure.
    pub fn reconfigure(&mut self, config: ScoringConfiguration) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn calculate(
        &self,
        findings: &[Finding],
        metadata: Option<&ProtocolMetadata>,
        external: Option<&CategoryScores>,
    ) -> ScoringResult {
        let mut scores = self.config.baseline_scores;

        let impact = self.findings_impact(findings);
        for category in ScoreCategory::ALL {
            *scores.get_mut(category) += impact.get(category);
        }

        if let Some(external) = external {
            for category in ScoreCategory::ALL {
                let current = scores.get(category);
                *scores.get_mut(category) = current * (1.0 - EXTERNAL_METRIC_WEIGHT)
                    + external.get(category) * EXTERNAL_METRIC_WEIGHT;
            }
        }

        if let Some(metadata) = metadata {
            apply_metadata_adjustments(&mut scores, metadata);
        }

        let category_scores = round_scores(scores.clamped());
        let overall_score = self.overall_score(&category_scores);
        let risk_level = self.risk_level(overall_score);

        let critical_findings: Vec<Finding> = findings
            .iter()
            .filter(|f| f.severity.is_critical())
            .cloned()
            .collect();

        ScoringResult {
            recommendations: recommendations(risk_level, &category_scores, &critical_findings),
            confidence: confidence(findings.len(), external.is_some()),
            category_scores,
            overall_score,
            risk_level,
            critical_findings,
        }
    }

    /// Weighted sum of category scores, rounded to two decimals.
    pub fn overall_score(&self, scores: &CategoryScores) -> f64 {
        round2(self.config.weights.apply(scores))
    }

    pub fn risk_level(&self, overall_score: f64) -> RiskLevel {
        self.config.risk_thresholds.level_for(overall_score)
    }

    fn findings_impact(&self, findings: &[Finding]) -> CategoryScores {
        let mut impact = CategoryScores::default();
        for finding in findings {
            let points = self.config.severity_weights.points(finding.severity)
                * self
                    .config
                    .confidence_multipliers
                    .for_confidence(finding.confidence);
            for (category, share) in finding.category.distribution() {
                *impact.get_mut(*category) += points * share;
            }
        }
        impact
    }
}

fn apply_metadata_adjustments(scores: &mut CategoryScores, metadata: &ProtocolMetadata) {
    if let Some(age) = metadata.age_days {
        let add = if age < 30.0 {
            20.0
        } else if age < 90.0 {
            10.0
        } else if age < 365.0 {
            5.0
        } else {
            0.0
        };
        scores.technical += add;
        scores.reputation += add;
    }

    if let Some(tvl) = metadata.tvl_usd {
        scores.liquidity += if tvl < 1_000_000.0 {
            20.0
        } else if tvl < 10_000_000.0 {
            10.0
        } else if tvl < 100_000_000.0 {
            5.0
        } else {
            0.0
        };
    }

    if let Some(audits) = metadata.audit_count {
        scores.technical -= match audits {
            0 => 0.0,
            1 => 5.0,
            2 => 10.0,
            _ => 15.0,
        };
    }
}

fn confidence(finding_count: usize, has_external: bool) -> f64 {
    let from_findings = (finding_count as f64 * 5.0).min(30.0);
    let external = if has_external { 20.0 } else { 0.0 };
    (50.0 + from_findings + external).clamp(0.0, 100.0)
}

fn recommendations(
    level: RiskLevel,
    scores: &CategoryScores,
    critical_findings: &[Finding],
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |text: &str| {
        if !text.is_empty() && !out.iter().any(|r| r == text) {
            out.push(text.to_string());
        }
    };

    push(match level {
        RiskLevel::Critical => {
            "Avoid interacting with this protocol until the critical issues are resolved"
        }
        RiskLevel::High => "Limit exposure and monitor the protocol closely",
        RiskLevel::Medium => "Apply standard position limits and review findings periodically",
        RiskLevel::Low => "Risk profile is low; continue routine monitoring",
    });

    for category in ScoreCategory::ALL {
        if scores.get(category) < CATEGORY_ALERT_SCORE {
            continue;
        }
        push(match category {
            ScoreCategory::Technical => {
                "Commission an independent security audit of the core contracts"
            }
            ScoreCategory::Governance => "Review admin key custody and upgrade timelocks",
            ScoreCategory::Liquidity => "Check exit liquidity before committing large positions",
            ScoreCategory::Reputation => {
                "Verify the team's track record through independent sources"
            }
        });
    }

    for finding in critical_findings {
        push(finding.recommendation.as_str());
    }

    out.truncate(MAX_RECOMMENDATIONS);
    out
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round_scores(mut scores: CategoryScores) -> CategoryScores {
    for category in ScoreCategory::ALL {
        let v = scores.get_mut(category);
        *v = round2(*v);
    }
    scores
}
