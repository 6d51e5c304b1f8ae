//! Scoring configuration and partial overrides.

use serde::{Deserialize, Serialize};

use crate::error::{AssessmentError, Result};
use crate::model::{CategoryScores, RiskLevel, Severity};

const WEIGHT_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryWeights {
    pub technical: f64,
    pub governance: f64,
    pub liquidity: f64,
    pub reputation: f64,
}

impl CategoryWeights {
    pub fn sum(&self) -> f64 {
        self.technical + self.governance + self.liquidity + self.reputation
    }

    /// Weighted sum of `scores`.
    pub fn apply(&self, scores: &CategoryScores) -> f64 {
        self.technical * scores.technical
            + self.governance * scores.governance
            + self.liquidity * scores.liquidity
            + self.reputation * scores.reputation
    }
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            technical: 0.4,
            governance: 0.25,
            liquidity: 0.2,
            reputation: 0.15,
        }
    }
}

/// Minimum overall score for each level; anything below `medium` is LOW.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl RiskThresholds {
    pub fn level_for(&self, score: f64) -> RiskLevel {
        if score >= self.critical {
            RiskLevel::Critical
        } else if score >= self.high {
            RiskLevel::High
        } else if score >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            critical: 80.0,
            high: 60.0,
            medium: 30.0,
        }
    }
}

/// Risk points a single finding contributes, before confidence scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityWeights {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
    pub info: f64,
}

impl SeverityWeights {
    pub fn points(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: 25.0,
            high: 15.0,
            medium: 8.0,
            low: 3.0,
            info: 0.0,
        }
    }
}

/// Scales finding impact by the producer's confidence:
/// `high` at 80+, `medium` at 50+, `low` below.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceMultipliers {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl ConfidenceMultipliers {
    pub fn for_confidence(&self, confidence: u8) -> f64 {
        match confidence {
            80.. => self.high,
            50..=79 => self.medium,
            _ => self.low,
        }
    }
}

impl Default for ConfidenceMultipliers {
    fn default() -> Self {
        Self {
            high: 1.0,
            medium: 0.75,
            low: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfiguration {
    #[serde(default)]
    pub weights: CategoryWeights,
    #[serde(default)]
    pub risk_thresholds: RiskThresholds,
    #[serde(default)]
    pub severity_weights: SeverityWeights,
    #[serde(default)]
    pub confidence_multipliers: ConfidenceMultipliers,
    #[serde(default = "default_baseline_scores")]
    pub baseline_scores: CategoryScores,
}

fn default_baseline_scores() -> CategoryScores {
    CategoryScores::uniform(30.0)
}

impl Default for ScoringConfiguration {
    fn default() -> Self {
        Self {
            weights: CategoryWeights::default(),
            risk_thresholds: RiskThresholds::default(),
            severity_weights: SeverityWeights::default(),
            confidence_multipliers: ConfidenceMultipliers::default(),
            baseline_scores: default_baseline_scores(),
        }
    }
}

impl ScoringConfiguration {
    pub fn validate(&self) -> Result<()> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(AssessmentError::Config(format!(
                "category weights must sum to 1.0, got {:.4}",
                sum
            )));
        }
        let w = &self.weights;
        if [w.technical, w.governance, w.liquidity, w.reputation]
            .iter()
            .any(|v| *v < 0.0)
        {
            return Err(AssessmentError::Config(
                "category weights must be non-negative".into(),
            ));
        }

        let t = &self.risk_thresholds;
        if !(t.critical > t.high && t.high > t.medium && t.medium >= 0.0) {
            return Err(AssessmentError::Config(format!(
                "risk thresholds must satisfy critical > high > medium >= 0 (got {}/{}/{})",
                t.critical, t.high, t.medium
            )));
        }
        Ok(())
    }
}

/// Partial replacement for [`ScoringConfiguration`]; unset fields keep the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<CategoryWeights>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_thresholds: Option<RiskThresholds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_weights: Option<SeverityWeights>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_multipliers: Option<ConfidenceMultipliers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_scores: Option<CategoryScores>,
}

impl ScoringOverrides {
    pub fn apply_to(self, base: ScoringConfiguration) -> ScoringConfiguration {
        ScoringConfiguration {
            weights: self.weights.unwrap_or(base.weights),
            risk_thresholds: self.risk_thresholds.unwrap_or(base.risk_thresholds),
            severity_weights: self.severity_weights.unwrap_or(base.severity_weights),
            confidence_multipliers: self
                .confidence_multipliers
                .unwrap_or(base.confidence_multipliers),
            baseline_scores: self.baseline_scores.unwrap_or(base.baseline_scores),
        }
    }
}
