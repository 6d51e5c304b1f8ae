//! Assessment domain types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a finding is routed when scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingCategory {
    Technical,
    Governance,
    Liquidity,
    Reputation,
    /// Spread over all four score categories.
    Operational,
}

impl FindingCategory {
    /// Share of a finding's impact that lands on each score category.
    pub fn distribution(self) -> &'static [(ScoreCategory, f64)] {
        match self {
            Self::Technical => &[(ScoreCategory::Technical, 1.0)],
            Self::Governance => &[(ScoreCategory::Governance, 1.0)],
            Self::Liquidity => &[(ScoreCategory::Liquidity, 1.0)],
            Self::Reputation => &[(ScoreCategory::Reputation, 1.0)],
            Self::Operational => &[
                (ScoreCategory::Technical, 0.4),
                (ScoreCategory::Governance, 0.3),
                (ScoreCategory::Liquidity, 0.2),
                (ScoreCategory::Reputation, 0.1),
            ],
        }
    }
}

/// One of the four scored dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCategory {
    Technical,
    Governance,
    Liquidity,
    Reputation,
}

impl ScoreCategory {
    pub const ALL: [ScoreCategory; 4] = [
        Self::Technical,
        Self::Governance,
        Self::Liquidity,
        Self::Reputation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Governance => "governance",
            Self::Liquidity => "liquidity",
            Self::Reputation => "reputation",
        }
    }
}

impl fmt::Display for ScoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// CRITICAL and HIGH.
    pub fn is_critical(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

/// A categorized risk observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub category: FindingCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    /// Producer identifier, e.g. `technical-analyzer`.
    pub source: String,
    /// 0-100.
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Finding {
    pub fn new(
        category: FindingCategory,
        severity: Severity,
        title: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category,
            severity,
            title: title.into(),
            description: String::new(),
            recommendation: String::new(),
            source: source.into(),
            confidence: 100,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = confidence.min(100);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Per-category risk scores, each 0-100 (higher is riskier).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub technical: f64,
    pub governance: f64,
    pub liquidity: f64,
    pub reputation: f64,
}

impl CategoryScores {
    pub fn uniform(value: f64) -> Self {
        Self {
            technical: value,
            governance: value,
            liquidity: value,
            reputation: value,
        }
    }

    pub fn get(&self, category: ScoreCategory) -> f64 {
        match category {
            ScoreCategory::Technical => self.technical,
            ScoreCategory::Governance => self.governance,
            ScoreCategory::Liquidity => self.liquidity,
            ScoreCategory::Reputation => self.reputation,
        }
    }

    pub fn get_mut(&mut self, category: ScoreCategory) -> &mut f64 {
        match category {
            ScoreCategory::Technical => &mut self.technical,
            ScoreCategory::Governance => &mut self.governance,
            ScoreCategory::Liquidity => &mut self.liquidity,
            ScoreCategory::Reputation => &mut self.reputation,
        }
    }

    pub fn clamped(mut self) -> Self {
        for category in ScoreCategory::ALL {
            let v = self.get_mut(category);
            *v = v.clamp(0.0, 100.0);
        }
        self
    }
}

impl Default for CategoryScores {
    fn default() -> Self {
        Self::uniform(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl AssessmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisDepth {
    Basic,
    #[default]
    Standard,
    Comprehensive,
}

/// Live view of a running (or finished) assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentProgress {
    pub assessment_id: String,
    pub status: AssessmentStatus,
    /// 0-100.
    pub progress: u8,
    pub current_stage: String,
    pub started_at: DateTime<Utc>,
    pub estimated_completion_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentMetadata {
    pub analysis_depth: AnalysisDepth,
    #[serde(default)]
    pub execution_time_ms: u64,
    /// Upstreams that contributed data, e.g. `explorer`, `protocol-data`.
    #[serde(default)]
    pub data_sources: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Analyzers whose default score replaced a failed run.
    #[serde(default)]
    pub degraded_analyzers: Vec<ScoreCategory>,
}

/// Durable assessment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub id: String,
    pub protocol_id: String,
    pub status: AssessmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_scores: Option<CategoryScores>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub metadata: AssessmentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RiskAssessment {
    pub fn pending(
        id: impl Into<String>,
        protocol_id: impl Into<String>,
        depth: AnalysisDepth,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            protocol_id: protocol_id.into(),
            status: AssessmentStatus::Pending,
            overall_score: None,
            risk_level: None,
            category_scores: None,
            findings: Vec::new(),
            recommendations: Vec::new(),
            metadata: AssessmentMetadata {
                analysis_depth: depth,
                ..AssessmentMetadata::default()
            },
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = AssessmentStatus::Failed;
        self.error = Some(message.into());
        self.updated_at = now;
        self.completed_at = Some(now);
    }
}

/// A DeFi protocol under assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: String,
    pub name: String,
    /// Lowercased `0x` addresses.
    pub contract_addresses: Vec<String>,
    #[serde(default = "default_chain")]
    pub chain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_chain() -> String {
    "ethereum".to_string()
}

impl Protocol {
    pub fn has_address(&self, address: &str) -> bool {
        self.contract_addresses
            .iter()
            .any(|a| a.eq_ignore_ascii_case(address))
    }
}

/// Input to [`crate::Orchestrator::initiate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRequest {
    /// Assess an already-known protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub contract_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub depth: AnalysisDepth,
}

impl AssessmentRequest {
    pub fn new(name: impl Into<String>, addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            contract_addresses: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn for_protocol(protocol_id: impl Into<String>) -> Self {
        Self {
            protocol_id: Some(protocol_id.into()),
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, depth: AnalysisDepth) -> Self {
        self.depth = depth;
        self
    }
}

/// Returned by [`crate::Orchestrator::initiate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiateResponse {
    pub assessment_id: String,
    pub protocol_id: String,
    pub status: AssessmentStatus,
    pub estimated_completion_time: DateTime<Utc>,
    pub estimated_duration_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AssessmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl AssessmentFilters {
    pub fn matches(&self, record: &RiskAssessment) -> bool {
        self.protocol_id
            .as_deref()
            .is_none_or(|p| record.protocol_id == p)
            && self.status.is_none_or(|s| record.status == s)
            && self
                .risk_level
                .is_none_or(|level| record.risk_level == Some(level))
    }
}

/// Protocol facts the scoring engine adjusts for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMetadata {
    pub age_days: Option<f64>,
    pub tvl_usd: Option<f64>,
    pub audit_count: Option<u32>,
}

/// `0x` followed by 40 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .is_some_and(|hex| hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operational_distribution_sums_to_one() {
        let total: f64 = FindingCategory::Operational
            .distribution()
            .iter()
            .map(|(_, share)| share)
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_category_scores_clamped() {
        let scores = CategoryScores {
            technical: 130.0,
            governance: -4.0,
            liquidity: 50.0,
            reputation: 100.0,
        }
        .clamped();
        assert_eq!(scores.technical, 100.0);
        assert_eq!(scores.governance, 0.0);
        assert_eq!(scores.liquidity, 50.0);
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address("0x7Fc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9"));
        assert!(!is_valid_address("7Fc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9"));
        assert!(!is_valid_address("0x1234"));
        assert!(!is_valid_address("0xZZc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9"));
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&AssessmentStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert!(AssessmentStatus::Failed.is_terminal());
        assert!(!AssessmentStatus::Pending.is_terminal());
    }

    #[test]
    fn test_filters() {
        let now = Utc::now();
        let mut record = RiskAssessment::pending("a1", "p1", AnalysisDepth::Basic, now);
        record.status = AssessmentStatus::Completed;
        record.risk_level = Some(RiskLevel::High);

        assert!(AssessmentFilters::default().matches(&record));
        let by_level = AssessmentFilters {
            risk_level: Some(RiskLevel::High),
            ..Default::default()
        };
        assert!(by_level.matches(&record));
        let other_protocol = AssessmentFilters {
            protocol_id: Some("p2".into()),
            ..Default::default()
        };
        assert!(!other_protocol.matches(&record));
    }

    #[test]
    fn test_finding_confidence_capped() {
        let f = Finding::new(FindingCategory::Technical, Severity::Low, "t", "test")
            .with_confidence(250);
        assert_eq!(f.confidence, 100);
    }
}
