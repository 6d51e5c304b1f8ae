//! Orchestrator and top-level configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rampart_client::{ApiKeyPlacement, ClientConfig};
use serde::{Deserialize, Serialize};

use crate::analyzers::StaticAnalysisConfig;
use crate::model::{AnalysisDepth, ScoreCategory};
use crate::scoring::{ScoringConfiguration, ScoringOverrides};

/// Scores used when an analyzer fails.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerDefaults {
    #[serde(default = "default_analyzer_score")]
    pub technical: f64,
    #[serde(default = "default_analyzer_score")]
    pub liquidity: f64,
    #[serde(default = "default_analyzer_score")]
    pub governance: f64,
    #[serde(default = "default_reputation_score")]
    pub reputation: f64,
}

fn default_analyzer_score() -> f64 {
    65.0
}

fn default_reputation_score() -> f64 {
    60.0
}

impl Default for AnalyzerDefaults {
    fn default() -> Self {
        Self {
            technical: default_analyzer_score(),
            liquidity: default_analyzer_score(),
            governance: default_analyzer_score(),
            reputation: default_reputation_score(),
        }
    }
}

impl AnalyzerDefaults {
    pub fn score_for(&self, category: ScoreCategory) -> f64 {
        match category {
            ScoreCategory::Technical => self.technical,
            ScoreCategory::Liquidity => self.liquidity,
            ScoreCategory::Governance => self.governance,
            ScoreCategory::Reputation => self.reputation,
        }
    }
}

/// Estimated run time per analysis depth, reported at initiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthDurations {
    pub basic_secs: u64,
    pub standard_secs: u64,
    pub comprehensive_secs: u64,
}

impl Default for DepthDurations {
    fn default() -> Self {
        Self {
            basic_secs: 30,
            standard_secs: 90,
            comprehensive_secs: 180,
        }
    }
}

impl DepthDurations {
    pub fn for_depth(&self, depth: AnalysisDepth) -> Duration {
        Duration::from_secs(match depth {
            AnalysisDepth::Basic => self.basic_secs,
            AnalysisDepth::Standard => self.standard_secs,
            AnalysisDepth::Comprehensive => self.comprehensive_secs,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Pause between pipeline stages.
    #[serde(default = "default_stage_delay_ms")]
    pub stage_delay_ms: u64,

    #[serde(default)]
    pub depth_durations: DepthDurations,

    /// A completed assessment of the same protocol within this window is
    /// logged as a duplicate.
    #[serde(default = "default_duplicate_window_hours")]
    pub duplicate_window_hours: u64,

    #[serde(default)]
    pub analyzer_defaults: AnalyzerDefaults,
}

fn default_stage_delay_ms() -> u64 {
    250
}

fn default_duplicate_window_hours() -> u64 {
    24
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stage_delay_ms: default_stage_delay_ms(),
            depth_durations: DepthDurations::default(),
            duplicate_window_hours: default_duplicate_window_hours(),
            analyzer_defaults: AnalyzerDefaults::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn stage_delay(&self) -> Duration {
        Duration::from_millis(self.stage_delay_ms)
    }

    pub fn with_stage_delay_ms(mut self, ms: u64) -> Self {
        self.stage_delay_ms = ms;
        self
    }
}

/// Everything needed to assemble a running orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampartConfig {
    #[serde(default = "default_explorer")]
    pub explorer: ClientConfig,

    #[serde(default = "default_protocol_data")]
    pub protocol_data: ClientConfig,

    #[serde(default = "default_market")]
    pub market: ClientConfig,

    #[serde(default)]
    pub scoring: ScoringOverrides,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Static-analysis tool for the technical analyzer; disabled when absent.
    #[serde(default)]
    pub static_analysis: Option<StaticAnalysisConfig>,

    /// Root directory for the JSON-file store.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_explorer() -> ClientConfig {
    ClientConfig::new("https://api.etherscan.io/api").with_rate_limit(5.0, 5)
}

fn default_protocol_data() -> ClientConfig {
    ClientConfig::new("https://api.llama.fi").with_rate_limit(2.0, 5)
}

fn default_market() -> ClientConfig {
    ClientConfig::new("https://api.llama.fi").with_rate_limit(1.0, 2)
}

impl Default for RampartConfig {
    fn default() -> Self {
        Self {
            explorer: default_explorer(),
            protocol_data: default_protocol_data(),
            market: default_market(),
            scoring: ScoringOverrides::default(),
            orchestrator: OrchestratorConfig::default(),
            static_analysis: None,
            data_dir: None,
        }
    }
}

impl RampartConfig {
    /// Load and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `RAMPART_EXPLORER_*` | Explorer client (see [`ClientConfig::from_env`]) |
    /// | `RAMPART_PROTOCOL_DATA_*` | Protocol-data client |
    /// | `RAMPART_MARKET_*` | Market client |
    /// | `RAMPART_STAGE_DELAY_MS` | Pause between pipeline stages |
    /// | `RAMPART_DATA_DIR` | JSON store root |
    /// | `RAMPART_STATIC_ANALYSIS_PROGRAM` | Enables the static-analysis tool |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut explorer = ClientConfig::from_env("RAMPART_EXPLORER", defaults.explorer);
        if explorer.api_key.is_some() {
            explorer.api_key_placement = ApiKeyPlacement::Query;
        }

        let orchestrator = OrchestratorConfig {
            stage_delay_ms: std::env::var("RAMPART_STAGE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.orchestrator.stage_delay_ms),
            ..defaults.orchestrator
        };

        Self {
            explorer,
            protocol_data: ClientConfig::from_env("RAMPART_PROTOCOL_DATA", defaults.protocol_data),
            market: ClientConfig::from_env("RAMPART_MARKET", defaults.market),
            orchestrator,
            static_analysis: std::env::var("RAMPART_STATIC_ANALYSIS_PROGRAM")
                .ok()
                .filter(|p| !p.is_empty())
                .map(StaticAnalysisConfig::new),
            data_dir: std::env::var_os("RAMPART_DATA_DIR").map(PathBuf::from),
            scoring: defaults.scoring,
        }
    }

    pub fn scoring_configuration(&self) -> ScoringConfiguration {
        self.scoring.clone().apply_to(ScoringConfiguration::default())
    }

    pub fn validate(&self) -> Result<()> {
        self.explorer.validate().context("explorer client")?;
        self.protocol_data.validate().context("protocol_data client")?;
        self.market.validate().context("market client")?;
        self.scoring_configuration().validate()?;
        Ok(())
    }
}
