//! Risk assessment for DeFi protocols.
//!
//! An [`Orchestrator`] takes an [`AssessmentRequest`], collects on-chain and
//! off-chain data through [`rampart_client`], runs the four category
//! analyzers concurrently and scores their findings with a
//! [`ScoringEngine`]:
//!
//! ```text
//! initiate ─► blockchain ─► offchain ─► analyzers (fan-out) ─► scoring ─► record
//! ```
//!
//! A failing analyzer degrades to a conservative default score instead of
//! failing the assessment.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rampart_core::{AssessmentRequest, JsonFileStore, Orchestrator, RampartConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RampartConfig::from_env();
//! let store = Arc::new(JsonFileStore::new("./rampart-data"));
//! let orchestrator = Orchestrator::from_config(&config, store.clone(), store)?;
//!
//! let started = orchestrator
//!     .initiate(AssessmentRequest::new(
//!         "Lido",
//!         ["0xae7ab96520de3a18e5e111b5eaab095312d7fe84"],
//!     ))
//!     .await?;
//! let progress = orchestrator.status(&started.assessment_id).await?;
//! println!("{} {}%", progress.status, progress.progress);
//! # Ok(())
//! # }
//! ```

pub mod analyzers;
pub mod collect;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod scoring;
pub mod store;

pub use analyzers::{
    AnalysisInput, Analyzer, AnalyzerOutcome, AnalyzerOutput, StaticAnalysisConfig, ToolRunner,
};
pub use collect::{ChainDataSource, OffchainClients, ProtocolDataSource};
pub use config::{AnalyzerDefaults, DepthDurations, OrchestratorConfig, RampartConfig};
pub use error::{AssessmentError, Result, StoreError, StoreResult};
pub use model::{
    AnalysisDepth, AssessmentFilters, AssessmentProgress, AssessmentRequest, AssessmentStatus,
    CategoryScores, Finding, FindingCategory, InitiateResponse, Protocol, ProtocolMetadata,
    RiskAssessment, RiskLevel, ScoreCategory, Severity,
};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, CANCELLED_MESSAGE};
pub use scoring::{ScoringConfiguration, ScoringEngine, ScoringOverrides, ScoringResult};
pub use store::{AssessmentStore, JsonFileStore, MemoryStore, ProtocolStore};
