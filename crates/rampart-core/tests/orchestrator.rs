//! End-to-end orchestrator tests over in-process data sources.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;
use tokio::sync::Notify;

use rampart_client::{ContractInfo, MarketOverview, ProtocolData};
use rampart_core::analyzers::{
    GovernanceAnalyzer, LiquidityAnalyzer, ReputationAnalyzer, TechnicalAnalyzer,
};
use rampart_core::{
    AnalysisInput, Analyzer, AnalyzerOutput, AssessmentFilters, AssessmentProgress,
    AssessmentRequest, AssessmentStatus, AssessmentStore, ChainDataSource, JsonFileStore,
    MemoryStore, Orchestrator, OrchestratorConfig, ProtocolDataSource, RiskAssessment,
    ScoreCategory, ScoringConfiguration, StoreError, StoreResult, CANCELLED_MESSAGE,
};

const LIDO: &str = "0xae7ab96520de3a18e5e111b5eaab095312d7fe84";
const UNISWAP: &str = "0x1f98431c8ad98523631ae4a59f267346ea31f984";

// ============================================================
// Data-source doubles
// ============================================================

/// Verified, two-year-old contracts. Optionally blocks until released.
#[derive(Default)]
struct MockChain {
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl ChainDataSource for MockChain {
    async fn contract_info(&self, address: &str) -> anyhow::Result<ContractInfo> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(ContractInfo {
            address: address.to_string(),
            verified: true,
            contract_name: Some("Vault".into()),
            compiler_version: Some("v0.8.19".into()),
            is_proxy: false,
            implementation: None,
            created_at: Some(Utc::now() - ChronoDuration::days(730)),
        })
    }
}

struct MockOffchain {
    listed: bool,
}

#[async_trait]
impl ProtocolDataSource for MockOffchain {
    async fn protocol_by_name(&self, name: &str) -> anyhow::Result<Option<ProtocolData>> {
        if !self.listed {
            return Ok(None);
        }
        Ok(Some(ProtocolData {
            name: name.to_string(),
            slug: Some(name.to_ascii_lowercase()),
            category: Some("Liquid Staking".into()),
            tvl_usd: Some(5_000_000_000.0),
            chains: vec!["Ethereum".into(), "Arbitrum".into()],
            audit_count: Some(3),
            listed_at: Some(Utc::now() - ChronoDuration::days(1_000)),
            url: None,
            address: None,
        }))
    }

    async fn protocol_by_address(&self, _address: &str) -> anyhow::Result<Option<ProtocolData>> {
        Ok(None)
    }

    async fn market_overview(&self) -> anyhow::Result<MarketOverview> {
        anyhow::bail!("market API unavailable")
    }
}

struct BrokenAnalyzer;

#[async_trait]
impl Analyzer for BrokenAnalyzer {
    fn category(&self) -> ScoreCategory {
        ScoreCategory::Technical
    }

    fn name(&self) -> &str {
        "broken"
    }

    async fn analyze(&self, _input: &AnalysisInput) -> anyhow::Result<AnalyzerOutput> {
        anyhow::bail!("static analysis crashed")
    }
}

/// Memory store whose saves fail for records in one chosen status.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    reject: Mutex<Option<AssessmentStatus>>,
}

impl FlakyStore {
    fn reject_saves_of(&self, status: Option<AssessmentStatus>) {
        *self.reject.lock().unwrap() = status;
    }
}

#[async_trait]
impl AssessmentStore for FlakyStore {
    async fn save(&self, record: &RiskAssessment) -> StoreResult<()> {
        if *self.reject.lock().unwrap() == Some(record.status) {
            return Err(StoreError::Io {
                path: "assessments".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.save(record).await
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<RiskAssessment>> {
        self.inner.find_by_id(id).await
    }

    async fn find_all(&self) -> StoreResult<Vec<RiskAssessment>> {
        self.inner.find_all().await
    }

    async fn find_by_protocol_id(&self, protocol_id: &str) -> StoreResult<Vec<RiskAssessment>> {
        self.inner.find_by_protocol_id(protocol_id).await
    }
}

// ============================================================
// Helpers
// ============================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn create_test_orchestrator(chain: MockChain) -> Orchestrator {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    Orchestrator::builder(
        store.clone(),
        store,
        Arc::new(chain),
        Arc::new(MockOffchain { listed: true }),
    )
    .config(OrchestratorConfig::default().with_stage_delay_ms(0))
    .build()
}

fn create_flaky_orchestrator(chain: MockChain) -> (Orchestrator, Arc<FlakyStore>) {
    init_tracing();
    let store = Arc::new(FlakyStore::default());
    let orchestrator = Orchestrator::builder(
        store.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(chain),
        Arc::new(MockOffchain { listed: true }),
    )
    .config(OrchestratorConfig::default().with_stage_delay_ms(0))
    .build();
    (orchestrator, store)
}

async fn wait_until_terminal(orchestrator: &Orchestrator, id: &str) -> AssessmentProgress {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let progress = orchestrator.status(id).await.unwrap();
            if progress.status.is_terminal() {
                return progress;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("assessment did not finish in time")
}

async fn wait_for_stage(orchestrator: &Orchestrator, id: &str, stage: &str) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while orchestrator.status(id).await.unwrap().current_stage != stage {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("stage not reached in time");
}

// ============================================================
// Tests
// ============================================================

#[tokio::test]
async fn test_assessment_completes_with_scores() {
    let orchestrator = create_test_orchestrator(MockChain::default());

    let started = orchestrator
        .initiate(AssessmentRequest::new("Lido", [LIDO]))
        .await
        .unwrap();
    assert_eq!(started.status, AssessmentStatus::Pending);
    assert_eq!(started.estimated_duration_secs, 90);

    let progress = wait_until_terminal(&orchestrator, &started.assessment_id).await;
    assert_eq!(progress.status, AssessmentStatus::Completed);
    assert_eq!(progress.progress, 100);

    let result = orchestrator.result(&started.assessment_id).await.unwrap();
    assert_eq!(result.protocol_id, started.protocol_id);
    let overall = result.overall_score.unwrap();
    assert!((0.0..=100.0).contains(&overall));
    assert_eq!(
        result.risk_level,
        Some(
            orchestrator
                .scoring_config()
                .risk_thresholds
                .level_for(overall)
        )
    );
    assert!(result.category_scores.is_some());
    assert!(result.completed_at.is_some());
    assert!(result.error.is_none());
    assert!(!result.recommendations.is_empty());

    let meta = &result.metadata;
    assert!(meta.data_sources.contains(&"explorer".to_string()));
    assert!(meta.data_sources.contains(&"protocol-data".to_string()));
    assert!(!meta.data_sources.contains(&"market".to_string()));
    assert!(meta.warnings.iter().any(|w| w.contains("market")));
    assert!(meta
        .warnings
        .last()
        .unwrap()
        .starts_with("Assessment confidence:"));
    assert!(meta.confidence.is_some());
    assert!(meta.degraded_analyzers.is_empty());
    assert!(orchestrator.active().is_empty());
}

#[tokio::test]
async fn test_failing_analyzer_degrades_to_default() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::builder(
        store.clone(),
        store,
        Arc::new(MockChain::default()),
        Arc::new(MockOffchain { listed: true }),
    )
    .analyzers(vec![
        Arc::new(BrokenAnalyzer),
        Arc::new(LiquidityAnalyzer),
        Arc::new(GovernanceAnalyzer),
        Arc::new(ReputationAnalyzer),
    ])
    .config(OrchestratorConfig::default().with_stage_delay_ms(0))
    .build();

    let started = orchestrator
        .initiate(AssessmentRequest::new("Lido", [LIDO]))
        .await
        .unwrap();
    let progress = wait_until_terminal(&orchestrator, &started.assessment_id).await;
    assert_eq!(progress.status, AssessmentStatus::Completed);

    let result = orchestrator.result(&started.assessment_id).await.unwrap();
    assert_eq!(
        result.metadata.degraded_analyzers,
        vec![ScoreCategory::Technical]
    );
    assert!(result
        .metadata
        .warnings
        .iter()
        .any(|w| w.contains("technical analyzer degraded") && w.contains("crashed")));
    assert!(result.findings.iter().all(|f| f.source != "broken"));
    assert!(result.overall_score.is_some());
}

#[tokio::test]
async fn test_default_technical_analyzer_runs_without_tool() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::builder(
        store.clone(),
        store,
        Arc::new(MockChain::default()),
        Arc::new(MockOffchain { listed: false }),
    )
    .analyzers(vec![Arc::new(TechnicalAnalyzer::new(None))])
    .config(OrchestratorConfig::default().with_stage_delay_ms(0))
    .build();

    let started = orchestrator
        .initiate(AssessmentRequest::new("Unlisted", [UNISWAP]))
        .await
        .unwrap();
    wait_until_terminal(&orchestrator, &started.assessment_id).await;

    let result = orchestrator.result(&started.assessment_id).await.unwrap();
    assert!(!result
        .metadata
        .data_sources
        .contains(&"protocol-data".to_string()));
    assert!(result.metadata.degraded_analyzers.is_empty());
}

#[tokio::test]
async fn test_cancel_marks_failed_and_drops_late_result() {
    let gate = Arc::new(Notify::new());
    let orchestrator = create_test_orchestrator(MockChain {
        gate: Some(gate.clone()),
    });

    let started = orchestrator
        .initiate(AssessmentRequest::new("Lido", [LIDO]))
        .await
        .unwrap();
    let id = started.assessment_id;
    wait_for_stage(&orchestrator, &id, "blockchain").await;

    let err = orchestrator.result(&id).await.unwrap_err();
    assert_eq!(err.code(), "ASSESSMENT_NOT_COMPLETED");

    orchestrator.cancel(&id).await.unwrap();
    gate.notify_waiters();

    let progress = orchestrator.status(&id).await.unwrap();
    assert_eq!(progress.status, AssessmentStatus::Failed);
    assert_eq!(progress.error.as_deref(), Some(CANCELLED_MESSAGE));

    // A released pipeline must not overwrite the cancellation.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let progress = orchestrator.status(&id).await.unwrap();
    assert_eq!(progress.status, AssessmentStatus::Failed);
    assert_eq!(progress.error.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(orchestrator.active().is_empty());

    let err = orchestrator.cancel(&id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");
}

#[tokio::test]
async fn test_cancel_retries_until_failure_is_persisted() {
    let gate = Arc::new(Notify::new());
    let (orchestrator, store) = create_flaky_orchestrator(MockChain {
        gate: Some(gate.clone()),
    });

    let started = orchestrator
        .initiate(AssessmentRequest::new("Lido", [LIDO]))
        .await
        .unwrap();
    let id = started.assessment_id;
    wait_for_stage(&orchestrator, &id, "blockchain").await;

    store.reject_saves_of(Some(AssessmentStatus::Failed));
    let err = orchestrator.cancel(&id).await.unwrap_err();
    assert_eq!(err.code(), "STORE_ERROR");
    gate.notify_waiters();

    // The live view already reports the cancellation; the record does not.
    let progress = orchestrator.status(&id).await.unwrap();
    assert_eq!(progress.status, AssessmentStatus::Failed);
    assert_eq!(progress.error.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(orchestrator.active().is_empty());
    let record = store.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(record.status, AssessmentStatus::InProgress);

    store.reject_saves_of(None);
    orchestrator.cancel(&id).await.unwrap();
    let record = store.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(record.status, AssessmentStatus::Failed);
    assert_eq!(record.error.as_deref(), Some(CANCELLED_MESSAGE));

    let err = orchestrator.cancel(&id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");
}

#[tokio::test]
async fn test_unpersistable_result_fails_assessment() {
    let (orchestrator, store) = create_flaky_orchestrator(MockChain::default());
    store.reject_saves_of(Some(AssessmentStatus::Completed));

    let started = orchestrator
        .initiate(AssessmentRequest::new("Lido", [LIDO]))
        .await
        .unwrap();
    let progress = wait_until_terminal(&orchestrator, &started.assessment_id).await;
    assert_eq!(progress.status, AssessmentStatus::Failed);
    assert!(progress
        .error
        .as_deref()
        .unwrap()
        .contains("failed to persist result"));
    assert!(orchestrator.active().is_empty());

    let record = store.find_by_id(&started.assessment_id).await.unwrap().unwrap();
    assert_eq!(record.status, AssessmentStatus::Failed);
    assert!(record.completed_at.is_some());
    assert_eq!(
        orchestrator.result(&started.assessment_id).await.unwrap_err().code(),
        "ASSESSMENT_NOT_COMPLETED"
    );
}

#[tokio::test]
async fn test_status_is_stable_after_completion() {
    let orchestrator = create_test_orchestrator(MockChain::default());
    let started = orchestrator
        .initiate(AssessmentRequest::new("Lido", [LIDO]))
        .await
        .unwrap();
    wait_until_terminal(&orchestrator, &started.assessment_id).await;

    let first = orchestrator.status(&started.assessment_id).await.unwrap();
    let second = orchestrator.status(&started.assessment_id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.progress, 100);

    let err = orchestrator.cancel(&started.assessment_id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");
}

#[tokio::test]
async fn test_unknown_assessment_not_found() {
    let orchestrator = create_test_orchestrator(MockChain::default());
    assert_eq!(
        orchestrator.status("missing").await.unwrap_err().code(),
        "ASSESSMENT_NOT_FOUND"
    );
    assert_eq!(
        orchestrator.result("missing").await.unwrap_err().code(),
        "ASSESSMENT_NOT_FOUND"
    );
    assert_eq!(
        orchestrator.cancel("missing").await.unwrap_err().code(),
        "ASSESSMENT_NOT_FOUND"
    );
}

#[tokio::test]
async fn test_malformed_ids_not_found_with_file_store() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(temp_dir.path()));
    let orchestrator = Orchestrator::builder(
        store.clone(),
        store,
        Arc::new(MockChain::default()),
        Arc::new(MockOffchain { listed: true }),
    )
    .build();

    for id in ["a.b", "../etc/passwd", ""] {
        assert_eq!(
            orchestrator.status(id).await.unwrap_err().code(),
            "ASSESSMENT_NOT_FOUND"
        );
        assert_eq!(
            orchestrator.result(id).await.unwrap_err().code(),
            "ASSESSMENT_NOT_FOUND"
        );
        assert_eq!(
            orchestrator.cancel(id).await.unwrap_err().code(),
            "ASSESSMENT_NOT_FOUND"
        );
    }

    let err = orchestrator
        .initiate(AssessmentRequest::for_protocol("a.b"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PROTOCOL_NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_requests_rejected() {
    let orchestrator = create_test_orchestrator(MockChain::default());

    let err = orchestrator
        .initiate(AssessmentRequest::new("Lido", ["not-an-address"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");

    let err = orchestrator
        .initiate(AssessmentRequest::new("Lido", Vec::<String>::new()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");

    let err = orchestrator
        .initiate(AssessmentRequest::for_protocol("no-such-protocol"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PROTOCOL_NOT_FOUND");
}

#[tokio::test]
async fn test_known_protocol_is_reused() {
    let orchestrator = create_test_orchestrator(MockChain::default());
    let first = orchestrator
        .initiate(AssessmentRequest::new("Lido", [LIDO]))
        .await
        .unwrap();
    wait_until_terminal(&orchestrator, &first.assessment_id).await;

    // Same address, different casing: duplicate is allowed and reuses the protocol.
    let second = orchestrator
        .initiate(AssessmentRequest::new("Lido", [LIDO.to_ascii_uppercase().replace("0X", "0x")]))
        .await
        .unwrap();
    assert_eq!(second.protocol_id, first.protocol_id);
    assert_ne!(second.assessment_id, first.assessment_id);

    let third = orchestrator
        .initiate(AssessmentRequest::for_protocol(first.protocol_id.clone()))
        .await
        .unwrap();
    assert_eq!(third.protocol_id, first.protocol_id);

    wait_until_terminal(&orchestrator, &second.assessment_id).await;
    wait_until_terminal(&orchestrator, &third.assessment_id).await;
}

#[tokio::test]
async fn test_list_filters_and_limit() {
    let orchestrator = create_test_orchestrator(MockChain::default());
    let lido = orchestrator
        .initiate(AssessmentRequest::new("Lido", [LIDO]))
        .await
        .unwrap();
    let uniswap = orchestrator
        .initiate(AssessmentRequest::new("Uniswap", [UNISWAP]))
        .await
        .unwrap();
    wait_until_terminal(&orchestrator, &lido.assessment_id).await;
    wait_until_terminal(&orchestrator, &uniswap.assessment_id).await;

    let all = orchestrator.list(&AssessmentFilters::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].created_at >= all[1].created_at);

    let only_lido = orchestrator
        .list(&AssessmentFilters {
            protocol_id: Some(lido.protocol_id.clone()),
            ..AssessmentFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(only_lido.len(), 1);
    assert_eq!(only_lido[0].id, lido.assessment_id);

    let completed = orchestrator
        .list(&AssessmentFilters {
            status: Some(AssessmentStatus::Completed),
            limit: Some(1),
            ..AssessmentFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);

    let failed = orchestrator
        .list(&AssessmentFilters {
            status: Some(AssessmentStatus::Failed),
            ..AssessmentFilters::default()
        })
        .await
        .unwrap();
    assert!(failed.is_empty());
}

#[tokio::test]
async fn test_reconfigure_scoring_validates() {
    let orchestrator = create_test_orchestrator(MockChain::default());

    let mut config = ScoringConfiguration::default();
    config.weights.technical = 0.9;
    let err = orchestrator.reconfigure_scoring(config).unwrap_err();
    assert_eq!(err.code(), "CONFIG_ERROR");
    assert_eq!(orchestrator.scoring_config(), ScoringConfiguration::default());

    let mut config = ScoringConfiguration::default();
    config.risk_thresholds.high = 50.0;
    orchestrator.reconfigure_scoring(config.clone()).unwrap();
    assert_eq!(orchestrator.scoring_config(), config);
}

#[tokio::test]
async fn test_results_survive_restart_with_file_store() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let build = || {
        let store = Arc::new(JsonFileStore::new(temp_dir.path()));
        Orchestrator::builder(
            store.clone(),
            store,
            Arc::new(MockChain::default()),
            Arc::new(MockOffchain { listed: true }),
        )
        .config(OrchestratorConfig::default().with_stage_delay_ms(0))
        .build()
    };

    let first = build();
    let started = first
        .initiate(AssessmentRequest::new("Lido", [LIDO]))
        .await
        .unwrap();
    wait_until_terminal(&first, &started.assessment_id).await;
    let before = first.result(&started.assessment_id).await.unwrap();
    drop(first);

    let reopened = build();
    let after = reopened.result(&started.assessment_id).await.unwrap();
    assert_eq!(before, after);
    let progress = reopened.status(&started.assessment_id).await.unwrap();
    assert_eq!(progress.status, AssessmentStatus::Completed);
    assert_eq!(progress.progress, 100);
}
