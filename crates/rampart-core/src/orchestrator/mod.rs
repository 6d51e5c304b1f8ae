//! Assessment orchestration.
//!
//! An [`Orchestrator`] owns a registry of live assessments. `initiate`
//! persists a PENDING record and spawns the pipeline as a detached task;
//! everything else reads the registry or the durable record.
//!
//! ```text
//! PENDING ──► IN_PROGRESS ──► COMPLETED
//!    │             │
//!    └─────────────┴────────► FAILED   (pipeline error or cancel)
//! ```

mod pipeline;
mod registry;

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use rampart_client::{ExplorerClient, MarketClient, ProtocolDataClient};

use self::registry::Registry;
use crate::analyzers::{default_analyzers, Analyzer, ToolRunner};
use crate::collect::{ChainDataSource, OffchainClients, ProtocolDataSource};
use crate::config::{OrchestratorConfig, RampartConfig};
use crate::error::{AssessmentError, Result, StoreError, StoreResult};
use crate::model::{
    is_valid_address, AssessmentFilters, AssessmentProgress, AssessmentRequest, AssessmentStatus,
    InitiateResponse, Protocol, RiskAssessment,
};
use crate::scoring::{ScoringConfiguration, ScoringEngine};
use crate::store::{AssessmentStore, ProtocolStore};

/// Message recorded on an assessment cancelled through [`Orchestrator::cancel`].
pub const CANCELLED_MESSAGE: &str = "Assessment cancelled by user";

/// State shared between the orchestrator handle and its pipeline tasks.
pub(crate) struct Shared {
    assessments: Arc<dyn AssessmentStore>,
    protocols: Arc<dyn ProtocolStore>,
    chain: Arc<dyn ChainDataSource>,
    offchain: Arc<dyn ProtocolDataSource>,
    analyzers: Vec<Arc<dyn Analyzer>>,
    scoring: RwLock<Arc<ScoringEngine>>,
    config: OrchestratorConfig,
    registry: Registry,
}

impl Shared {
    /// The engine in effect now; a reconfiguration never affects a
    /// calculation already holding the previous one.
    fn scoring_engine(&self) -> Arc<ScoringEngine> {
        let engine = self.scoring.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*engine)
    }
}

pub struct OrchestratorBuilder {
    assessments: Arc<dyn AssessmentStore>,
    protocols: Arc<dyn ProtocolStore>,
    chain: Arc<dyn ChainDataSource>,
    offchain: Arc<dyn ProtocolDataSource>,
    analyzers: Option<Vec<Arc<dyn Analyzer>>>,
    scoring: ScoringEngine,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    /// Replace the four default analyzers.
    pub fn analyzers(mut self, analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        self.analyzers = Some(analyzers);
        self
    }

    pub fn scoring(mut self, engine: ScoringEngine) -> Self {
        self.scoring = engine;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            shared: Arc::new(Shared {
                assessments: self.assessments,
                protocols: self.protocols,
                chain: self.chain,
                offchain: self.offchain,
                analyzers: self.analyzers.unwrap_or_else(|| default_analyzers(None)),
                scoring: RwLock::new(Arc::new(self.scoring)),
                config: self.config,
                registry: Registry::default(),
            }),
        }
    }
}

/// Drives assessments from intake to a terminal state.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("analyzers", &self.shared.analyzers.len())
            .field("active", &self.shared.registry.snapshots().len())
            .finish()
    }
}

impl Orchestrator {
    pub fn builder(
        assessments: Arc<dyn AssessmentStore>,
        protocols: Arc<dyn ProtocolStore>,
        chain: Arc<dyn ChainDataSource>,
        offchain: Arc<dyn ProtocolDataSource>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            assessments,
            protocols,
            chain,
            offchain,
            analyzers: None,
            scoring: ScoringEngine::default(),
            config: OrchestratorConfig::default(),
        }
    }

    /// Wire the HTTP clients, analyzers and scoring engine described by
    /// `config` onto the given stores.
    pub fn from_config(
        config: &RampartConfig,
        assessments: Arc<dyn AssessmentStore>,
        protocols: Arc<dyn ProtocolStore>,
    ) -> Result<Self> {
        let chain = ExplorerClient::new(config.explorer.clone())?;
        let offchain = OffchainClients {
            protocols: ProtocolDataClient::new(config.protocol_data.clone())?,
            market: MarketClient::new(config.market.clone())?,
        };
        let tool = config.static_analysis.clone().map(ToolRunner::new);

        Ok(Self::builder(assessments, protocols, Arc::new(chain), Arc::new(offchain))
            .analyzers(default_analyzers(tool))
            .scoring(ScoringEngine::new(config.scoring_configuration())?)
            .config(config.orchestrator.clone())
            .build())
    }

    /// Accept an assessment request and start its pipeline in the
    /// background. Returns as soon as the PENDING record is stored.
    pub async fn initiate(&self, request: AssessmentRequest) -> Result<InitiateResponse> {
        let shared = &self.shared;
        let addresses = normalize_addresses(&request.contract_addresses)?;
        let protocol = self.resolve_protocol(&request, addresses).await?;

        self.warn_if_duplicate(&protocol).await;

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let duration = shared.config.depth_durations.for_depth(request.depth);
        let eta = now
            + ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::zero());

        let record = RiskAssessment::pending(id.as_str(), protocol.id.as_str(), request.depth, now);
        shared.assessments.save(&record).await?;

        let cancel = shared.registry.insert(AssessmentProgress {
            assessment_id: id.clone(),
            status: AssessmentStatus::Pending,
            progress: 0,
            current_stage: "queued".to_string(),
            started_at: now,
            estimated_completion_at: eta,
            completed_at: None,
            error: None,
        });

        info!(
            assessment_id = %id,
            protocol_id = %protocol.id,
            protocol = %protocol.name,
            depth = ?request.depth,
            "assessment initiated"
        );

        let response = InitiateResponse {
            assessment_id: id.clone(),
            protocol_id: protocol.id.clone(),
            status: AssessmentStatus::Pending,
            estimated_completion_time: eta,
            estimated_duration_secs: duration.as_secs(),
        };

        tokio::spawn(pipeline::run(
            Arc::clone(shared),
            id,
            protocol,
            request.depth,
            cancel,
        ));

        Ok(response)
    }

    /// Live progress while active, otherwise a coarse view of the record.
    pub async fn status(&self, id: &str) -> Result<AssessmentProgress> {
        if let Some(progress) = self.shared.registry.snapshot(id) {
            return Ok(progress);
        }

        let record = self.find_record(id).await?;
        let (progress, stage) = match record.status {
            AssessmentStatus::Completed => (100, "completed"),
            AssessmentStatus::Failed => (0, "failed"),
            AssessmentStatus::InProgress => (0, "in_progress"),
            AssessmentStatus::Pending => (0, "queued"),
        };
        Ok(AssessmentProgress {
            assessment_id: record.id,
            status: record.status,
            progress,
            current_stage: stage.to_string(),
            started_at: record.created_at,
            estimated_completion_at: record.completed_at.unwrap_or(record.updated_at),
            completed_at: record.completed_at,
            error: record.error,
        })
    }

    /// The durable record of a COMPLETED assessment.
    pub async fn result(&self, id: &str) -> Result<RiskAssessment> {
        let record = self.find_record(id).await?;
        if record.status != AssessmentStatus::Completed {
            return Err(AssessmentError::NotCompleted {
                id: id.to_string(),
                status: record.status,
            });
        }
        Ok(record)
    }

    /// Records matching `filters`, newest first.
    pub async fn list(&self, filters: &AssessmentFilters) -> Result<Vec<RiskAssessment>> {
        let mut records = match filters.protocol_id.as_deref() {
            Some(protocol_id) => self.shared.assessments.find_by_protocol_id(protocol_id).await?,
            None => self.shared.assessments.find_all().await?,
        };
        records.retain(|r| filters.matches(r));
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filters.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Mark an active assessment FAILED and stop its pipeline.
    ///
    /// The pipeline observes the token at its next suspension point; any
    /// result it produces afterwards is dropped. The live entry is released
    /// only once the FAILED record is persisted. If that write fails the
    /// entry reports the cancellation and a later `cancel` retries it.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let shared = &self.shared;
        let Some(_guard) = shared.registry.lock_gate(id).await else {
            return Err(self.not_active(id).await);
        };
        let Some(token) = shared.registry.token(id) else {
            return Err(self.not_active(id).await);
        };
        token.cancel();

        let now = Utc::now();
        if let Err(e) = self.persist_cancelled(id, now).await {
            warn!(assessment_id = %id, error = %e, "failed to persist cancellation");
            shared.registry.update(id, |p| mark_cancelled(p, now));
            return Err(e);
        }
        shared.registry.finish(id, |p| mark_cancelled(p, now));
        info!(assessment_id = %id, "assessment cancelled");
        Ok(())
    }

    /// Swap the scoring configuration. Assessments already scoring keep
    /// the engine they started with.
    pub fn reconfigure_scoring(&self, config: ScoringConfiguration) -> Result<()> {
        let mut engine = ScoringEngine::clone(&self.shared.scoring_engine());
        engine.reconfigure(config)?;
        let mut slot = self.shared.scoring.write().unwrap_or_else(|e| e.into_inner());
        *slot = Arc::new(engine);
        Ok(())
    }

    pub fn scoring_config(&self) -> ScoringConfiguration {
        self.shared.scoring_engine().config().clone()
    }

    /// Progress of every assessment still running.
    pub fn active(&self) -> Vec<AssessmentProgress> {
        let mut active = self.shared.registry.snapshots();
        active.retain(|p| !p.status.is_terminal());
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    async fn find_record(&self, id: &str) -> Result<RiskAssessment> {
        lookup(self.shared.assessments.find_by_id(id).await)?
            .ok_or_else(|| AssessmentError::NotFound { id: id.to_string() })
    }

    async fn persist_cancelled(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        if let Some(mut record) = self.shared.assessments.find_by_id(id).await? {
            record.mark_failed(CANCELLED_MESSAGE, now);
            self.shared.assessments.save(&record).await?;
        }
        Ok(())
    }

    async fn not_active(&self, id: &str) -> AssessmentError {
        match lookup(self.shared.assessments.find_by_id(id).await) {
            Ok(Some(record)) => AssessmentError::InvalidState {
                id: id.to_string(),
                reason: format!("assessment is already {}", record.status),
            },
            Ok(None) => AssessmentError::NotFound { id: id.to_string() },
            Err(e) => e.into(),
        }
    }

    /// By id, then any known address, then name; otherwise a new protocol.
    /// Addresses missing from a matched protocol are merged into it.
    async fn resolve_protocol(
        &self,
        request: &AssessmentRequest,
        addresses: Vec<String>,
    ) -> Result<Protocol> {
        let store = &self.shared.protocols;

        let existing = if let Some(protocol_id) = request.protocol_id.as_deref() {
            Some(lookup(store.find_protocol(protocol_id).await)?.ok_or_else(|| {
                AssessmentError::ProtocolNotFound {
                    id: protocol_id.to_string(),
                }
            })?)
        } else {
            let mut found = None;
            for address in &addresses {
                found = store.find_protocol_by_address(address).await?;
                if found.is_some() {
                    break;
                }
            }
            match found {
                Some(protocol) => Some(protocol),
                None if !request.name.trim().is_empty() => {
                    store.find_protocol_by_name(&request.name).await?
                }
                None => None,
            }
        };

        let now = Utc::now();
        if let Some(mut protocol) = existing {
            let new: Vec<String> = addresses
                .into_iter()
                .filter(|a| !protocol.has_address(a))
                .collect();
            if !new.is_empty() {
                protocol.contract_addresses.extend(new);
                protocol.updated_at = now;
                store.save_protocol(&protocol).await?;
            }
            if protocol.contract_addresses.is_empty() {
                return Err(AssessmentError::InvalidRequest(format!(
                    "protocol {} has no contract addresses",
                    protocol.id
                )));
            }
            return Ok(protocol);
        }

        let name = request.name.trim();
        if name.is_empty() {
            return Err(AssessmentError::InvalidRequest(
                "protocol name is required".into(),
            ));
        }
        if addresses.is_empty() {
            return Err(AssessmentError::InvalidRequest(
                "at least one contract address is required".into(),
            ));
        }

        let protocol = Protocol {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            contract_addresses: addresses,
            chain: request
                .chain
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| "ethereum".to_string()),
            website: request.website.clone(),
            category: request.category.clone(),
            created_at: now,
            updated_at: now,
        };
        store.save_protocol(&protocol).await?;
        info!(protocol_id = %protocol.id, protocol = %protocol.name, "protocol registered");
        Ok(protocol)
    }

    /// Advisory only; duplicates are allowed.
    async fn warn_if_duplicate(&self, protocol: &Protocol) {
        let hours = i64::try_from(self.shared.config.duplicate_window_hours).unwrap_or(i64::MAX);
        let window = ChronoDuration::try_hours(hours).unwrap_or(ChronoDuration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        match self.shared.assessments.find_by_protocol_id(&protocol.id).await {
            Ok(records) => {
                let recent = records.iter().find(|r| {
                    r.status == AssessmentStatus::Completed
                        && r.completed_at.is_some_and(|t| t >= cutoff)
                });
                if let Some(recent) = recent {
                    warn!(
                        protocol_id = %protocol.id,
                        previous_assessment_id = %recent.id,
                        "protocol already assessed recently; starting another assessment"
                    );
                }
            }
            Err(e) => warn!(protocol_id = %protocol.id, error = %e, "duplicate check failed"),
        }
    }
}

/// An id the store cannot hold cannot name an existing record.
fn lookup<T>(found: StoreResult<Option<T>>) -> StoreResult<Option<T>> {
    match found {
        Err(StoreError::InvalidId(_)) => Ok(None),
        other => other,
    }
}

fn mark_cancelled(progress: &mut AssessmentProgress, now: DateTime<Utc>) {
    progress.status = AssessmentStatus::Failed;
    progress.current_stage = "cancelled".to_string();
    progress.completed_at = Some(now);
    progress.error = Some(CANCELLED_MESSAGE.to_string());
}

/// Trim, lowercase, validate and dedupe, preserving first-seen order.
fn normalize_addresses(addresses: &[String]) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(addresses.len());
    for address in addresses {
        let address = address.trim();
        if !is_valid_address(address) {
            return Err(AssessmentError::InvalidRequest(format!(
                "invalid contract address: {:?}",
                address
            )));
        }
        let address = address.to_ascii_lowercase();
        if !normalized.contains(&address) {
            normalized.push(address);
        }
    }
    Ok(normalized)
}
