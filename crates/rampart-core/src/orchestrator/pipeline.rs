//! The background pipeline for one assessment.
//!
//! Stages run strictly in order: blockchain collection, off-chain
//! collection, the analyzer fan-out, scoring, completion. The whole run races
//! the assessment's cancellation token, so cancellation takes effect at the
//! next suspension point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Shared;
use crate::analyzers::{self, AnalysisInput, AnalyzerOutcome};
use crate::collect::{collect_chain_data, collect_offchain_data};
use crate::model::{
    AnalysisDepth, AssessmentStatus, CategoryScores, Finding, Protocol, ScoreCategory,
};
use crate::scoring::ScoringResult;

/// Progress reached at the end of each stage.
const BLOCKCHAIN: (&str, u8, u8) = ("blockchain", 10, 30);
const OFFCHAIN: (&str, u8, u8) = ("offchain", 30, 50);
const ANALYSIS: (&str, u8, u8) = ("analysis", 50, 80);
const SCORING: (&str, u8, u8) = ("scoring", 80, 95);

struct Completed {
    result: ScoringResult,
    findings: Vec<Finding>,
    data_sources: Vec<String>,
    warnings: Vec<String>,
    degraded: Vec<ScoreCategory>,
}

pub(super) async fn run(
    shared: Arc<Shared>,
    id: String,
    protocol: Protocol,
    depth: AnalysisDepth,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(assessment_id = %id, "pipeline stopped after cancellation");
            return;
        }
        outcome = execute(&shared, &id, &protocol, depth, &cancel) => outcome,
    };

    match outcome {
        Ok(done) => complete(&shared, &id, &cancel, done, started.elapsed()).await,
        Err(e) => fail(&shared, &id, &cancel, format!("{:#}", e)).await,
    }
}

async fn execute(
    shared: &Shared,
    id: &str,
    protocol: &Protocol,
    depth: AnalysisDepth,
    cancel: &CancellationToken,
) -> anyhow::Result<Completed> {
    mark_in_progress(shared, id, cancel).await?;

    // 1. On-chain metadata, one address at a time.
    begin(shared, id, BLOCKCHAIN);
    info!(
        assessment_id = %id,
        stage = BLOCKCHAIN.0,
        addresses = protocol.contract_addresses.len(),
        "collecting blockchain data"
    );
    let chain = collect_chain_data(shared.chain.as_ref(), &protocol.contract_addresses).await;
    end(shared, id, BLOCKCHAIN).await;

    // 2. Off-chain listings and market data.
    begin(shared, id, OFFCHAIN);
    info!(assessment_id = %id, stage = OFFCHAIN.0, "collecting off-chain data");
    let offchain = collect_offchain_data(shared.offchain.as_ref(), protocol).await;
    end(shared, id, OFFCHAIN).await;

    // 3. Concurrent analysis.
    begin(shared, id, ANALYSIS);
    info!(
        assessment_id = %id,
        stage = ANALYSIS.0,
        analyzers = shared.analyzers.len(),
        "running analyzers"
    );
    let mut warnings: Vec<String> = chain
        .failures
        .iter()
        .map(|(address, e)| format!("blockchain data unavailable for {}: {}", address, e))
        .chain(offchain.warnings.iter().cloned())
        .collect();

    let mut data_sources = Vec::new();
    if !chain.contracts.is_empty() {
        data_sources.push("explorer".to_string());
    }
    if offchain.protocol.is_some() {
        data_sources.push("protocol-data".to_string());
    }
    if offchain.market.is_some() {
        data_sources.push("market".to_string());
    }

    let input = Arc::new(AnalysisInput {
        assessment_id: id.to_string(),
        protocol: protocol.clone(),
        depth,
        as_of: Utc::now(),
        contracts: chain.contracts,
        unavailable_contracts: chain.failures.into_iter().map(|(a, _)| a).collect(),
        protocol_data: offchain.protocol,
        market: offchain.market,
    });
    let defaults = &shared.config.analyzer_defaults;
    let outcomes = analyzers::run_all(&shared.analyzers, Arc::clone(&input), defaults).await;
    end(shared, id, ANALYSIS).await;

    // 4. Scoring.
    begin(shared, id, SCORING);
    info!(assessment_id = %id, stage = SCORING.0, "scoring");

    let mut external = CategoryScores {
        technical: defaults.technical,
        governance: defaults.governance,
        liquidity: defaults.liquidity,
        reputation: defaults.reputation,
    };
    let mut findings = Vec::new();
    let mut degraded = Vec::new();
    for (category, outcome) in &outcomes {
        *external.get_mut(*category) = outcome.score();
        findings.extend_from_slice(outcome.findings());
        if let AnalyzerOutcome::Degraded { reason, .. } = outcome {
            degraded.push(*category);
            warnings.push(format!("{} analyzer degraded: {}", category, reason));
        }
    }
    if findings.iter().any(|f| f.source == analyzers::tool::SOURCE) {
        data_sources.push(analyzers::tool::SOURCE.to_string());
    }

    let engine = shared.scoring_engine();
    let result = engine.calculate(&findings, Some(&input.protocol_metadata()), Some(&external));
    set_progress(shared, id, SCORING.2);

    Ok(Completed {
        result,
        findings,
        data_sources,
        warnings,
        degraded,
    })
}

async fn mark_in_progress(
    shared: &Shared,
    id: &str,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let Some(_guard) = shared.registry.lock_live(id, cancel).await else {
        bail!("assessment is no longer active");
    };
    let mut record = shared
        .assessments
        .find_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("assessment record {} is missing", id))?;
    record.status = AssessmentStatus::InProgress;
    record.updated_at = Utc::now();
    shared.assessments.save(&record).await?;

    shared.registry.update(id, |p| p.status = AssessmentStatus::InProgress);
    Ok(())
}

fn begin(shared: &Shared, id: &str, (stage, start, _): (&str, u8, u8)) {
    shared.registry.update(id, |p| {
        p.current_stage = stage.to_string();
        p.progress = start;
    });
}

async fn end(shared: &Shared, id: &str, (_, _, done): (&str, u8, u8)) {
    set_progress(shared, id, done);
    let delay = shared.config.stage_delay();
    if delay > Duration::ZERO {
        tokio::time::sleep(delay).await;
    }
}

fn set_progress(shared: &Shared, id: &str, progress: u8) {
    shared.registry.update(id, |p| p.progress = progress);
}

async fn complete(
    shared: &Shared,
    id: &str,
    cancel: &CancellationToken,
    done: Completed,
    elapsed: Duration,
) {
    let Some(guard) = shared.registry.lock_live(id, cancel).await else {
        debug!(assessment_id = %id, "assessment no longer active; result dropped");
        return;
    };

    let record = match shared.assessments.find_by_id(id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            drop(guard);
            return fail(shared, id, cancel, "assessment record is missing".into()).await;
        }
        Err(e) => {
            drop(guard);
            return fail(shared, id, cancel, format!("failed to load record: {}", e)).await;
        }
    };

    let now = Utc::now();
    let Completed {
        result,
        findings,
        data_sources,
        mut warnings,
        degraded,
    } = done;
    warnings.push(format!("Assessment confidence: {:.0}%", result.confidence));

    let mut record = record;
    record.status = AssessmentStatus::Completed;
    record.overall_score = Some(result.overall_score);
    record.risk_level = Some(result.risk_level);
    record.category_scores = Some(result.category_scores);
    record.findings = findings;
    record.recommendations = result.recommendations;
    record.metadata.execution_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    record.metadata.data_sources = data_sources;
    record.metadata.warnings = warnings;
    record.metadata.confidence = Some(result.confidence);
    record.metadata.degraded_analyzers = degraded;
    record.updated_at = now;
    record.completed_at = Some(now);
    record.error = None;

    if let Err(e) = shared.assessments.save(&record).await {
        drop(guard);
        return fail(shared, id, cancel, format!("failed to persist result: {}", e)).await;
    }

    shared.registry.finish(id, |p| {
        p.status = AssessmentStatus::Completed;
        p.progress = 100;
        p.current_stage = "completed".to_string();
        p.completed_at = Some(now);
    });
    info!(
        assessment_id = %id,
        overall_score = result.overall_score,
        risk_level = ?result.risk_level,
        findings = record.findings.len(),
        "assessment completed"
    );
}

/// Pipeline-fatal error: mark FAILED unless already cancelled or finished.
async fn fail(shared: &Shared, id: &str, cancel: &CancellationToken, message: String) {
    let Some(_guard) = shared.registry.lock_live(id, cancel).await else {
        debug!(assessment_id = %id, error = %message, "assessment no longer active; failure dropped");
        return;
    };
    error!(assessment_id = %id, error = %message, "assessment failed");

    let now = Utc::now();
    match shared.assessments.find_by_id(id).await {
        Ok(Some(mut record)) => {
            record.mark_failed(message.as_str(), now);
            if let Err(e) = shared.assessments.save(&record).await {
                error!(assessment_id = %id, error = %e, "failed to persist failure");
            }
        }
        Ok(None) => warn!(assessment_id = %id, "assessment record missing while failing"),
        Err(e) => error!(assessment_id = %id, error = %e, "failed to load record while failing"),
    }

    shared.registry.finish(id, |p| {
        p.status = AssessmentStatus::Failed;
        p.current_stage = "failed".to_string();
        p.completed_at = Some(now);
        p.error = Some(message);
    });
}
