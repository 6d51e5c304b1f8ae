//! External static-analysis tool runner.
//!
//! Spawns a Slither-style detector per contract address and maps its JSON
//! report (`results.detectors[]`) onto TECHNICAL findings. The child is
//! killed when the per-invocation timeout expires.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::model::{Finding, FindingCategory, Severity};

const ADDRESS_PLACEHOLDER: &str = "{address}";
/// Producer id on tool findings.
pub const SOURCE: &str = "static-analysis";
const STDERR_CAP: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticAnalysisConfig {
    pub program: String,
    /// `{address}` is replaced with the contract address.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_args() -> Vec<String> {
    vec![ADDRESS_PLACEHOLDER.to_string(), "--json".into(), "-".into()]
}

fn default_timeout_ms() -> u64 {
    120_000
}

impl StaticAnalysisConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: default_args(),
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ToolRunner {
    config: StaticAnalysisConfig,
}

impl ToolRunner {
    pub fn new(config: StaticAnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StaticAnalysisConfig {
        &self.config
    }

    /// Analyze one address. Missing binary, timeout, or an unparseable
    /// report is an error.
    pub async fn run(&self, address: &str) -> Result<Vec<Finding>> {
        let args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|a| a.replace(ADDRESS_PLACEHOLDER, address))
            .collect();

        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning static-analysis tool: {}", self.config.program))?;

        let timeout = Duration::from_millis(self.config.timeout_ms);
        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.context("waiting for static-analysis tool")?,
            Err(_) => bail!(
                "static-analysis tool timed out after {}ms",
                self.config.timeout_ms
            ),
        };

        debug!(
            program = %self.config.program,
            address,
            exit_code = ?output.status.code(),
            "static-analysis tool finished"
        );

        // Detectors exit non-zero when they report issues; the JSON decides.
        match serde_json::from_slice::<Value>(&output.stdout) {
            Ok(report) => parse_report(&report, address),
            Err(e) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stderr = clip(&stderr, STDERR_CAP);
                bail!(
                    "static-analysis tool produced no JSON report (exit {:?}): {}; stderr: {}",
                    output.status.code(),
                    e,
                    stderr.trim()
                )
            }
        }
    }
}

/// Longest prefix of `text` within `max_bytes` that ends on a char boundary.
fn clip(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Map `results.detectors[]` onto findings.
pub fn parse_report(report: &Value, address: &str) -> Result<Vec<Finding>> {
    if report.get("success").and_then(Value::as_bool) == Some(false) {
        let error = report
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("static-analysis tool reported failure: {}", error);
    }

    let detectors = report
        .pointer("/results/detectors")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    Ok(detectors
        .iter()
        .map(|d| {
            let text = |field: &str| d.get(field).and_then(Value::as_str).unwrap_or_default();
            let check = text("check");
            let title = if check.is_empty() {
                "Static analysis issue".to_string()
            } else {
                format!("Static analysis: {}", check)
            };

            Finding::new(
                FindingCategory::Technical,
                impact_severity(text("impact")),
                title,
                SOURCE,
            )
            .with_description(text("description").trim())
            .with_recommendation("Review and remediate the flagged code path")
            .with_confidence(confidence_score(text("confidence")))
            .with_metadata("address", Value::String(address.to_string()))
            .with_metadata("check", Value::String(check.to_string()))
        })
        .collect())
}

fn impact_severity(impact: &str) -> Severity {
    match impact.to_ascii_lowercase().as_str() {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "medium" => Severity::Medium,
        "low" => Severity::Low,
        _ => Severity::Info,
    }
}

fn confidence_score(confidence: &str) -> u8 {
    match confidence.to_ascii_lowercase().as_str() {
        "high" => 90,
        "medium" => 60,
        _ => 30,
    }
}
