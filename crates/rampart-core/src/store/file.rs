//! One JSON document per record under a root directory.
//!
//! ```text
//! {root}/assessments/{id}.json
//! {root}/protocols/{id}.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::warn;

use super::{AssessmentStore, ProtocolStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{Protocol, RiskAssessment};

const ASSESSMENTS_DIR: &str = "assessments";
const PROTOCOLS_DIR: &str = "protocols";

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform data dir, e.g. `~/.local/share/rampart`.
    pub fn default_root() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("rampart"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, kind: &str, id: &str) -> StoreResult<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(kind).join(format!("{}.json", id)))
    }

    async fn write<T: Serialize>(&self, kind: &str, id: &str, value: &T) -> StoreResult<()> {
        let path = self.record_path(kind, id)?;
        let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
            id: id.to_string(),
            source,
        })?;

        let dir = self.root.join(kind);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        // Unique temp name so concurrent writers never share a temp file.
        let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&temp_path, &json)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(&path, e));
        }
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, kind: &str, id: &str) -> StoreResult<Option<T>> {
        let path = self.record_path(kind, id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(parse_record(&path, &bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    async fn read_all<T: DeserializeOwned>(&self, kind: &str) -> StoreResult<Vec<T>> {
        let dir = self.root.join(kind);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(bytes) => records.extend(parse_record(&path, &bytes)),
                // Removed between listing and reading.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        Ok(records)
    }
}

/// Corrupt documents are logged and skipped.
fn parse_record<T: DeserializeOwned>(path: &Path, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unreadable record");
            None
        }
    }
}

#[async_trait]
impl AssessmentStore for JsonFileStore {
    async fn save(&self, record: &RiskAssessment) -> StoreResult<()> {
        self.write(ASSESSMENTS_DIR, &record.id, record).await
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<RiskAssessment>> {
        self.read(ASSESSMENTS_DIR, id).await
    }

    async fn find_all(&self) -> StoreResult<Vec<RiskAssessment>> {
        self.read_all(ASSESSMENTS_DIR).await
    }

    async fn find_by_protocol_id(&self, protocol_id: &str) -> StoreResult<Vec<RiskAssessment>> {
        let mut records: Vec<RiskAssessment> = self.read_all(ASSESSMENTS_DIR).await?;
        records.retain(|r| r.protocol_id == protocol_id);
        Ok(records)
    }
}

#[async_trait]
impl ProtocolStore for JsonFileStore {
    async fn save_protocol(&self, protocol: &Protocol) -> StoreResult<()> {
        self.write(PROTOCOLS_DIR, &protocol.id, protocol).await
    }

    async fn find_protocol(&self, id: &str) -> StoreResult<Option<Protocol>> {
        self.read(PROTOCOLS_DIR, id).await
    }

    async fn find_protocol_by_name(&self, name: &str) -> StoreResult<Option<Protocol>> {
        let protocols: Vec<Protocol> = self.read_all(PROTOCOLS_DIR).await?;
        Ok(protocols
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim())))
    }

    async fn find_protocol_by_address(&self, address: &str) -> StoreResult<Option<Protocol>> {
        let protocols: Vec<Protocol> = self.read_all(PROTOCOLS_DIR).await?;
        Ok(protocols.into_iter().find(|p| p.has_address(address)))
    }
}
