use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AssessmentStore, ProtocolStore};
use crate::error::StoreResult;
use crate::model::{Protocol, RiskAssessment};

/// In-process store, for tests and single-run use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    assessments: RwLock<HashMap<String, RiskAssessment>>,
    protocols: RwLock<HashMap<String, Protocol>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    async fn save(&self, record: &RiskAssessment) -> StoreResult<()> {
        self.assessments
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<RiskAssessment>> {
        Ok(self.assessments.read().await.get(id).cloned())
    }

    async fn find_all(&self) -> StoreResult<Vec<RiskAssessment>> {
        Ok(self.assessments.read().await.values().cloned().collect())
    }

    async fn find_by_protocol_id(&self, protocol_id: &str) -> StoreResult<Vec<RiskAssessment>> {
        Ok(self
            .assessments
            .read()
            .await
            .values()
            .filter(|a| a.protocol_id == protocol_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProtocolStore for MemoryStore {
    async fn save_protocol(&self, protocol: &Protocol) -> StoreResult<()> {
        self.protocols
            .write()
            .await
            .insert(protocol.id.clone(), protocol.clone());
        Ok(())
    }

    async fn find_protocol(&self, id: &str) -> StoreResult<Option<Protocol>> {
        Ok(self.protocols.read().await.get(id).cloned())
    }

    async fn find_protocol_by_name(&self, name: &str) -> StoreResult<Option<Protocol>> {
        Ok(self
            .protocols
            .read()
            .await
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
            .cloned())
    }

    async fn find_protocol_by_address(&self, address: &str) -> StoreResult<Option<Protocol>> {
        Ok(self
            .protocols
            .read()
            .await
            .values()
            .find(|p| p.has_address(address))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalysisDepth, AssessmentStatus};
    use chrono::Utc;

    #[tokio::test]
    async fn test_save_replaces_and_filters_by_protocol() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut a = RiskAssessment::pending("a1", "p1", AnalysisDepth::Basic, now);
        store.save(&a).await.unwrap();
        store
            .save(&RiskAssessment::pending("a2", "p2", AnalysisDepth::Basic, now))
            .await
            .unwrap();

        a.status = AssessmentStatus::Completed;
        store.save(&a).await.unwrap();

        let found = store.find_by_id("a1").await.unwrap().unwrap();
        assert_eq!(found.status, AssessmentStatus::Completed);
        assert_eq!(store.find_all().await.unwrap().len(), 2);
        assert_eq!(store.find_by_protocol_id("p2").await.unwrap().len(), 1);
        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_protocol_lookups_case_insensitive() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .save_protocol(&Protocol {
                id: "p1".into(),
                name: "Curve".into(),
                contract_addresses: vec!["0xabcdef".into()],
                chain: "ethereum".into(),
                website: None,
                category: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        assert!(store.find_protocol_by_name("curve").await.unwrap().is_some());
        assert!(store
            .find_protocol_by_address("0xABCDEF")
            .await
            .unwrap()
            .is_some());
        assert!(store.find_protocol("p2").await.unwrap().is_none());
    }
}
