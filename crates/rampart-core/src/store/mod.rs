//! Persistence for assessments and protocols.
//!
//! Stores are read-after-write consistent per id. There are no cross-record
//! transactions.

mod file;
mod memory;

use async_trait::async_trait;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::StoreResult;
use crate::model::{Protocol, RiskAssessment};

#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Insert or replace the record with `record.id`.
    async fn save(&self, record: &RiskAssessment) -> StoreResult<()>;

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<RiskAssessment>>;

    /// All records, in no particular order.
    async fn find_all(&self) -> StoreResult<Vec<RiskAssessment>>;

    async fn find_by_protocol_id(&self, protocol_id: &str) -> StoreResult<Vec<RiskAssessment>>;
}

#[async_trait]
pub trait ProtocolStore: Send + Sync {
    async fn save_protocol(&self, protocol: &Protocol) -> StoreResult<()>;

    async fn find_protocol(&self, id: &str) -> StoreResult<Option<Protocol>>;

    /// Case-insensitive.
    async fn find_protocol_by_name(&self, name: &str) -> StoreResult<Option<Protocol>>;

    /// Case-insensitive.
    async fn find_protocol_by_address(&self, address: &str) -> StoreResult<Option<Protocol>>;
}
