//! Error types for assessment orchestration and persistence.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::AssessmentStatus;

/// Result type for orchestrator and scoring operations.
pub type Result<T> = std::result::Result<T, AssessmentError>;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum AssessmentError {
    #[error("assessment not found: {id}")]
    NotFound { id: String },

    #[error("protocol not found: {id}")]
    ProtocolNotFound { id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("assessment {id} is not completed (status: {status})")]
    NotCompleted { id: String, status: AssessmentStatus },

    #[error("assessment {id} cannot be cancelled: {reason}")]
    InvalidState { id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Client(#[from] rampart_client::CallError),
}

impl AssessmentError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ASSESSMENT_NOT_FOUND",
            Self::ProtocolNotFound { .. } => "PROTOCOL_NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::NotCompleted { .. } => "ASSESSMENT_NOT_COMPLETED",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::Client(e) => e.code(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize record {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid record id: {0:?}")]
    InvalidId(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
