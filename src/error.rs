//! Error taxonomy shared by the scoring core and the HTTP surface

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Anomaly models are not loaded")]
    ModelsNotReady,

    #[error("Dataset is not loaded")]
    DatasetNotLoaded,

    #[error("Transaction {index} not found (dataset has {len} rows)")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("Upstream generation failed: {0}")]
    UpstreamGeneration(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ServiceError {
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamGeneration(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
