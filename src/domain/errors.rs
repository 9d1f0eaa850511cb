use thiserror::Error;

use crate::infrastructure::broker::BrokerError;
use crate::infrastructure::external_sink::SinkError;
use crate::infrastructure::repository::StorageError;

/// Failure of a worker while handling one message or one scheduled run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Delivery failed: {0}")]
    Delivery(#[from] BrokerError),
    #[error("External sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("Unsupported dashboard type: {0}")]
    UnsupportedDashboardType(String),
    #[error("Malformed message: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Data,
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PipelineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Delivery(_) | PipelineError::Sink(_) | PipelineError::Storage(_) => {
                ErrorClass::Transient
            }
            PipelineError::NotFound { .. }
            | PipelineError::UnsupportedDashboardType(_)
            | PipelineError::Malformed(_) => ErrorClass::Data,
        }
    }

    /// Whether a caller could sensibly try again. Nothing in the pipeline
    /// retries automatically; this only drives logging and caller decisions.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        PipelineError::Malformed(error.to_string())
    }
}
