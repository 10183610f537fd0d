//! Error types for the noema-daemon crate.

use thiserror::Error;

use noema_jobs::JobError;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Config error: {0}")]
    Config(#[from] noema_core::NoemaError),

    #[error("Graph error: {0}")]
    Store(#[from] noema_graph::StoreError),

    #[error("Contradiction error: {0}")]
    Contradiction(#[from] noema_contradiction::ContradictionError),

    #[error("Salience error: {0}")]
    Salience(#[from] noema_salience::SalienceError),

    #[error("Extraction failed: {0}")]
    Extraction(String),
}

impl DaemonError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Contradiction(e) => e.is_retryable(),
            Self::Salience(e) => e.is_retryable(),
            Self::Config(_) | Self::Extraction(_) => false,
        }
    }
}

impl From<DaemonError> for JobError {
    fn from(e: DaemonError) -> Self {
        if e.is_retryable() {
            JobError::retryable(e.to_string())
        } else {
            JobError::fatal(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
