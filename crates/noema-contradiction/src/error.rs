use noema_core::{AlertId, NoemaError};
use noema_graph::StoreError;
use noema_jobs::JobError;

/// Failure of a classifier call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassifierError {
    /// The backend could not be reached or returned an error.
    #[error("classifier transport error: {0}")]
    Transport(String),

    /// The backend answered, but not in a shape we can read.
    #[error("malformed classifier response: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ContradictionError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] NoemaError),

    #[error("alert {0} not found")]
    AlertNotFound(AlertId),
}

impl ContradictionError {
    /// Transport failures and retryable store errors may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Classifier(ClassifierError::Transport(_)) => true,
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<ContradictionError> for JobError {
    fn from(e: ContradictionError) -> Self {
        if e.is_retryable() {
            JobError::retryable(e.to_string())
        } else {
            JobError::fatal(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ContradictionError>;
