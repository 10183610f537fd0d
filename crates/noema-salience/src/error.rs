use noema_graph::StoreError;
use noema_jobs::JobError;

#[derive(Debug, thiserror::Error)]
pub enum SalienceError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SalienceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
        }
    }
}

impl From<SalienceError> for JobError {
    fn from(e: SalienceError) -> Self {
        match e {
            SalienceError::Store(store) => store.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SalienceError>;
