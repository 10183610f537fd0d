//! Error type returned by job actions.

use noema_graph::StoreError;

/// Why a job attempt failed, and whether the queue may try again.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    /// A transient failure; the queue backs off and retries.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not go away; the job is dropped.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Store errors keep the tag their adapter gave them.
impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        Self {
            retryable: e.retryable,
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noema_graph::StoreErrorKind;

    #[test]
    fn store_errors_keep_their_tag() {
        let transient: JobError =
            StoreError::retryable(StoreErrorKind::Connection, "timeout").into();
        assert!(transient.is_retryable());

        let permanent: JobError = StoreError::permanent(StoreErrorKind::NotFound, "gone").into();
        assert!(!permanent.is_retryable());
        assert!(permanent.message.contains("gone"));
    }
}
