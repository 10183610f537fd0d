//! Deferred units of work.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

use crate::error::JobError;

/// Boxed future produced by one attempt of a job.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send>>;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A zero-argument deferred action plus its retry bookkeeping.
///
/// The action is a closure capturing its own parameters; it is called once
/// per attempt, so it must be able to build a fresh future each time.
pub struct Job {
    id: JobId,
    name: String,
    action: Box<dyn Fn() -> JobFuture + Send + Sync>,
    pub(crate) retries: u32,
    pub(crate) max_retries: Option<u32>,
}

impl Job {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self {
            id: JobId::new(),
            name: name.into(),
            action: Box::new(move || Box::pin(action())),
            retries: 0,
            max_retries: None,
        }
    }

    /// Override the queue-wide retry bound for this job.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retries performed so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub(crate) fn attempt(&self) -> JobFuture {
        (self.action)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("retries", &self.retries)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
