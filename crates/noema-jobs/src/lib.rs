//! Serialized mutation queue for the Noema belief graph.
//!
//! Graph writes arrive from many producers but must be applied one at a
//! time in arrival order. [`JobQueue`] owns that ordering together with the
//! bounded retry policy for transient store failures.

pub mod error;
pub mod job;
pub mod queue;

pub use error::JobError;
pub use job::{Job, JobFuture, JobId};
pub use queue::{JobQueue, QueueStats};
