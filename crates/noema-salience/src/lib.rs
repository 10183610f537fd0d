//! Salience scoring for the Noema belief graph.
//!
//! Nodes gain salience when they are used (direct activation), when their
//! neighbours are used (network reinforcement) and when they are well
//! anchored (structural boost). A periodic decay cycle wears salience down
//! and evicts nodes that are stale, isolated, doubtful or dismissed.

pub mod decay;
pub mod engine;
pub mod error;
pub mod scoring;

pub use decay::{DecayCheckpoint, DecayStats};
pub use engine::SalienceEngine;
pub use error::{Result, SalienceError};
pub use scoring::{DeletionReason, NodeSignals, TriggerType};
