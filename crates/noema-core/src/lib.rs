//! noema-core: Shared types, configuration, and error handling for Noema.
//!
//! This crate provides the foundational types used across all Noema components:
//! - Cognitive nodes and fact edges of the belief graph
//! - Contradiction alerts and their lifecycle events
//! - Configuration management
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::NoemaError;
pub use events::{AlertEvent, AlertId, AlertStatus, ContradictionAlert, Severity};
pub use types::{
    clamp_unit, flags, labels, EdgeId, EpisodeId, GraphEdge, GraphNode, GroupId, NodeId,
    CONTRADICTS,
};
