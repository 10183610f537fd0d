//! noema-daemon: wiring for the Noema belief graph.
//!
//! Turns episodes into serialized graph mutations, links contradictions,
//! reinforces salience and runs the periodic decay cycle.

pub mod error;
pub mod pipeline;
pub mod scheduler;
