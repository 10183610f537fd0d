//! Noema Graph — storage adapters for the belief graph.
//!
//! The engines only see the [`GraphStore`] trait. Two adapters implement it:
//! [`GraphClient`] talks to Neo4j, [`MemoryGraphStore`] keeps the graph in
//! process. Adapters tag each error retryable or permanent at the point of
//! failure.

pub mod client;
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod store;

pub use client::GraphClient;
pub use memory::MemoryGraphStore;
pub use store::{
    AttributeUpdate, GraphStore, SalienceWrite, StoreError, StoreErrorKind, StoreResult,
    TraversalHit,
};
