//! The graph-store capability consumed by the core engines.
//!
//! Engines depend on [`GraphStore`] only; adapters (Neo4j, in-process)
//! decide at the point of failure whether an error is worth retrying.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use noema_core::{clamp_unit, EdgeId, GraphEdge, GraphNode, GroupId, NodeId};

/// What went wrong inside a store adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Connection,
    Query,
    NotFound,
    Serialization,
    Invariant,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Query => "query",
            Self::NotFound => "not found",
            Self::Serialization => "serialization",
            Self::Invariant => "invariant",
        };
        f.write_str(s)
    }
}

/// Error returned by every [`GraphStore`] operation.
///
/// `retryable` is set deliberately by the adapter; callers never infer it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("graph store {kind} error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl StoreError {
    pub fn retryable(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// How a salience value is written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SalienceWrite {
    /// Replace the stored value.
    Set(f64),
    /// Add to the stored value.
    Add(f64),
}

impl SalienceWrite {
    /// Resolve against the stored value, clamped to `[0, 1]`.
    pub fn apply(self, current: f64) -> f64 {
        match self {
            Self::Set(v) => clamp_unit(v),
            Self::Add(d) => clamp_unit(current + d),
        }
    }
}

/// A partial update of one node's attribute bag.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeUpdate {
    pub node_id: NodeId,
    pub salience: Option<SalienceWrite>,
    pub confidence: Option<f64>,
    pub add_flags: Vec<String>,
    /// New `updated_at`, when the write counts as a use of the node.
    pub updated_at: Option<DateTime<Utc>>,
    pub decayed_at: Option<DateTime<Utc>>,
}

impl AttributeUpdate {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            salience: None,
            confidence: None,
            add_flags: Vec::new(),
            updated_at: None,
            decayed_at: None,
        }
    }

    pub fn set_salience(mut self, value: f64) -> Self {
        self.salience = Some(SalienceWrite::Set(clamp_unit(value)));
        self
    }

    pub fn add_salience(mut self, delta: f64) -> Self {
        self.salience = Some(SalienceWrite::Add(delta));
        self
    }

    pub fn set_confidence(mut self, value: f64) -> Self {
        self.confidence = Some(clamp_unit(value));
        self
    }

    pub fn add_flag(mut self, flag: &str) -> Self {
        self.add_flags.push(flag.to_string());
        self
    }

    pub fn touched_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    pub fn decayed_at(mut self, at: DateTime<Utc>) -> Self {
        self.decayed_at = Some(at);
        self
    }

    /// Apply to an in-memory node.
    pub fn apply_to(&self, node: &mut GraphNode) {
        if let Some(write) = self.salience {
            node.salience = write.apply(node.salience);
        }
        if let Some(confidence) = self.confidence {
            node.confidence = clamp_unit(confidence);
        }
        for flag in &self.add_flags {
            node.flags.insert(flag.clone());
        }
        if let Some(at) = self.updated_at {
            node.updated_at = at;
        }
        if let Some(at) = self.decayed_at {
            node.decayed_at = Some(at);
        }
    }
}

/// One node reached by a traversal, along one path.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalHit {
    pub node_id: NodeId,
    /// Path length in edges (>= 1).
    pub hops: u32,
    /// Product of the confidences of the traversed edges.
    pub path_confidence: f64,
}

/// Capability interface over the attributed belief graph.
///
/// Every call may fail with a [`StoreError`] tagged retryable or not.
/// A single call (one batch update, one batch delete) is atomic at the store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn get_node(&self, id: &NodeId) -> StoreResult<Option<GraphNode>>;

    /// Insert or replace a node. `created_at` and existing labels are kept,
    /// so the cognitive marker can never be removed.
    async fn upsert_node(&self, node: &GraphNode) -> StoreResult<()>;

    /// Create an edge. Both endpoints must exist.
    async fn create_edge(&self, edge: &GraphEdge) -> StoreResult<()>;

    /// Stamp an edge as no longer valid. The edge itself is kept.
    async fn invalidate_edge(&self, id: &EdgeId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Edges connecting `a` and `b`, in either direction.
    async fn edges_between(&self, a: &NodeId, b: &NodeId) -> StoreResult<Vec<GraphEdge>>;

    /// Every edge touching `node`.
    async fn edges_of(&self, node: &NodeId) -> StoreResult<Vec<GraphEdge>>;

    /// Walk up to `max_hops` edges (either direction) from `start`.
    /// One hit per simple path; the start node is never returned.
    async fn traverse(
        &self,
        start: &NodeId,
        max_hops: u32,
        label_filter: Option<&str>,
        group_filter: Option<&GroupId>,
    ) -> StoreResult<Vec<TraversalHit>>;

    /// Apply updates atomically. Returns how many nodes were written.
    async fn batch_update_attributes(&self, updates: &[AttributeUpdate]) -> StoreResult<usize>;

    /// Detach-delete nodes with their edges. Returns how many were deleted.
    async fn batch_delete(&self, ids: &[NodeId]) -> StoreResult<usize>;

    /// Distinct neighbours of `id`, optionally only those whose confidence
    /// is strictly above `confidence_threshold`.
    async fn count_neighbors(
        &self,
        id: &NodeId,
        confidence_threshold: Option<f64>,
    ) -> StoreResult<usize>;

    /// Cognitive nodes ordered by id, strictly after `after`.
    async fn list_cognitive_nodes(
        &self,
        group: Option<&GroupId>,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<GraphNode>>;
}
