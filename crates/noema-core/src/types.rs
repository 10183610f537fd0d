//! Core domain types for the Noema knowledge graph.
//!
//! A node is a "cognitive object" (a belief, preference, or idea) extracted
//! from an episode; an edge is a fact relating two nodes. Both are shared by
//! the graph adapters, the contradiction engine and the salience engine.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NoemaError;

// ── Identifiers ───────────────────────────────────────────────────

/// Partition key isolating one user's or session's subgraph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for any node in the knowledge graph.
///
/// Ordered so adapters can paginate by id (keyset pagination).
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an edge in the knowledge graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the ingested unit of text (message, document chunk)
/// that produced a mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EpisodeId(pub Uuid);

impl EpisodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EpisodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Labels & Flags ────────────────────────────────────────────────

/// Node labels understood by the core.
pub mod labels {
    /// Every node written by the extraction pipeline.
    pub const ENTITY: &str = "Entity";
    /// Marker for nodes representing a belief or idea.
    pub const COGNITIVE: &str = "CognitiveObject";
}

/// Well-known node flags.
pub mod flags {
    pub const TRACKED: &str = "tracked";
    pub const CONTRADICTION: &str = "contradiction";
    pub const EXTERNAL: &str = "external";
    pub const UNVERIFIED: &str = "unverified";
    pub const DISMISSED: &str = "dismissed";
}

/// Relation name reserved for contradiction edges.
pub const CONTRADICTS: &str = "CONTRADICTS";

/// Clamp a score into `[0, 1]`. NaN collapses to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ── Nodes ─────────────────────────────────────────────────────────

/// A node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: NodeId,
    pub group_id: GroupId,
    /// Display name.
    pub name: String,
    /// Kind of cognitive object ("preference", "belief", "goal", ...).
    /// Contradiction checks only compare nodes of the same kind.
    pub kind: String,
    pub labels: BTreeSet<String>,
    pub summary: String,
    /// Reinforcement score in `[0, 1]`.
    pub salience: f64,
    /// Certainty score in `[0, 1]`.
    pub confidence: f64,
    pub flags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time a decay cycle wrote this node.
    #[serde(default)]
    pub decayed_at: Option<DateTime<Utc>>,
}

impl GraphNode {
    /// Build a cognitive node with neutral salience and confidence.
    pub fn cognitive(
        group_id: GroupId,
        name: impl Into<String>,
        kind: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let labels = [labels::ENTITY, labels::COGNITIVE]
            .into_iter()
            .map(String::from)
            .collect();
        Self {
            id: NodeId::new(),
            group_id,
            name: name.into(),
            kind: kind.into(),
            labels,
            summary: summary.into(),
            salience: 0.5,
            confidence: 0.5,
            flags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            decayed_at: None,
        }
    }

    pub fn with_salience(mut self, salience: f64) -> Self {
        self.salience = clamp_unit(salience);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flags.insert(flag.to_string());
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    pub fn is_cognitive(&self) -> bool {
        self.labels.contains(labels::COGNITIVE)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Insert a flag. Returns `true` if it was not already present.
    pub fn add_flag(&mut self, flag: &str) -> bool {
        self.flags.insert(flag.to_string())
    }

    /// The text handed to the classifier for this node.
    pub fn text(&self) -> &str {
        if self.summary.is_empty() {
            &self.name
        } else {
            &self.summary
        }
    }

    /// Whole days elapsed between the last update and `now`.
    pub fn days_since_update(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_days().max(0)
    }
}

// ── Edges ─────────────────────────────────────────────────────────

/// A fact relating two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub id: EdgeId,
    pub group_id: GroupId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    /// Relation name; [`CONTRADICTS`] is reserved.
    pub relation: String,
    /// Natural-language statement of the fact.
    pub fact: String,
    /// Episodes that asserted this fact.
    pub episodes: Vec<EpisodeId>,
    /// Edge confidence used for path weighting during traversal.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub valid_at: DateTime<Utc>,
    pub invalid_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl GraphEdge {
    /// Build a fact edge. Self-loops are rejected.
    pub fn new(
        group_id: GroupId,
        source_id: NodeId,
        target_id: NodeId,
        relation: impl Into<String>,
        fact: impl Into<String>,
    ) -> Result<Self, NoemaError> {
        if source_id == target_id {
            return Err(NoemaError::Invariant(format!(
                "edge source and target must differ (node {source_id})"
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: EdgeId::new(),
            group_id,
            source_id,
            target_id,
            relation: relation.into(),
            fact: fact.into(),
            episodes: Vec::new(),
            confidence: 1.0,
            created_at: now,
            valid_at: now,
            invalid_at: None,
            expired_at: None,
        })
    }

    /// Build a `CONTRADICTS` edge: `source` contradicts `target`.
    pub fn contradiction(
        group_id: GroupId,
        source_id: NodeId,
        target_id: NodeId,
        episode: EpisodeId,
    ) -> Result<Self, NoemaError> {
        let mut edge = Self::new(
            group_id,
            source_id,
            target_id,
            CONTRADICTS,
            "source contradicts target",
        )?;
        edge.episodes.push(episode);
        Ok(edge)
    }

    pub fn with_episode(mut self, episode: EpisodeId) -> Self {
        self.episodes.push(episode);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    pub fn valid_at(mut self, at: DateTime<Utc>) -> Self {
        self.valid_at = at;
        self
    }

    pub fn is_contradiction(&self) -> bool {
        self.relation == CONTRADICTS
    }

    /// Identical source and target (same subject/object pair, same direction).
    pub fn same_endpoints(&self, other: &GraphEdge) -> bool {
        self.source_id == other.source_id && self.target_id == other.target_id
    }

    /// Whether the edge touches `node`.
    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source_id == node || &self.target_id == node
    }

    /// The endpoint opposite `node`, if the edge touches it.
    pub fn other_end(&self, node: &NodeId) -> Option<NodeId> {
        if &self.source_id == node {
            Some(self.target_id)
        } else if &self.target_id == node {
            Some(self.source_id)
        } else {
            None
        }
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_at.is_none()
    }
}
