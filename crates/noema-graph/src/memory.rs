//! In-process graph store.
//!
//! Backs single-process deployments and every engine test. Each trait call
//! takes one write or read lock, which makes a batch atomic.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use noema_core::{clamp_unit, labels, EdgeId, GraphEdge, GraphNode, GroupId, NodeId};

use crate::store::{
    AttributeUpdate, GraphStore, StoreError, StoreErrorKind, StoreResult, TraversalHit,
};

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<NodeId, GraphNode>,
    edges: Vec<GraphEdge>,
}

impl Inner {
    fn neighbors(&self, id: &NodeId) -> BTreeSet<NodeId> {
        self.edges.iter().filter_map(|e| e.other_end(id)).collect()
    }
}

/// Graph store kept entirely in memory.
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: RwLock<Inner>,
    failures_left: AtomicUsize,
    failures_retryable: AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` write operations fail with a connection error.
    ///
    /// Test hook for exercising retry and batch-isolation paths.
    pub fn fail_next_writes(&self, count: usize, retryable: bool) {
        self.failures_retryable.store(retryable, Ordering::SeqCst);
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Number of nodes currently stored.
    pub fn node_count(&self) -> usize {
        self.read().map(|g| g.nodes.len()).unwrap_or(0)
    }

    /// Snapshot of every stored edge.
    pub fn all_edges(&self) -> Vec<GraphEdge> {
        self.read().map(|g| g.edges.clone()).unwrap_or_default()
    }

    fn injected_failure(&self) -> StoreResult<()> {
        let taken = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if taken.is_ok() {
            let message = "injected write failure";
            return Err(if self.failures_retryable.load(Ordering::SeqCst) {
                StoreError::retryable(StoreErrorKind::Connection, message)
            } else {
                StoreError::permanent(StoreErrorKind::Query, message)
            });
        }
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| StoreError::permanent(StoreErrorKind::Invariant, "store lock poisoned"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| StoreError::permanent(StoreErrorKind::Invariant, "store lock poisoned"))
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn get_node(&self, id: &NodeId) -> StoreResult<Option<GraphNode>> {
        Ok(self.read()?.nodes.get(id).cloned())
    }

    async fn upsert_node(&self, node: &GraphNode) -> StoreResult<()> {
        self.injected_failure()?;
        let mut inner = self.write()?;
        let mut incoming = node.clone();
        incoming.salience = clamp_unit(incoming.salience);
        incoming.confidence = clamp_unit(incoming.confidence);

        if let Some(existing) = inner.nodes.get(&node.id) {
            incoming.created_at = existing.created_at;
            incoming.labels.extend(existing.labels.iter().cloned());
        }
        inner.nodes.insert(incoming.id, incoming);
        Ok(())
    }

    async fn create_edge(&self, edge: &GraphEdge) -> StoreResult<()> {
        self.injected_failure()?;
        if edge.source_id == edge.target_id {
            return Err(StoreError::permanent(
                StoreErrorKind::Invariant,
                format!("self-loop on node {}", edge.source_id),
            ));
        }
        let mut inner = self.write()?;
        for endpoint in [&edge.source_id, &edge.target_id] {
            if !inner.nodes.contains_key(endpoint) {
                return Err(StoreError::permanent(
                    StoreErrorKind::NotFound,
                    format!("edge endpoint {endpoint} does not exist"),
                ));
            }
        }
        inner.edges.push(edge.clone());
        Ok(())
    }

    async fn invalidate_edge(&self, id: &EdgeId, at: DateTime<Utc>) -> StoreResult<()> {
        self.injected_failure()?;
        let mut inner = self.write()?;
        let edge = inner
            .edges
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| {
                StoreError::permanent(StoreErrorKind::NotFound, format!("edge {id} not found"))
            })?;
        edge.invalid_at = Some(at);
        edge.expired_at = Some(at);
        Ok(())
    }

    async fn edges_between(&self, a: &NodeId, b: &NodeId) -> StoreResult<Vec<GraphEdge>> {
        Ok(self
            .read()?
            .edges
            .iter()
            .filter(|e| e.other_end(a).as_ref() == Some(b))
            .cloned()
            .collect())
    }

    async fn edges_of(&self, node: &NodeId) -> StoreResult<Vec<GraphEdge>> {
        Ok(self
            .read()?
            .edges
            .iter()
            .filter(|e| e.touches(node))
            .cloned()
            .collect())
    }

    async fn traverse(
        &self,
        start: &NodeId,
        max_hops: u32,
        label_filter: Option<&str>,
        group_filter: Option<&GroupId>,
    ) -> StoreResult<Vec<TraversalHit>> {
        let inner = self.read()?;
        let mut hits = Vec::new();
        if max_hops == 0 || !inner.nodes.contains_key(start) {
            return Ok(hits);
        }

        // Depth-first over simple paths: (node, hops, confidence, visited).
        let mut stack = vec![(*start, 0u32, 1.0f64, vec![*start])];
        while let Some((current, hops, confidence, path)) = stack.pop() {
            if hops == max_hops {
                continue;
            }
            for edge in inner.edges.iter().filter(|e| e.touches(&current)) {
                let Some(next) = edge.other_end(&current) else {
                    continue;
                };
                if path.contains(&next) {
                    continue;
                }
                let Some(node) = inner.nodes.get(&next) else {
                    continue;
                };
                let next_confidence = confidence * edge.confidence;
                let label_ok = label_filter.map_or(true, |l| node.labels.contains(l));
                let group_ok = group_filter.map_or(true, |g| &node.group_id == g);
                if label_ok && group_ok {
                    hits.push(TraversalHit {
                        node_id: next,
                        hops: hops + 1,
                        path_confidence: next_confidence,
                    });
                }
                let mut next_path = path.clone();
                next_path.push(next);
                stack.push((next, hops + 1, next_confidence, next_path));
            }
        }
        Ok(hits)
    }

    async fn batch_update_attributes(&self, updates: &[AttributeUpdate]) -> StoreResult<usize> {
        self.injected_failure()?;
        let mut inner = self.write()?;
        let mut written = 0;
        for update in updates {
            if let Some(node) = inner.nodes.get_mut(&update.node_id) {
                update.apply_to(node);
                written += 1;
            }
        }
        Ok(written)
    }

    async fn batch_delete(&self, ids: &[NodeId]) -> StoreResult<usize> {
        self.injected_failure()?;
        let mut inner = self.write()?;
        let doomed: HashSet<NodeId> = ids.iter().copied().collect();
        let mut deleted = 0;
        for id in &doomed {
            if inner.nodes.remove(id).is_some() {
                deleted += 1;
            }
        }
        inner
            .edges
            .retain(|e| !doomed.contains(&e.source_id) && !doomed.contains(&e.target_id));
        Ok(deleted)
    }

    async fn count_neighbors(
        &self,
        id: &NodeId,
        confidence_threshold: Option<f64>,
    ) -> StoreResult<usize> {
        let inner = self.read()?;
        let count = inner
            .neighbors(id)
            .iter()
            .filter(|n| match confidence_threshold {
                Some(threshold) => inner
                    .nodes
                    .get(n)
                    .is_some_and(|node| node.confidence > threshold),
                None => inner.nodes.contains_key(n),
            })
            .count();
        Ok(count)
    }

    async fn list_cognitive_nodes(
        &self,
        group: Option<&GroupId>,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<GraphNode>> {
        let inner = self.read()?;
        let range = match after {
            Some(after) => inner
                .nodes
                .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded)),
            None => inner.nodes.range(..),
        };
        Ok(range
            .map(|(_, node)| node)
            .filter(|n| n.labels.contains(labels::COGNITIVE))
            .filter(|n| group.map_or(true, |g| &n.group_id == g))
            .take(limit)
            .cloned()
            .collect())
    }
}
