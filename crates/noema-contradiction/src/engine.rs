//! Detect, link and supersede contradicting beliefs.
//!
//! The engine holds no state of its own: every operation is a function of
//! its inputs, the classifier and the graph store.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use noema_core::config::ContradictionConfig;
use noema_core::{
    flags, ContradictionAlert, EdgeId, EpisodeId, GraphEdge, GraphNode, GroupId, NodeId,
};
use noema_graph::{AttributeUpdate, GraphStore};

use crate::classifier::{Classifier, ContradictionJudgment};
use crate::error::{ClassifierError, Result};

/// An existing node judged to contradict a candidate.
#[derive(Debug, Clone)]
pub struct ContradictionMatch {
    pub node: GraphNode,
    pub judgment: ContradictionJudgment,
}

/// An existing node to link as contradicted, with the fact edge that
/// carried it when there is one.
#[derive(Debug, Clone)]
pub struct ContradictedItem {
    pub node: GraphNode,
    pub fact: Option<GraphEdge>,
}

impl From<GraphNode> for ContradictedItem {
    fn from(node: GraphNode) -> Self {
        Self { node, fact: None }
    }
}

impl From<ContradictionMatch> for ContradictedItem {
    fn from(m: ContradictionMatch) -> Self {
        m.node.into()
    }
}

pub struct ContradictionEngine {
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn GraphStore>,
    config: ContradictionConfig,
}

impl ContradictionEngine {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn GraphStore>,
        config: ContradictionConfig,
    ) -> Self {
        Self {
            classifier,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ContradictionConfig {
        &self.config
    }

    /// Existing cognitive nodes of the same group and kind as `node`, up to
    /// `candidate_pool_limit`.
    pub async fn candidate_pool(&self, node: &GraphNode) -> Result<Vec<GraphNode>> {
        let limit = self.config.candidate_pool_limit;
        let mut pool = Vec::new();
        let mut after: Option<NodeId> = None;

        while pool.len() < limit {
            let page = self
                .store
                .list_cognitive_nodes(Some(&node.group_id), after, limit)
                .await?;
            let Some(last) = page.last() else { break };
            after = Some(last.id);
            let exhausted = page.len() < limit;

            pool.extend(
                page.into_iter()
                    .filter(|n| n.id != node.id && n.kind == node.kind),
            );
            if exhausted {
                break;
            }
        }
        pool.truncate(limit);
        Ok(pool)
    }

    /// Pool members the classifier scores above `similarity_threshold`,
    /// highest score first.
    ///
    /// Only members of the candidate's kind with at least
    /// `confidence_threshold` confidence are compared. Malformed classifier
    /// answers count as "no contradiction"; transport failures abort the
    /// whole detection.
    pub async fn detect_contradictions(
        &self,
        candidate: &GraphNode,
        pool: &[GraphNode],
        confidence_threshold: f64,
    ) -> Result<Vec<ContradictionMatch>> {
        let mut matches = Vec::new();

        for other in pool {
            if other.id == candidate.id
                || other.kind != candidate.kind
                || other.confidence < confidence_threshold
            {
                continue;
            }

            let judgment = match self
                .classifier
                .classify_contradiction(candidate.text(), other.text())
                .await
            {
                Ok(j) => j,
                Err(ClassifierError::Malformed(reason)) => {
                    tracing::warn!(
                        candidate = %candidate.id,
                        other = %other.id,
                        %reason,
                        "Unreadable classifier response, treating as no contradiction"
                    );
                    ContradictionJudgment::none()
                }
                Err(e) => return Err(e.into()),
            };

            if judgment.score > self.config.similarity_threshold {
                matches.push(ContradictionMatch {
                    node: other.clone(),
                    judgment,
                });
            }
        }

        // Stable sort keeps pool order between equal scores.
        matches.sort_by(|a, b| {
            b.judgment
                .score
                .partial_cmp(&a.judgment.score)
                .unwrap_or(Ordering::Equal)
        });

        tracing::debug!(
            candidate = %candidate.id,
            compared = pool.len(),
            found = matches.len(),
            "Contradiction detection complete"
        );
        Ok(matches)
    }

    /// Link `new_node` to each contradicted node with a `CONTRADICTS` edge
    /// and flag both ends.
    ///
    /// When the new fact and the contradicted fact connect exactly the same
    /// source and target, the conflict is a change over time rather than a
    /// contradiction and no edge is created. An existing `CONTRADICTS` edge
    /// between the same pair is reused, so repeating the call after a
    /// partial failure does not duplicate edges.
    pub async fn create_contradiction_edges(
        &self,
        new_node: &GraphNode,
        new_fact: Option<&GraphEdge>,
        contradicted: &[ContradictedItem],
        episode: EpisodeId,
    ) -> Result<Vec<GraphEdge>> {
        let mut edges = Vec::new();

        for item in contradicted {
            if item.node.id == new_node.id {
                continue;
            }
            if let (Some(new), Some(old)) = (new_fact, item.fact.as_ref()) {
                if new.same_endpoints(old) {
                    tracing::debug!(
                        new_fact = %new.id,
                        old_fact = %old.id,
                        "Temporal supersession, no contradiction edge"
                    );
                    continue;
                }
            }

            let existing = self
                .store
                .edges_between(&new_node.id, &item.node.id)
                .await?
                .into_iter()
                .find(|e| e.is_contradiction() && e.source_id == new_node.id);
            let edge = match existing {
                Some(edge) => edge,
                None => {
                    let edge = GraphEdge::contradiction(
                        new_node.group_id.clone(),
                        new_node.id,
                        item.node.id,
                        episode,
                    )?;
                    self.store.create_edge(&edge).await?;
                    edge
                }
            };
            edges.push(edge);
        }

        if !edges.is_empty() {
            let updates: Vec<AttributeUpdate> = std::iter::once(new_node.id)
                .chain(edges.iter().map(|e| e.target_id))
                .map(|id| AttributeUpdate::new(id).add_flag(flags::CONTRADICTION))
                .collect();
            self.store.batch_update_attributes(&updates).await?;

            tracing::info!(
                node = %new_node.id,
                group = %new_node.group_id,
                edges = edges.len(),
                "Contradiction edges created"
            );
        }
        Ok(edges)
    }

    /// Existing facts between the same pair of nodes that `new_fact`
    /// contradicts, according to the classifier.
    pub async fn contradicted_facts(
        &self,
        new_fact: &GraphEdge,
        existing: &[GraphEdge],
    ) -> Result<Vec<GraphEdge>> {
        let candidates: Vec<&GraphEdge> = existing
            .iter()
            .filter(|e| {
                e.id != new_fact.id
                    && e.is_valid()
                    && !e.is_contradiction()
                    && same_pair(e, new_fact)
            })
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = candidates.iter().map(|e| e.fact.clone()).collect();
        let ids = match self
            .classifier
            .classify_contradicted_ids(&new_fact.fact, &texts)
            .await
        {
            Ok(ids) => ids,
            Err(ClassifierError::Malformed(reason)) => {
                tracing::warn!(fact = %new_fact.id, %reason, "Unreadable classifier response, no facts invalidated");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(ids
            .into_iter()
            .filter_map(|i| candidates.get(i).map(|e| (*e).clone()))
            .collect())
    }

    /// Invalidate older, still-valid facts about the same pair of nodes
    /// that `new_edge` supersedes. Edges are stamped, never deleted.
    pub async fn resolve_temporal_precedence(
        &self,
        new_edge: &GraphEdge,
        candidates: &[GraphEdge],
    ) -> Result<Vec<EdgeId>> {
        self.resolve_temporal_precedence_at(new_edge, candidates, Utc::now())
            .await
    }

    pub async fn resolve_temporal_precedence_at(
        &self,
        new_edge: &GraphEdge,
        candidates: &[GraphEdge],
        now: DateTime<Utc>,
    ) -> Result<Vec<EdgeId>> {
        let mut invalidated = Vec::new();

        for old in candidates {
            let superseded = old.id != new_edge.id
                && old.is_valid()
                && !old.is_contradiction()
                && same_pair(old, new_edge)
                && is_older(old, new_edge);
            if !superseded {
                continue;
            }
            self.store.invalidate_edge(&old.id, now).await?;
            invalidated.push(old.id);
        }

        if !invalidated.is_empty() {
            tracing::info!(
                fact = %new_edge.id,
                invalidated = invalidated.len(),
                "Superseded facts invalidated"
            );
        }
        Ok(invalidated)
    }
}

/// One alert covering every contradiction edge raised by an episode.
pub fn build_alert(group_id: &GroupId, edges: &[GraphEdge]) -> Option<ContradictionAlert> {
    if edges.is_empty() {
        return None;
    }
    Some(ContradictionAlert::new(
        group_id.clone(),
        unique(edges.iter().map(|e| e.source_id)),
        unique(edges.iter().map(|e| e.target_id)),
        edges.iter().map(|e| e.id).collect(),
    ))
}

/// Ids in first-seen order without repeats.
fn unique(ids: impl Iterator<Item = NodeId>) -> Vec<NodeId> {
    let mut out: Vec<NodeId> = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn same_pair(a: &GraphEdge, b: &GraphEdge) -> bool {
    a.same_endpoints(b) || (a.source_id == b.target_id && a.target_id == b.source_id)
}

/// Earlier validity wins; creation time breaks ties.
fn is_older(old: &GraphEdge, new: &GraphEdge) -> bool {
    match old.valid_at.cmp(&new.valid_at) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => old.created_at < new.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(a: NodeId, b: NodeId, at: DateTime<Utc>) -> GraphEdge {
        GraphEdge::new(GroupId::new("u1"), a, b, "WORKS_AT", "fact")
            .unwrap()
            .valid_at(at)
    }

    #[test]
    fn pair_matching_ignores_direction() {
        let (a, b, c) = (NodeId::new(), NodeId::new(), NodeId::new());
        let now = Utc::now();
        assert!(same_pair(&fact(a, b, now), &fact(b, a, now)));
        assert!(!same_pair(&fact(a, b, now), &fact(a, c, now)));
    }

    #[test]
    fn older_by_validity_then_creation() {
        let (a, b) = (NodeId::new(), NodeId::new());
        let now = Utc::now();
        let earlier = now - chrono::Duration::days(1);
        assert!(is_older(&fact(a, b, earlier), &fact(a, b, now)));
        assert!(!is_older(&fact(a, b, now), &fact(a, b, earlier)));
    }

    #[test]
    fn alert_only_when_edges_exist() {
        let group = GroupId::new("u1");
        assert!(build_alert(&group, &[]).is_none());

        let (new, old_a, old_b) = (NodeId::new(), NodeId::new(), NodeId::new());
        let edges: Vec<GraphEdge> = [old_a, old_b]
            .into_iter()
            .map(|old| GraphEdge::contradiction(group.clone(), new, old, EpisodeId::new()).unwrap())
            .collect();
        let alert = build_alert(&group, &edges).unwrap();
        assert_eq!(alert.contradicting_node_ids, vec![new]);
        assert_eq!(alert.contradicted_node_ids, vec![old_a, old_b]);
        assert_eq!(alert.contradiction_edge_ids.len(), 2);
    }
}
