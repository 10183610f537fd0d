//! Write operations against Neo4j.
//!
//! Nodes are upserted with MERGE on `id`. Labels are only ever added, which
//! keeps the cognitive marker stable once a node has been extracted.

use chrono::{DateTime, Utc};
use neo4rs::query;

use noema_core::{clamp_unit, EdgeId, GraphEdge, GraphNode, NodeId, CONTRADICTS};

use crate::client::GraphClient;
use crate::store::{AttributeUpdate, SalienceWrite, StoreError, StoreErrorKind, StoreResult};

impl GraphClient {
    // ── Node Upserts ─────────────────────────────────────────────

    /// Upsert a node and add its labels.
    pub async fn merge_node(&self, node: &GraphNode) -> StoreResult<()> {
        let extra_labels: String = node
            .labels
            .iter()
            .filter(|l| is_safe_identifier(l))
            .map(|l| format!(":{l}"))
            .collect();
        let set_labels = if extra_labels.is_empty() {
            String::new()
        } else {
            format!("SET n{extra_labels}")
        };

        let cypher = format!(
            "MERGE (n:Entity {{id: $id}})
             ON CREATE SET n.created_at = $created_at
             SET n.group_id = $group_id, n.name = $name, n.kind = $kind,
                 n.summary = $summary, n.salience = $salience,
                 n.confidence = $confidence, n.flags = $flags,
                 n.updated_at = $updated_at, n.decayed_at = $decayed_at
             {set_labels}"
        );

        let q = query(&cypher)
            .param("id", node.id.0.to_string())
            .param("group_id", node.group_id.0.clone())
            .param("name", node.name.clone())
            .param("kind", node.kind.clone())
            .param("summary", node.summary.clone())
            .param("salience", clamp_unit(node.salience))
            .param("confidence", clamp_unit(node.confidence))
            .param("flags", node.flags.iter().cloned().collect::<Vec<_>>())
            .param("created_at", node.created_at.to_rfc3339())
            .param("updated_at", node.updated_at.to_rfc3339())
            .param("decayed_at", opt_ts(node.decayed_at));

        self.run(q).await
    }

    // ── Edge Writes ──────────────────────────────────────────────

    /// Create a fact or contradiction edge between two existing nodes.
    pub async fn insert_edge(&self, edge: &GraphEdge) -> StoreResult<()> {
        if edge.source_id == edge.target_id {
            return Err(StoreError::permanent(
                StoreErrorKind::Invariant,
                format!("self-loop on node {}", edge.source_id),
            ));
        }

        let rel_type = relation_to_cypher(&edge.relation);
        let cypher = format!(
            "MATCH (a:Entity {{id: $source_id}})
             MATCH (b:Entity {{id: $target_id}})
             CREATE (a)-[r:{rel_type} {{id: $edge_id}}]->(b)
             SET r.group_id = $group_id, r.name = $name, r.fact = $fact,
                 r.episodes = $episodes, r.confidence = $confidence,
                 r.created_at = $created_at, r.valid_at = $valid_at,
                 r.invalid_at = $invalid_at, r.expired_at = $expired_at
             RETURN r.id AS id"
        );

        let q = query(&cypher)
            .param("source_id", edge.source_id.0.to_string())
            .param("target_id", edge.target_id.0.to_string())
            .param("edge_id", edge.id.0.to_string())
            .param("group_id", edge.group_id.0.clone())
            .param("name", edge.relation.clone())
            .param("fact", edge.fact.clone())
            .param(
                "episodes",
                edge.episodes
                    .iter()
                    .map(|e| e.0.to_string())
                    .collect::<Vec<_>>(),
            )
            .param("confidence", clamp_unit(edge.confidence))
            .param("created_at", edge.created_at.to_rfc3339())
            .param("valid_at", edge.valid_at.to_rfc3339())
            .param("invalid_at", opt_ts(edge.invalid_at))
            .param("expired_at", opt_ts(edge.expired_at));

        match self.query_one(q).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::retryable(
                StoreErrorKind::NotFound,
                format!(
                    "edge endpoints {} / {} not found",
                    edge.source_id, edge.target_id
                ),
            )),
        }
    }

    /// Mark an edge invalid and expired without deleting it.
    pub async fn stamp_edge_invalid(&self, id: &EdgeId, at: DateTime<Utc>) -> StoreResult<()> {
        let q = query(
            "MATCH (:Entity)-[r {id: $id}]->(:Entity)
             SET r.invalid_at = $at, r.expired_at = $at",
        )
        .param("id", id.0.to_string())
        .param("at", at.to_rfc3339());

        self.run(q).await
    }

    // ── Batch Operations ─────────────────────────────────────────

    /// Apply attribute updates in a single transaction.
    pub async fn update_attributes(&self, updates: &[AttributeUpdate]) -> StoreResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut txn = self.start_txn().await?;

        for update in updates {
            let mut sets = Vec::new();
            match update.salience {
                Some(SalienceWrite::Set(_)) => sets.push("n.salience = $salience"),
                Some(SalienceWrite::Add(_)) => sets.push(
                    "n.salience = CASE
                       WHEN coalesce(n.salience, 0.0) + $salience > 1.0 THEN 1.0
                       WHEN coalesce(n.salience, 0.0) + $salience < 0.0 THEN 0.0
                       ELSE coalesce(n.salience, 0.0) + $salience END",
                ),
                None => {}
            }
            if update.confidence.is_some() {
                sets.push("n.confidence = $confidence");
            }
            if !update.add_flags.is_empty() {
                sets.push(
                    "n.flags = coalesce(n.flags, []) +
                       [f IN $flags WHERE NOT f IN coalesce(n.flags, [])]",
                );
            }
            if update.updated_at.is_some() {
                sets.push("n.updated_at = $updated_at");
            }
            if update.decayed_at.is_some() {
                sets.push("n.decayed_at = $decayed_at");
            }
            if sets.is_empty() {
                continue;
            }

            let salience = match update.salience {
                Some(SalienceWrite::Set(v)) => clamp_unit(v),
                Some(SalienceWrite::Add(d)) => d,
                None => 0.0,
            };
            let cypher = format!("MATCH (n:Entity {{id: $id}}) SET {}", sets.join(", "));
            let q = query(&cypher)
                .param("id", update.node_id.0.to_string())
                .param("salience", salience)
                .param("confidence", clamp_unit(update.confidence.unwrap_or(0.0)))
                .param("flags", update.add_flags.clone())
                .param("updated_at", opt_ts(update.updated_at))
                .param("decayed_at", opt_ts(update.decayed_at));

            txn.run(q).await?;
        }

        txn.commit().await?;
        Ok(updates.len())
    }

    /// Detach-delete nodes by id. Returns the count of deleted nodes.
    pub async fn delete_nodes(&self, ids: &[NodeId]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let q = query(
            "MATCH (n:Entity)
             WHERE n.id IN $ids
             DETACH DELETE n
             RETURN count(n) AS cnt",
        )
        .param(
            "ids",
            ids.iter().map(|id| id.0.to_string()).collect::<Vec<_>>(),
        );

        match self.query_one(q).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0).max(0) as usize),
            None => Ok(0),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Relationship type used for a relation name. Ordinary facts share one
/// type and keep their name as a property.
fn relation_to_cypher(relation: &str) -> &'static str {
    if relation == CONTRADICTS {
        "CONTRADICTS"
    } else {
        "RELATES_TO"
    }
}

/// Labels are interpolated into Cypher, so only plain identifiers pass.
fn is_safe_identifier(label: &str) -> bool {
    !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !label.starts_with(|c: char| c.is_ascii_digit())
}

fn opt_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_default()
}
