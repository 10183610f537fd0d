//! Read operations against Neo4j.
//!
//! Nodes carry the `:Entity` label (plus `:CognitiveObject` for beliefs)
//! and are keyed by the string form of their id. Timestamps are stored as
//! RFC 3339 strings; an empty string stands for "unset".

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use neo4rs::query;
use uuid::Uuid;

use noema_core::{labels, EdgeId, EpisodeId, GraphEdge, GraphNode, GroupId, NodeId};

use crate::client::{decode_error, GraphClient};
use crate::store::{StoreResult, TraversalHit};

impl GraphClient {
    // ── Single Node Lookups ──────────────────────────────────────

    /// Get a node by id.
    pub async fn fetch_node(&self, id: &NodeId) -> StoreResult<Option<GraphNode>> {
        let q = query(
            "MATCH (n:Entity {id: $id})
             RETURN n, labels(n) AS labels",
        )
        .param("id", id.0.to_string());

        match self.query_one(q).await? {
            Some(row) => Ok(Some(row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    // ── List Queries ─────────────────────────────────────────────

    /// Page through cognitive nodes ordered by id.
    pub async fn page_cognitive_nodes(
        &self,
        group: Option<&GroupId>,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<GraphNode>> {
        let cypher = format!(
            "MATCH (n:{cognitive})
             WHERE ($group_id = '' OR n.group_id = $group_id)
               AND ($after = '' OR n.id > $after)
             RETURN n, labels(n) AS labels
             ORDER BY n.id
             LIMIT $limit",
            cognitive = labels::COGNITIVE,
        );

        let q = query(&cypher)
            .param("group_id", group.map(|g| g.0.clone()).unwrap_or_default())
            .param("after", after.map(|a| a.0.to_string()).unwrap_or_default())
            .param("limit", limit as i64);

        let rows = self.query_rows(q).await?;
        rows.iter().map(row_to_node).collect()
    }

    // ── Edge Queries ─────────────────────────────────────────────

    /// Edges between two nodes in either direction.
    pub async fn fetch_edges_between(&self, a: &NodeId, b: &NodeId) -> StoreResult<Vec<GraphEdge>> {
        let q = query(
            "MATCH (a:Entity {id: $a})-[r]-(b:Entity {id: $b})
             RETURN r, startNode(r).id AS source, endNode(r).id AS target",
        )
        .param("a", a.0.to_string())
        .param("b", b.0.to_string());

        let rows = self.query_rows(q).await?;
        rows.iter().map(row_to_edge).collect()
    }

    /// Every edge touching a node.
    pub async fn fetch_edges_of(&self, node: &NodeId) -> StoreResult<Vec<GraphEdge>> {
        let q = query(
            "MATCH (a:Entity {id: $id})-[r]-(:Entity)
             RETURN r, startNode(r).id AS source, endNode(r).id AS target",
        )
        .param("id", node.0.to_string());

        let rows = self.query_rows(q).await?;
        rows.iter().map(row_to_edge).collect()
    }

    // ── Neighbor Queries ─────────────────────────────────────────

    /// Count distinct neighbours, optionally above a confidence threshold.
    pub async fn neighbor_count(
        &self,
        id: &NodeId,
        confidence_threshold: Option<f64>,
    ) -> StoreResult<usize> {
        let q = query(
            "MATCH (a:Entity {id: $id})--(b:Entity)
             WHERE b.id <> a.id
               AND ($threshold < 0.0 OR coalesce(b.confidence, 0.0) > $threshold)
             RETURN count(DISTINCT b) AS cnt",
        )
        .param("id", id.0.to_string())
        .param("threshold", confidence_threshold.unwrap_or(-1.0));

        match self.query_one(q).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0).max(0) as usize),
            None => Ok(0),
        }
    }

    // ── Path Queries ─────────────────────────────────────────────

    /// Walk simple paths of up to `max_hops` edges from `start`.
    pub async fn walk(
        &self,
        start: &NodeId,
        max_hops: u32,
        label_filter: Option<&str>,
        group_filter: Option<&GroupId>,
    ) -> StoreResult<Vec<TraversalHit>> {
        if max_hops == 0 {
            return Ok(Vec::new());
        }

        let q = query(&format!(
            "MATCH p = (a:Entity {{id: $id}})-[*1..{max_hops}]-(b:Entity)
             WHERE b.id <> a.id
               AND all(x IN nodes(p) WHERE single(y IN nodes(p) WHERE y = x))
               AND ($group_id = '' OR b.group_id = $group_id)
               AND ($label = '' OR $label IN labels(b))
             RETURN b.id AS id, length(p) AS hops,
                    reduce(c = 1.0, r IN relationships(p) | c * coalesce(r.confidence, 1.0))
                      AS confidence"
        ))
        .param("id", start.0.to_string())
        .param("group_id", group_filter.map(|g| g.0.clone()).unwrap_or_default())
        .param("label", label_filter.unwrap_or_default().to_string());

        let rows = self.query_rows(q).await?;
        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id").map_err(|e| decode_error("traversal id", e))?;
            let hops: i64 = row.get("hops").map_err(|e| decode_error("traversal hops", e))?;
            let confidence: f64 = row.get("confidence").unwrap_or(1.0);
            hits.push(TraversalHit {
                node_id: NodeId(parse_uuid(&id)?),
                hops: hops.max(1) as u32,
                path_confidence: confidence,
            });
        }
        Ok(hits)
    }
}

// ── Row decoding ─────────────────────────────────────────────────

/// Convert a `n` / `labels` row into a [`GraphNode`].
fn row_to_node(row: &neo4rs::Row) -> StoreResult<GraphNode> {
    let node: neo4rs::Node = row.get("n").map_err(|e| decode_error("node", e))?;
    let labels: Vec<String> = row.get("labels").unwrap_or_default();

    let id: String = node.get("id").map_err(|e| decode_error("node id", e))?;
    let created_at: String = node.get("created_at").unwrap_or_default();
    let updated_at: String = node.get("updated_at").unwrap_or_default();
    let decayed_at: String = node.get("decayed_at").unwrap_or_default();
    let flags: Vec<String> = node.get("flags").unwrap_or_default();

    Ok(GraphNode {
        id: NodeId(parse_uuid(&id)?),
        group_id: GroupId(node.get("group_id").unwrap_or_default()),
        name: node.get("name").unwrap_or_default(),
        kind: node.get("kind").unwrap_or_default(),
        labels: labels.into_iter().collect::<BTreeSet<_>>(),
        summary: node.get("summary").unwrap_or_default(),
        salience: node.get("salience").unwrap_or(0.0),
        confidence: node.get("confidence").unwrap_or(0.0),
        flags: flags.into_iter().collect(),
        created_at: required_ts("created_at", &created_at)?,
        updated_at: required_ts("updated_at", &updated_at)?,
        decayed_at: parse_ts(&decayed_at),
    })
}

/// Convert an `r` / `source` / `target` row into a [`GraphEdge`].
fn row_to_edge(row: &neo4rs::Row) -> StoreResult<GraphEdge> {
    let rel: neo4rs::Relation = row.get("r").map_err(|e| decode_error("relation", e))?;
    let source: String = row.get("source").map_err(|e| decode_error("edge source", e))?;
    let target: String = row.get("target").map_err(|e| decode_error("edge target", e))?;

    let id: String = rel.get("id").map_err(|e| decode_error("edge id", e))?;
    let episodes: Vec<String> = rel.get("episodes").unwrap_or_default();
    let created_at: String = rel.get("created_at").unwrap_or_default();
    let valid_at: String = rel.get("valid_at").unwrap_or_default();
    let invalid_at: String = rel.get("invalid_at").unwrap_or_default();
    let expired_at: String = rel.get("expired_at").unwrap_or_default();

    Ok(GraphEdge {
        id: EdgeId(parse_uuid(&id)?),
        group_id: GroupId(rel.get("group_id").unwrap_or_default()),
        source_id: NodeId(parse_uuid(&source)?),
        target_id: NodeId(parse_uuid(&target)?),
        relation: rel.get("name").unwrap_or_default(),
        fact: rel.get("fact").unwrap_or_default(),
        episodes: episodes
            .iter()
            .map(|e| parse_uuid(e).map(EpisodeId))
            .collect::<StoreResult<_>>()?,
        confidence: rel.get("confidence").unwrap_or(1.0),
        created_at: required_ts("created_at", &created_at)?,
        valid_at: required_ts("valid_at", &valid_at)?,
        invalid_at: parse_ts(&invalid_at),
        expired_at: parse_ts(&expired_at),
    })
}

fn parse_uuid(raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| decode_error("uuid", e))
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn required_ts(field: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    parse_ts(raw).ok_or_else(|| decode_error(field, format!("invalid timestamp {raw:?}")))
}
