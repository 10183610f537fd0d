//! Neo4j connection management and the Neo4j-backed [`GraphStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{ConfigBuilder, Graph, Query};

use noema_core::config::GraphConfig;
use noema_core::{EdgeId, GraphEdge, GraphNode, GroupId, NodeId};

use crate::store::{
    AttributeUpdate, GraphStore, StoreError, StoreErrorKind, StoreResult, TraversalHit,
};

// Every failure raised inside the Neo4j layer is tagged retryable, including
// malformed-query bugs that will never succeed. Callers rely on this; see
// DESIGN.md before narrowing it.
impl From<neo4rs::Error> for StoreError {
    fn from(e: neo4rs::Error) -> Self {
        StoreError::retryable(StoreErrorKind::Query, e.to_string())
    }
}

pub(crate) fn decode_error(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::retryable(StoreErrorKind::Serialization, format!("{what}: {e}"))
}

/// Thread-safe Neo4j graph client with connection pooling.
///
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> StoreResult<Self> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| StoreError::retryable(StoreErrorKind::Connection, e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| StoreError::retryable(StoreErrorKind::Connection, e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    /// Execute a write-only query (CREATE, MERGE, DELETE, SET).
    pub async fn run(&self, query: Query) -> StoreResult<()> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Execute a read query and collect all rows.
    pub async fn query_rows(&self, query: Query) -> StoreResult<Vec<neo4rs::Row>> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a read query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> StoreResult<Option<neo4rs::Row>> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }

    /// Begin a transaction.
    pub async fn start_txn(&self) -> StoreResult<neo4rs::Txn> {
        Ok(self.graph.start_txn().await?)
    }
}

#[async_trait]
impl GraphStore for GraphClient {
    async fn get_node(&self, id: &NodeId) -> StoreResult<Option<GraphNode>> {
        self.fetch_node(id).await
    }

    async fn upsert_node(&self, node: &GraphNode) -> StoreResult<()> {
        self.merge_node(node).await
    }

    async fn create_edge(&self, edge: &GraphEdge) -> StoreResult<()> {
        self.insert_edge(edge).await
    }

    async fn invalidate_edge(&self, id: &EdgeId, at: DateTime<Utc>) -> StoreResult<()> {
        self.stamp_edge_invalid(id, at).await
    }

    async fn edges_between(&self, a: &NodeId, b: &NodeId) -> StoreResult<Vec<GraphEdge>> {
        self.fetch_edges_between(a, b).await
    }

    async fn edges_of(&self, node: &NodeId) -> StoreResult<Vec<GraphEdge>> {
        self.fetch_edges_of(node).await
    }

    async fn traverse(
        &self,
        start: &NodeId,
        max_hops: u32,
        label_filter: Option<&str>,
        group_filter: Option<&GroupId>,
    ) -> StoreResult<Vec<TraversalHit>> {
        self.walk(start, max_hops, label_filter, group_filter).await
    }

    async fn batch_update_attributes(&self, updates: &[AttributeUpdate]) -> StoreResult<usize> {
        self.update_attributes(updates).await
    }

    async fn batch_delete(&self, ids: &[NodeId]) -> StoreResult<usize> {
        self.delete_nodes(ids).await
    }

    async fn count_neighbors(
        &self,
        id: &NodeId,
        confidence_threshold: Option<f64>,
    ) -> StoreResult<usize> {
        self.neighbor_count(id, confidence_threshold).await
    }

    async fn list_cognitive_nodes(
        &self,
        group: Option<&GroupId>,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<GraphNode>> {
        self.page_cognitive_nodes(group, after, limit).await
    }
}
