//! Reinforcement paths: direct activation, network spread and structural
//! boosts. Decay lives in [`crate::decay`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use noema_core::config::SalienceConfig;
use noema_core::{labels, GraphNode, NodeId};
use noema_graph::{AttributeUpdate, GraphStore};

use crate::error::Result;
use crate::scoring::{self, NodeSignals, TriggerType};

/// Scores node importance against a shared graph store.
///
/// Direct activation writes absolute values. Decay cycles running at the
/// same time may overwrite them (or be overwritten); the last write wins and
/// later cycles correct the drift.
pub struct SalienceEngine {
    pub(crate) store: Arc<dyn GraphStore>,
    pub(crate) config: SalienceConfig,
}

impl SalienceEngine {
    pub fn new(store: Arc<dyn GraphStore>, config: SalienceConfig) -> Self {
        tracing::debug!(version = config.version, "Salience engine configured");
        Self { store, config }
    }

    pub fn config(&self) -> &SalienceConfig {
        &self.config
    }

    pub(crate) async fn signals(&self, node: &GraphNode, now: DateTime<Utc>) -> Result<NodeSignals> {
        Ok(NodeSignals {
            salience: node.salience,
            confidence: node.confidence,
            connections: self.store.count_neighbors(&node.id, None).await?,
            days_since_update: node.days_since_update(now),
        })
    }

    /// Reinforce cognitive nodes touched by `trigger` at `timestamp`.
    ///
    /// Returns the activated nodes with their new salience, ready to feed
    /// [`propagate_network_reinforcement`](Self::propagate_network_reinforcement).
    /// Non-cognitive nodes are ignored. The increment is added to the
    /// salience each node carries, so pass nodes as currently stored.
    pub async fn update_direct_salience(
        &self,
        nodes: &[GraphNode],
        trigger: TriggerType,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<GraphNode>> {
        let mut updates = Vec::new();
        let mut activated = Vec::new();

        for node in nodes.iter().filter(|n| n.is_cognitive()) {
            let signals = self.signals(node, timestamp).await?;
            let salience = scoring::activated_salience(&self.config, trigger, &signals);

            updates.push(
                AttributeUpdate::new(node.id)
                    .set_salience(salience)
                    .touched_at(timestamp),
            );
            let mut updated = node.clone();
            updated.salience = salience;
            updated.updated_at = timestamp;
            activated.push(updated);
        }

        if !updates.is_empty() {
            self.store.batch_update_attributes(&updates).await?;
            tracing::debug!(%trigger, nodes = updates.len(), "Direct salience applied");
        }
        Ok(activated)
    }

    /// Spread a share of each activated node's salience to the cognitive
    /// nodes within `network_max_hops`, weighted by distance and path
    /// confidence. All contributions are summed and written as one additive
    /// batch. Returns the per-node reinforcement.
    pub async fn propagate_network_reinforcement(
        &self,
        activated: &[GraphNode],
    ) -> Result<BTreeMap<NodeId, f64>> {
        let mut reinforcement: BTreeMap<NodeId, f64> = BTreeMap::new();

        for source in activated {
            let hits = self
                .store
                .traverse(
                    &source.id,
                    self.config.network_max_hops,
                    Some(labels::COGNITIVE),
                    Some(&source.group_id),
                )
                .await?;

            for hit in hits.into_iter().filter(|h| h.node_id != source.id) {
                let amount = scoring::network_contribution(
                    &self.config,
                    hit.hops,
                    hit.path_confidence,
                    source.salience,
                );
                if amount > 0.0 {
                    *reinforcement.entry(hit.node_id).or_insert(0.0) += amount;
                }
            }
        }

        if !reinforcement.is_empty() {
            let updates: Vec<AttributeUpdate> = reinforcement
                .iter()
                .map(|(id, amount)| AttributeUpdate::new(*id).add_salience(*amount))
                .collect();
            self.store.batch_update_attributes(&updates).await?;
            tracing::debug!(
                sources = activated.len(),
                reinforced = updates.len(),
                "Network reinforcement applied"
            );
        }
        Ok(reinforcement)
    }

    /// Flat boost for well-anchored nodes: those with at least
    /// `structural_min_neighbors` neighbours above
    /// `structural_neighbor_confidence`. Returns the boosted ids.
    pub async fn apply_structural_boosts(&self, nodes: &[GraphNode]) -> Result<Vec<NodeId>> {
        let mut boosted = Vec::new();
        for node in nodes.iter().filter(|n| n.is_cognitive()) {
            let strong = self
                .store
                .count_neighbors(&node.id, Some(self.config.structural_neighbor_confidence))
                .await?;
            if strong >= self.config.structural_min_neighbors {
                boosted.push(node.id);
            }
        }

        if !boosted.is_empty() {
            let updates: Vec<AttributeUpdate> = boosted
                .iter()
                .map(|id| AttributeUpdate::new(*id).add_salience(self.config.structural_boost))
                .collect();
            self.store.batch_update_attributes(&updates).await?;
            tracing::debug!(boosted = boosted.len(), "Structural boosts applied");
        }
        Ok(boosted)
    }
}
