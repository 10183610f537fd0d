//! Batch decay and eviction.
//!
//! A cycle pages through cognitive nodes by id. Each batch is read, scored
//! and written back with one attribute batch and one delete batch. Nodes
//! stamped with `decayed_at` at or after the cycle start are skipped, so a
//! batch that is re-run after a crash does not decay twice.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use noema_core::{flags, GraphNode, GroupId, NodeId};
use noema_graph::AttributeUpdate;

use crate::engine::SalienceEngine;
use crate::error::Result;
use crate::scoring::{self, DeletionReason};

/// Where a cycle is, so it can be picked up again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayCheckpoint {
    pub cycle_started_at: DateTime<Utc>,
    /// Last node id of the last batch read; `None` at the start.
    pub after: Option<NodeId>,
}

impl DecayCheckpoint {
    pub fn start(at: DateTime<Utc>) -> Self {
        Self {
            cycle_started_at: at,
            after: None,
        }
    }
}

/// Aggregate outcome of a decay cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecayStats {
    pub processed: usize,
    pub decayed: usize,
    pub deleted: usize,
    pub orphaned: usize,
    pub low_confidence: usize,
    /// Already decayed earlier in the same cycle.
    pub skipped: usize,
    pub failed_batches: usize,
    pub deletions: BTreeMap<String, usize>,
    /// Set when the cycle stopped before reaching the end.
    pub resume_from: Option<DecayCheckpoint>,
}

impl DecayStats {
    fn merge(&mut self, batch: DecayStats) {
        self.processed += batch.processed;
        self.decayed += batch.decayed;
        self.deleted += batch.deleted;
        self.orphaned += batch.orphaned;
        self.low_confidence += batch.low_confidence;
        self.skipped += batch.skipped;
        for (reason, n) in batch.deletions {
            *self.deletions.entry(reason).or_insert(0) += n;
        }
    }
}

impl SalienceEngine {
    /// Decay every cognitive node, optionally limited to one group.
    pub async fn run_decay_cycle(&self, group: Option<&GroupId>, batch_size: usize) -> DecayStats {
        self.run_decay_cycle_at(group, batch_size, Utc::now()).await
    }

    pub async fn run_decay_cycle_at(
        &self,
        group: Option<&GroupId>,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> DecayStats {
        self.resume_decay_cycle(group, batch_size, DecayCheckpoint::start(now), now)
            .await
    }

    /// Continue a cycle from `checkpoint`.
    ///
    /// A failed batch is logged and counted, and the cycle moves on. If the
    /// next page cannot be read at all the cycle stops and reports where to
    /// resume.
    pub async fn resume_decay_cycle(
        &self,
        group: Option<&GroupId>,
        batch_size: usize,
        checkpoint: DecayCheckpoint,
        now: DateTime<Utc>,
    ) -> DecayStats {
        let batch_size = batch_size.max(1);
        let mut stats = DecayStats::default();
        let mut after = checkpoint.after;
        let mut batch_no = 0usize;

        tracing::info!(
            group = group.map(GroupId::as_str).unwrap_or("*"),
            batch_size,
            started_at = %checkpoint.cycle_started_at,
            resumed = after.is_some(),
            "Decay cycle starting"
        );

        loop {
            let page = match self
                .store
                .list_cognitive_nodes(group, after, batch_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(error = %e, batch = batch_no, "Decay cycle could not read next batch");
                    stats.failed_batches += 1;
                    stats.resume_from = Some(DecayCheckpoint {
                        cycle_started_at: checkpoint.cycle_started_at,
                        after,
                    });
                    break;
                }
            };
            let Some(last) = page.last() else { break };
            after = Some(last.id);
            let last_page = page.len() < batch_size;

            match self
                .decay_batch(&page, checkpoint.cycle_started_at, now)
                .await
            {
                Ok(batch) => {
                    tracing::debug!(
                        batch = batch_no,
                        processed = batch.processed,
                        deleted = batch.deleted,
                        "Decay batch complete"
                    );
                    stats.merge(batch);
                }
                Err(e) => {
                    tracing::warn!(error = %e, batch = batch_no, size = page.len(), "Decay batch failed, continuing");
                    stats.failed_batches += 1;
                }
            }

            batch_no += 1;
            if last_page {
                break;
            }
        }

        tracing::info!(
            processed = stats.processed,
            decayed = stats.decayed,
            deleted = stats.deleted,
            orphaned = stats.orphaned,
            low_confidence = stats.low_confidence,
            skipped = stats.skipped,
            failed_batches = stats.failed_batches,
            "Decay cycle complete"
        );
        stats
    }

    /// Score one page and write it back. Stats are only returned once both
    /// writes have succeeded.
    async fn decay_batch(
        &self,
        page: &[GraphNode],
        cycle_started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DecayStats> {
        let mut stats = DecayStats::default();
        let mut updates = Vec::new();
        let mut doomed = Vec::new();

        for node in page {
            if node.decayed_at.is_some_and(|at| at >= cycle_started_at) {
                stats.skipped += 1;
                continue;
            }

            let signals = self.signals(node, now).await?;
            stats.processed += 1;
            if signals.connections == 0 {
                stats.orphaned += 1;
            }
            if signals.confidence < self.config.low_confidence_threshold {
                stats.low_confidence += 1;
            }

            let salience = scoring::decayed_salience(&self.config, &signals);
            let dismissed = node.has_flag(flags::DISMISSED);
            match scoring::deletion_reason(&self.config, &signals, salience, dismissed) {
                Some(reason) => {
                    tracing::debug!(node = %node.id, ?reason, salience, "Node evicted");
                    *stats.deletions.entry(reason_key(reason).to_string()).or_insert(0) += 1;
                    doomed.push(node.id);
                }
                None => {
                    if salience < node.salience {
                        stats.decayed += 1;
                    }
                    updates.push(
                        AttributeUpdate::new(node.id)
                            .set_salience(salience)
                            .decayed_at(now),
                    );
                }
            }
        }

        if !updates.is_empty() {
            self.store.batch_update_attributes(&updates).await?;
        }
        if !doomed.is_empty() {
            stats.deleted = self.store.batch_delete(&doomed).await?;
        }
        Ok(stats)
    }
}

fn reason_key(reason: DeletionReason) -> &'static str {
    match reason {
        DeletionReason::Orphaned => "orphaned",
        DeletionReason::LowConfidence => "low_confidence",
        DeletionReason::Dismissed => "dismissed",
    }
}
