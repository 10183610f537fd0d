//! Decay scheduling.
//!
//! Spawns one tokio task per configured group (or a single task covering
//! every group), each running a decay cycle at the configured interval. A
//! semaphore keeps cycles from overlapping, including manual triggers.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use noema_core::config::DecayScheduleConfig;
use noema_core::GroupId;
use noema_salience::{DecayStats, SalienceEngine};

/// Periodic and on-demand trigger for decay cycles.
pub struct DecayScheduler {
    config: DecayScheduleConfig,
    engine: Arc<SalienceEngine>,
    concurrency: Arc<Semaphore>,
}

impl DecayScheduler {
    pub fn new(config: DecayScheduleConfig, engine: Arc<SalienceEngine>) -> Self {
        Self {
            config,
            engine,
            concurrency: Arc::new(Semaphore::new(1)),
        }
    }

    /// Run the periodic trigger until the runtime shuts down or the caller
    /// drops this future.
    pub async fn run(&self) {
        if !self.config.enabled {
            tracing::info!("Decay schedule disabled");
            return;
        }

        let targets: Vec<Option<GroupId>> = if self.config.groups.is_empty() {
            vec![None]
        } else {
            self.config.groups.iter().cloned().map(GroupId::new).map(Some).collect()
        };

        let mut handles = Vec::new();
        for group in targets {
            let engine = self.engine.clone();
            let semaphore = self.concurrency.clone();
            let period = Duration::from_secs(self.config.interval_secs.max(1));
            let batch_size = self.config.batch_size;

            handles.push(tokio::spawn(async move {
                run_group_loop(engine, group, period, batch_size, semaphore).await;
            }));
        }

        tracing::info!(
            loops = handles.len(),
            interval_secs = self.config.interval_secs,
            "Decay scheduler started"
        );

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Decay loop panicked");
            }
        }
    }

    /// Run one cycle now and return its stats. Waits for any cycle already
    /// in progress.
    pub async fn trigger_now(&self, group: Option<&GroupId>) -> DecayStats {
        tracing::info!(group = group.map(GroupId::as_str).unwrap_or("*"), "Manual decay triggered");
        run_cycle(&self.engine, group, self.config.batch_size, &self.concurrency).await
    }
}

async fn run_group_loop(
    engine: Arc<SalienceEngine>,
    group: Option<GroupId>,
    period: Duration,
    batch_size: usize,
    semaphore: Arc<Semaphore>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        tracing::info!(group = group.as_ref().map(GroupId::as_str).unwrap_or("*"), "Scheduled decay triggered");
        run_cycle(&engine, group.as_ref(), batch_size, &semaphore).await;
    }
}

async fn run_cycle(
    engine: &SalienceEngine,
    group: Option<&GroupId>,
    batch_size: usize,
    semaphore: &Semaphore,
) -> DecayStats {
    let Ok(_permit) = semaphore.acquire().await else {
        tracing::warn!("Decay scheduler closed, cycle skipped");
        return DecayStats::default();
    };
    engine.run_decay_cycle(group, batch_size).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use noema_core::config::SalienceConfig;
    use noema_core::GraphNode;
    use noema_graph::{GraphStore, MemoryGraphStore};

    fn scheduler(store: Arc<MemoryGraphStore>, config: DecayScheduleConfig) -> DecayScheduler {
        let engine = Arc::new(SalienceEngine::new(store, SalienceConfig::default()));
        DecayScheduler::new(config, engine)
    }

    #[tokio::test]
    async fn manual_trigger_returns_cycle_stats() {
        let store = Arc::new(MemoryGraphStore::new());
        for name in ["a", "b"] {
            let node = GraphNode::cognitive(GroupId::new("u1"), name, "belief", name);
            store.upsert_node(&node).await.unwrap();
        }
        let other = GraphNode::cognitive(GroupId::new("u2"), "c", "belief", "c");
        store.upsert_node(&other).await.unwrap();

        let sched = scheduler(store, DecayScheduleConfig::default());
        let stats = sched.trigger_now(Some(&GroupId::new("u1"))).await;
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.orphaned, 2);

        let all = sched.trigger_now(None).await;
        assert_eq!(all.processed + all.skipped, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_loop_runs_each_interval() {
        let store = Arc::new(MemoryGraphStore::new());
        let node = GraphNode::cognitive(GroupId::new("u1"), "a", "belief", "a").with_salience(0.9);
        store.upsert_node(&node).await.unwrap();

        let config = DecayScheduleConfig {
            interval_secs: 60,
            ..DecayScheduleConfig::default()
        };
        let sched = Arc::new(scheduler(store.clone(), config));
        let runner = {
            let sched = sched.clone();
            tokio::spawn(async move { sched.run().await })
        };

        tokio::time::sleep(Duration::from_secs(30)).await;
        let untouched = store.get_node(&node.id).await.unwrap().unwrap();
        assert_eq!(untouched.salience, 0.9);

        tokio::time::sleep(Duration::from_secs(40)).await;
        let decayed = store.get_node(&node.id).await.unwrap().unwrap();
        assert!(decayed.salience < 0.9);
        assert!(decayed.decayed_at.is_some());

        runner.abort();
    }

    #[tokio::test]
    async fn disabled_schedule_returns_immediately() {
        let store = Arc::new(MemoryGraphStore::new());
        let sched = scheduler(
            store,
            DecayScheduleConfig {
                enabled: false,
                ..DecayScheduleConfig::default()
            },
        );
        sched.run().await;
    }
}
