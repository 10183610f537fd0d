//! Configuration management for Noema services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`NOEMA__` prefix, `__` between sections)
//! 2. Config file (`noema.toml` by default)
//! 3. Defaults

use std::time::Duration;

use serde::Deserialize;

use crate::error::NoemaError;

/// Top-level configuration for a Noema process.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NoemaConfig {
    pub neo4j: GraphConfig,
    pub queue: QueueConfig,
    pub salience: SalienceConfig,
    pub contradiction: ContradictionConfig,
    pub decay: DecayScheduleConfig,
}

impl NoemaConfig {
    /// Load from `<file_prefix>.toml` (optional) overlaid with `NOEMA__*`
    /// environment variables.
    pub fn load(file_prefix: &str) -> Result<Self, NoemaError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("NOEMA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "noema-dev".to_string(),
            max_connections: 16,
            fetch_size: 256,
        }
    }
}

/// Job queue retry and shutdown behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Retries after the first attempt for retryable failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff unit: attempt `n` waits `n * base_delay_ms`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// How long shutdown waits for the in-flight job before cancelling it.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl QueueConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Thresholds for contradiction detection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContradictionConfig {
    /// Pairs must score strictly above this to count as a contradiction.
    pub similarity_threshold: f64,
    /// Pool members below this confidence are not compared.
    pub confidence_threshold: f64,
    /// Maximum existing nodes compared against each new node.
    pub candidate_pool_limit: usize,
}

impl Default for ContradictionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            confidence_threshold: 0.3,
            candidate_pool_limit: 50,
        }
    }
}

/// Periodic decay trigger.
#[derive(Debug, Clone, Deserialize)]
pub struct DecayScheduleConfig {
    /// Seconds between decay cycles.
    #[serde(default = "default_decay_interval")]
    pub interval_secs: u64,

    /// Nodes fetched per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Groups to decay, one cycle each. Empty means every group in one cycle.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Whether the periodic trigger is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_decay_interval() -> u64 {
    4 * 3600
}

fn default_batch_size() -> usize {
    200
}

fn default_true() -> bool {
    true
}

impl Default for DecayScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_decay_interval(),
            batch_size: default_batch_size(),
            groups: Vec::new(),
            enabled: default_true(),
        }
    }
}

/// Base salience increment per activation trigger.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriggerIncrements {
    pub conversation_mention: f64,
    pub duplicate_found: f64,
    pub reasoning_usage: f64,
    pub contradiction_involvement: f64,
}

impl Default for TriggerIncrements {
    fn default() -> Self {
        Self {
            conversation_mention: 0.30,
            duplicate_found: 0.25,
            reasoning_usage: 0.20,
            contradiction_involvement: 0.10,
        }
    }
}

/// Every numeric constant used by the salience engine.
///
/// Read once when the engine is built; bump `version` when changing the
/// shape of the curve so persisted scores can be traced to a parameter set.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SalienceConfig {
    pub version: u32,

    // Direct activation.
    pub increments: TriggerIncrements,
    /// Connectivity multiplier slope: `1 + connections * connectivity_factor`.
    pub connectivity_factor: f64,
    pub recency_fresh_multiplier: f64,
    pub recency_recent_multiplier: f64,
    pub recency_stale_multiplier: f64,
    /// Age below which a node counts as fresh, in days.
    pub recency_fresh_days: i64,
    /// Age below which a node counts as recent, in days.
    pub recency_recent_days: i64,
    /// Confidence multiplier: `confidence_base + confidence * confidence_weight`.
    pub confidence_base: f64,
    pub confidence_weight: f64,

    // Network reinforcement.
    pub network_factor: f64,
    pub network_max_hops: u32,

    // Structural boost.
    pub structural_min_neighbors: usize,
    pub structural_neighbor_confidence: f64,
    pub structural_boost: f64,

    // Decay.
    pub base_decay: f64,
    pub stale_after_days: i64,
    pub stale_penalty: f64,
    pub orphan_penalty: f64,
    pub low_confidence_threshold: f64,
    pub low_confidence_penalty: f64,
    pub resistance_per_connection: f64,
    pub max_resistance: f64,

    // Deletion.
    pub orphan_delete_salience: f64,
    pub orphan_delete_after_days: i64,
    pub low_confidence_delete_salience: f64,
    pub low_confidence_delete_after_days: i64,
    pub dismissed_delete_salience: f64,
}

impl Default for SalienceConfig {
    fn default() -> Self {
        Self {
            version: 1,
            increments: TriggerIncrements::default(),
            connectivity_factor: 0.05,
            recency_fresh_multiplier: 1.5,
            recency_recent_multiplier: 1.0,
            recency_stale_multiplier: 0.8,
            recency_fresh_days: 1,
            recency_recent_days: 7,
            confidence_base: 0.7,
            confidence_weight: 0.3,
            network_factor: 0.05,
            network_max_hops: 2,
            structural_min_neighbors: 3,
            structural_neighbor_confidence: 0.75,
            structural_boost: 0.15,
            base_decay: 0.02,
            stale_after_days: 14,
            stale_penalty: 0.10,
            orphan_penalty: 0.20,
            low_confidence_threshold: 0.3,
            low_confidence_penalty: 0.15,
            resistance_per_connection: 0.1,
            max_resistance: 0.8,
            orphan_delete_salience: 0.10,
            orphan_delete_after_days: 30,
            low_confidence_delete_salience: 0.05,
            low_confidence_delete_after_days: 60,
            dismissed_delete_salience: 0.20,
        }
    }
}
