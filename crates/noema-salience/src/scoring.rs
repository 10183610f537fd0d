//! Salience arithmetic, free of I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

use noema_core::clamp_unit;
use noema_core::config::{SalienceConfig, TriggerIncrements};

/// What caused a direct activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    ConversationMention,
    DuplicateFound,
    ReasoningUsage,
    ContradictionInvolvement,
}

impl TriggerType {
    pub const ALL: [TriggerType; 4] = [
        Self::ConversationMention,
        Self::DuplicateFound,
        Self::ReasoningUsage,
        Self::ContradictionInvolvement,
    ];

    pub fn base_increment(self, increments: &TriggerIncrements) -> f64 {
        match self {
            Self::ConversationMention => increments.conversation_mention,
            Self::DuplicateFound => increments.duplicate_found,
            Self::ReasoningUsage => increments.reasoning_usage,
            Self::ContradictionInvolvement => increments.contradiction_involvement,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConversationMention => "conversation_mention",
            Self::DuplicateFound => "duplicate_found",
            Self::ReasoningUsage => "reasoning_usage",
            Self::ContradictionInvolvement => "contradiction_involvement",
        };
        f.write_str(s)
    }
}

/// The per-node inputs every scoring rule reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSignals {
    pub salience: f64,
    pub confidence: f64,
    pub connections: usize,
    pub days_since_update: i64,
}

/// Why a decay cycle removes a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    Orphaned,
    LowConfidence,
    Dismissed,
}

// ── Direct activation ────────────────────────────────────────────

pub fn recency_multiplier(config: &SalienceConfig, days_since_update: i64) -> f64 {
    if days_since_update < config.recency_fresh_days {
        config.recency_fresh_multiplier
    } else if days_since_update < config.recency_recent_days {
        config.recency_recent_multiplier
    } else {
        config.recency_stale_multiplier
    }
}

/// Salience added by one trigger before clamping.
pub fn activation_increment(
    config: &SalienceConfig,
    trigger: TriggerType,
    signals: &NodeSignals,
) -> f64 {
    let connectivity = 1.0 + signals.connections as f64 * config.connectivity_factor;
    let recency = recency_multiplier(config, signals.days_since_update);
    let confidence = config.confidence_base + signals.confidence * config.confidence_weight;
    trigger.base_increment(&config.increments) * connectivity * recency * confidence
}

pub fn activated_salience(
    config: &SalienceConfig,
    trigger: TriggerType,
    signals: &NodeSignals,
) -> f64 {
    clamp_unit(signals.salience + activation_increment(config, trigger, signals))
}

// ── Network reinforcement ────────────────────────────────────────

/// Reinforcement one activated node passes to a node `hops` away over a
/// path of combined confidence `path_confidence`.
pub fn network_contribution(
    config: &SalienceConfig,
    hops: u32,
    path_confidence: f64,
    activated_salience: f64,
) -> f64 {
    if hops == 0 {
        return 0.0;
    }
    config.network_factor * (1.0 / hops as f64) * path_confidence * activated_salience
}

// ── Decay ────────────────────────────────────────────────────────

/// Salience removed by one decay pass, after connection resistance.
pub fn decay_amount(config: &SalienceConfig, signals: &NodeSignals) -> f64 {
    let mut decay = config.base_decay;
    if signals.days_since_update >= config.stale_after_days {
        decay += config.stale_penalty;
    }
    if signals.connections == 0 {
        decay += config.orphan_penalty;
    }
    if signals.confidence < config.low_confidence_threshold {
        decay += config.low_confidence_penalty;
    }

    let resistance =
        (signals.connections as f64 * config.resistance_per_connection).min(config.max_resistance);
    decay * (1.0 - resistance)
}

pub fn decayed_salience(config: &SalienceConfig, signals: &NodeSignals) -> f64 {
    clamp_unit((signals.salience - decay_amount(config, signals)).max(0.0))
}

/// Deletion rule for a node whose salience has already been decayed to
/// `salience`. The first matching rule wins.
pub fn deletion_reason(
    config: &SalienceConfig,
    signals: &NodeSignals,
    salience: f64,
    dismissed: bool,
) -> Option<DeletionReason> {
    if signals.connections == 0
        && salience < config.orphan_delete_salience
        && signals.days_since_update >= config.orphan_delete_after_days
    {
        return Some(DeletionReason::Orphaned);
    }
    if signals.confidence < config.low_confidence_threshold
        && salience < config.low_confidence_delete_salience
        && signals.days_since_update >= config.low_confidence_delete_after_days
    {
        return Some(DeletionReason::LowConfidence);
    }
    if dismissed && salience < config.dismissed_delete_salience {
        return Some(DeletionReason::Dismissed);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn signals(salience: f64, confidence: f64, days: i64, connections: usize) -> NodeSignals {
        NodeSignals {
            salience,
            confidence,
            connections,
            days_since_update: days,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn connected_recent_node_barely_decays() {
        let cfg = SalienceConfig::default();
        let s = signals(0.8, 0.7, 7, 3);
        assert!(close(decay_amount(&cfg, &s), 0.014));
        assert!(close(decayed_salience(&cfg, &s), 0.786));
    }

    #[test]
    fn stale_orphan_decays_fast() {
        let cfg = SalienceConfig::default();
        let s = signals(0.5, 0.7, 20, 0);
        assert!(close(decay_amount(&cfg, &s), 0.32));
        assert!(close(decayed_salience(&cfg, &s), 0.18));
    }

    #[test]
    fn resistance_is_capped() {
        let cfg = SalienceConfig::default();
        let s = signals(0.5, 0.1, 30, 50);
        // (0.02 + 0.10 + 0.15) * (1 - 0.8)
        assert!(close(decay_amount(&cfg, &s), 0.054));
    }

    #[test]
    fn decay_floors_at_zero() {
        let cfg = SalienceConfig::default();
        assert_eq!(decayed_salience(&cfg, &signals(0.05, 0.1, 90, 0)), 0.0);
    }

    #[test]
    fn duplicate_found_activation() {
        let cfg = SalienceConfig::default();
        let s = signals(0.4, 0.8, 3, 0);
        assert!(close(
            activation_increment(&cfg, TriggerType::DuplicateFound, &s),
            0.235
        ));
        assert!(close(
            activated_salience(&cfg, TriggerType::DuplicateFound, &s),
            0.635
        ));
    }

    #[test]
    fn recency_bands() {
        let cfg = SalienceConfig::default();
        assert_eq!(recency_multiplier(&cfg, 0), 1.5);
        assert_eq!(recency_multiplier(&cfg, 1), 1.0);
        assert_eq!(recency_multiplier(&cfg, 6), 1.0);
        assert_eq!(recency_multiplier(&cfg, 7), 0.8);
    }

    #[test]
    fn network_contribution_halves_per_hop() {
        let cfg = SalienceConfig::default();
        let one = network_contribution(&cfg, 1, 1.0, 0.8);
        let two = network_contribution(&cfg, 2, 1.0, 0.8);
        assert!(close(one, 0.04));
        assert!(close(two, 0.02));
        assert_eq!(network_contribution(&cfg, 0, 1.0, 0.8), 0.0);
    }

    #[test]
    fn deletion_rules() {
        let cfg = SalienceConfig::default();
        let orphan = signals(0.2, 0.7, 30, 0);
        assert_eq!(
            deletion_reason(&cfg, &orphan, 0.05, false),
            Some(DeletionReason::Orphaned)
        );
        let young_orphan = signals(0.2, 0.7, 29, 0);
        assert_eq!(deletion_reason(&cfg, &young_orphan, 0.05, false), None);

        let doubtful = signals(0.1, 0.2, 60, 2);
        assert_eq!(
            deletion_reason(&cfg, &doubtful, 0.04, false),
            Some(DeletionReason::LowConfidence)
        );
        assert_eq!(deletion_reason(&cfg, &doubtful, 0.06, false), None);

        let fresh = signals(0.3, 0.9, 0, 4);
        assert_eq!(
            deletion_reason(&cfg, &fresh, 0.19, true),
            Some(DeletionReason::Dismissed)
        );
        assert_eq!(deletion_reason(&cfg, &fresh, 0.2, true), None);
    }

    fn trigger() -> impl Strategy<Value = TriggerType> {
        prop::sample::select(TriggerType::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn salience_stays_in_unit_interval(
            start in 0.0f64..=1.0,
            confidence in 0.0f64..=1.0,
            steps in prop::collection::vec(
                (trigger(), 0usize..40, 0i64..400, any::<bool>()),
                1..60,
            ),
        ) {
            let cfg = SalienceConfig::default();
            let mut salience = start;
            for (trigger, connections, days, decay) in steps {
                let s = NodeSignals { salience, confidence, connections, days_since_update: days };
                salience = if decay {
                    decayed_salience(&cfg, &s)
                } else {
                    activated_salience(&cfg, trigger, &s)
                };
                prop_assert!((0.0..=1.0).contains(&salience), "salience {} escaped", salience);
            }
        }

        #[test]
        fn scoring_is_deterministic(
            salience in 0.0f64..=1.0,
            confidence in 0.0f64..=1.0,
            connections in 0usize..20,
            days in 0i64..100,
            trigger in trigger(),
        ) {
            let cfg = SalienceConfig::default();
            let s = NodeSignals { salience, confidence, connections, days_since_update: days };
            prop_assert_eq!(activated_salience(&cfg, trigger, &s), activated_salience(&cfg, trigger, &s));
            prop_assert_eq!(decayed_salience(&cfg, &s), decayed_salience(&cfg, &s));
        }
    }
}
