//! Engine behaviour against the in-memory graph store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use noema_core::config::ContradictionConfig;
use noema_core::{flags, EpisodeId, GraphEdge, GraphNode, GroupId, CONTRADICTS};
use noema_graph::{GraphStore, MemoryGraphStore};

use noema_contradiction::{
    ClassifierError, Classifier, ContradictedItem, ContradictionEngine, ContradictionError,
    ContradictionJudgment,
};

/// Scores each pair by the second statement's text.
struct Scripted {
    scores: HashMap<String, f64>,
    contradicted: Vec<usize>,
}

impl Scripted {
    fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            contradicted: Vec::new(),
        }
    }
}

#[async_trait]
impl Classifier for Scripted {
    async fn classify_contradiction(
        &self,
        _a: &str,
        b: &str,
    ) -> Result<ContradictionJudgment, ClassifierError> {
        match b {
            "garbled" => Err(ClassifierError::Malformed("not json".into())),
            "offline" => Err(ClassifierError::Transport("connection refused".into())),
            _ => Ok(ContradictionJudgment::new(
                self.scores.get(b).copied().unwrap_or(0.0),
                "scripted",
            )),
        }
    }

    async fn classify_contradicted_ids(
        &self,
        _new_item: &str,
        _candidates: &[String],
    ) -> Result<Vec<usize>, ClassifierError> {
        Ok(self.contradicted.clone())
    }
}

fn group() -> GroupId {
    GroupId::new("u1")
}

fn belief(text: &str) -> GraphNode {
    GraphNode::cognitive(group(), text, "preference", text).with_confidence(0.8)
}

fn engine(classifier: Scripted, store: Arc<MemoryGraphStore>) -> ContradictionEngine {
    ContradictionEngine::new(Arc::new(classifier), store, ContradictionConfig::default())
}

#[tokio::test]
async fn detection_filters_and_orders_matches() {
    let store = Arc::new(MemoryGraphStore::new());
    let classifier = Scripted::new(&[
        ("weak", 0.5),
        ("strong", 0.95),
        ("medium", 0.8),
        ("also medium", 0.8),
        ("unsure", 0.9),
        ("other kind", 0.99),
    ]);
    let engine = engine(classifier, store);

    let candidate = belief("new");
    let mut other_kind = belief("other kind");
    other_kind.kind = "goal".into();
    let pool = vec![
        candidate.clone(),
        belief("weak"),
        belief("medium"),
        belief("strong"),
        belief("also medium"),
        belief("unsure").with_confidence(0.1),
        other_kind,
    ];

    let found = engine
        .detect_contradictions(&candidate, &pool, 0.3)
        .await
        .unwrap();
    let texts: Vec<&str> = found.iter().map(|m| m.node.text()).collect();
    assert_eq!(texts, vec!["strong", "medium", "also medium"]);
    assert!(found.iter().all(|m| m.node.id != candidate.id));
}

#[tokio::test]
async fn score_at_threshold_is_not_a_contradiction() {
    let store = Arc::new(MemoryGraphStore::new());
    let engine = engine(Scripted::new(&[("edge", 0.7)]), store);
    let candidate = belief("new");
    let found = engine
        .detect_contradictions(&candidate, &[belief("edge")], 0.3)
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn malformed_answer_is_neutral_but_transport_fails() {
    let store = Arc::new(MemoryGraphStore::new());
    let engine = engine(Scripted::new(&[("real", 0.9)]), store);
    let candidate = belief("new");

    let found = engine
        .detect_contradictions(&candidate, &[belief("garbled"), belief("real")], 0.3)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    let err = engine
        .detect_contradictions(&candidate, &[belief("offline")], 0.3)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, ContradictionError::Classifier(_)));
}

#[tokio::test]
async fn edges_link_and_flag_both_ends() {
    let store = Arc::new(MemoryGraphStore::new());
    let old_a = belief("old a");
    let old_b = belief("old b");
    let new = belief("new");
    for n in [&old_a, &old_b, &new] {
        store.upsert_node(n).await.unwrap();
    }
    let engine = engine(Scripted::new(&[]), store.clone());
    let episode = EpisodeId::new();

    let items: Vec<ContradictedItem> = vec![old_a.clone().into(), old_b.clone().into()];
    let edges = engine
        .create_contradiction_edges(&new, None, &items, episode)
        .await
        .unwrap();

    assert_eq!(edges.len(), 2);
    for e in &edges {
        assert_eq!(e.relation, CONTRADICTS);
        assert_eq!(e.source_id, new.id);
        assert_eq!(e.episodes, vec![episode]);
    }
    for id in [new.id, old_a.id, old_b.id] {
        let node = store.get_node(&id).await.unwrap().unwrap();
        assert!(node.has_flag(flags::CONTRADICTION));
    }

    // Re-running after a retry reuses the edges.
    engine
        .create_contradiction_edges(&new, None, &items, episode)
        .await
        .unwrap();
    assert_eq!(store.all_edges().len(), 2);
}

#[tokio::test]
async fn same_endpoint_facts_are_temporal_not_contradictions() {
    let store = Arc::new(MemoryGraphStore::new());
    let (alice, acme, new) = (belief("alice"), belief("acme"), belief("new"));
    for n in [&alice, &acme, &new] {
        store.upsert_node(n).await.unwrap();
    }
    let old_fact = GraphEdge::new(group(), alice.id, acme.id, "WORKS_AT", "Alice works at Acme").unwrap();
    let new_fact = GraphEdge::new(group(), alice.id, acme.id, "WORKS_AT", "Alice left Acme").unwrap();

    let engine = engine(Scripted::new(&[]), store.clone());
    let item = ContradictedItem {
        node: alice.clone(),
        fact: Some(old_fact),
    };
    let edges = engine
        .create_contradiction_edges(&new, Some(&new_fact), &[item], EpisodeId::new())
        .await
        .unwrap();
    assert!(edges.is_empty());
    assert!(!store.get_node(&new.id).await.unwrap().unwrap().has_flag(flags::CONTRADICTION));
}

#[tokio::test]
async fn store_failure_surfaces_retryable() {
    let store = Arc::new(MemoryGraphStore::new());
    let (old, new) = (belief("old"), belief("new"));
    store.upsert_node(&old).await.unwrap();
    store.upsert_node(&new).await.unwrap();
    let engine = engine(Scripted::new(&[]), store.clone());

    store.fail_next_writes(1, true);
    let err = engine
        .create_contradiction_edges(&new, None, &[old.into()], EpisodeId::new())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn superseded_facts_are_invalidated_not_deleted() {
    let store = Arc::new(MemoryGraphStore::new());
    let (alice, acme, globex) = (belief("alice"), belief("acme"), belief("globex"));
    for n in [&alice, &acme, &globex] {
        store.upsert_node(n).await.unwrap();
    }
    let now = Utc::now();
    let old = GraphEdge::new(group(), alice.id, acme.id, "WORKS_AT", "Alice works at Acme")
        .unwrap()
        .valid_at(now - Duration::days(30));
    let unrelated = GraphEdge::new(group(), alice.id, globex.id, "KNOWS", "Alice knows Globex")
        .unwrap()
        .valid_at(now - Duration::days(30));
    let newer = GraphEdge::new(group(), acme.id, alice.id, "EMPLOYS", "Acme laid off Alice")
        .unwrap()
        .valid_at(now);
    for e in [&old, &unrelated, &newer] {
        store.create_edge(e).await.unwrap();
    }

    let mut classifier = Scripted::new(&[]);
    classifier.contradicted = vec![0];
    let engine = engine(classifier, store.clone());

    let existing = store.edges_of(&alice.id).await.unwrap();
    let facts = engine.contradicted_facts(&newer, &existing).await.unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].id, old.id);

    let invalidated = engine
        .resolve_temporal_precedence_at(&newer, &facts, now)
        .await
        .unwrap();
    assert_eq!(invalidated, vec![old.id]);

    let edges = store.all_edges();
    assert_eq!(edges.len(), 3);
    let stored = edges.iter().find(|e| e.id == old.id).unwrap();
    assert_eq!(stored.invalid_at, Some(now));
    assert_eq!(stored.expired_at, Some(now));
    assert!(edges.iter().find(|e| e.id == newer.id).unwrap().is_valid());

    // A newer edge is never superseded by an older one.
    let none = engine
        .resolve_temporal_precedence_at(&old, &[newer.clone()], now)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn candidate_pool_is_same_group_and_kind() {
    let store = Arc::new(MemoryGraphStore::new());
    let new = belief("new");
    let mut goal = belief("goal");
    goal.kind = "goal".into();
    let elsewhere = GraphNode::cognitive(GroupId::new("u2"), "x", "preference", "x");
    for n in [&new, &belief("a"), &belief("b"), &goal, &elsewhere] {
        store.upsert_node(n).await.unwrap();
    }

    let engine = ContradictionEngine::new(
        Arc::new(Scripted::new(&[])),
        store,
        ContradictionConfig {
            candidate_pool_limit: 1,
            ..ContradictionConfig::default()
        },
    );
    let pool = engine.candidate_pool(&new).await.unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool[0].kind, "preference");
    assert_ne!(pool[0].id, new.id);
}
