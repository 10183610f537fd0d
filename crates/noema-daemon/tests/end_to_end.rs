//! Episodes flowing through the queue into the in-memory graph.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use noema_contradiction::HeuristicClassifier;
use noema_core::config::{NoemaConfig, QueueConfig};
use noema_core::{flags, AlertEvent, EdgeId, GraphEdge, GraphNode, GroupId, NodeId, Severity};
use noema_daemon::error::Result;
use noema_daemon::pipeline::{CognitiveService, Episode, Extraction, Extractor, SentenceExtractor};
use noema_graph::{
    AttributeUpdate, GraphStore, MemoryGraphStore, StoreError, StoreErrorKind, StoreResult,
    TraversalHit,
};
use noema_jobs::{JobQueue, QueueStats};

fn service_with(store: Arc<dyn GraphStore>, extractor: Arc<dyn Extractor>) -> CognitiveService {
    let queue = Arc::new(JobQueue::new(QueueConfig {
        max_retries: 3,
        base_delay_ms: 5,
        shutdown_timeout_secs: 5,
    }));
    queue.start();
    CognitiveService::new(
        store,
        queue,
        extractor,
        Arc::new(HeuristicClassifier::new()),
        &NoemaConfig::default(),
    )
}

async fn settle(service: &CognitiveService, jobs: u64) -> QueueStats {
    for _ in 0..500 {
        let stats = service.queue().stats();
        if stats.completed + stats.abandoned >= jobs {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("jobs did not finish: {:?}", service.queue().stats());
}

fn group() -> GroupId {
    GroupId::new("user-1")
}

#[tokio::test]
async fn love_then_hate_raises_one_low_alert() {
    let store = Arc::new(MemoryGraphStore::new());
    let service = service_with(store.clone(), Arc::new(SentenceExtractor::default()));
    let mut events = service.alerts().subscribe();

    service.submit_episode(Episode::new(group(), "I love vanilla ice cream"));
    service.submit_episode(Episode::new(group(), "I hate vanilla ice cream"));
    let stats = settle(&service, 2).await;
    assert_eq!(stats.completed, 2);

    let contradictions: Vec<_> = store
        .all_edges()
        .into_iter()
        .filter(|e| e.is_contradiction())
        .collect();
    assert_eq!(contradictions.len(), 1);

    let nodes = store.list_cognitive_nodes(Some(&group()), None, 10).await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().all(|n| n.has_flag(flags::CONTRADICTION)));

    let hate = nodes.iter().find(|n| n.name.contains("hate")).unwrap();
    let love = nodes.iter().find(|n| n.name.contains("love")).unwrap();
    assert_eq!(contradictions[0].source_id, hate.id);
    assert_eq!(contradictions[0].target_id, love.id);

    let alerts = service.alerts().list(Some(&group()), None).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Low);
    assert_eq!(alerts[0].message, "New information contradicts 1 existing belief");

    match events.recv().await.unwrap() {
        AlertEvent::Raised { alert } => assert_eq!(alert.id, alerts[0].id),
        other => panic!("unexpected event {other:?}"),
    }

    service.queue().shutdown().await;
}

#[tokio::test]
async fn transient_store_failure_is_retried() {
    let store = Arc::new(MemoryGraphStore::new());
    let service = service_with(store.clone(), Arc::new(SentenceExtractor::default()));

    store.fail_next_writes(2, true);
    service.submit_episode(Episode::new(group(), "I enjoy long walks"));
    let stats = settle(&service, 1).await;

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.retried, 2);
    assert_eq!(store.node_count(), 1);
    service.queue().shutdown().await;
}

#[tokio::test]
async fn permanent_store_failure_drops_the_episode() {
    let store = Arc::new(MemoryGraphStore::new());
    let service = service_with(store.clone(), Arc::new(SentenceExtractor::default()));

    store.fail_next_writes(1, false);
    service.submit_episode(Episode::new(group(), "I enjoy long walks"));
    let stats = settle(&service, 1).await;

    assert_eq!(stats.abandoned, 1);
    assert_eq!(stats.retried, 0);
    assert_eq!(store.node_count(), 0);
    service.queue().shutdown().await;
}

/// Hands out prepared extractions in order.
struct Prepared(Mutex<Vec<Extraction>>);

#[async_trait]
impl Extractor for Prepared {
    async fn extract(&self, _episode: &Episode) -> Result<Extraction> {
        Ok(self.0.lock().unwrap().remove(0))
    }
}

#[tokio::test]
async fn newer_fact_supersedes_older_one() {
    let store = Arc::new(MemoryGraphStore::new());
    let alice = GraphNode::cognitive(group(), "Alice", "person", "Alice");
    let acme = GraphNode::cognitive(group(), "Acme", "organization", "Acme");

    let old_fact = GraphEdge::new(group(), alice.id, acme.id, "FEELS_ABOUT", "Alice loves working at Acme")
        .unwrap()
        .valid_at(Utc::now() - chrono::Duration::days(90));
    let new_fact = GraphEdge::new(group(), alice.id, acme.id, "FEELS_ABOUT", "Alice hates working at Acme")
        .unwrap();

    let extractor = Prepared(Mutex::new(vec![
        Extraction {
            nodes: vec![alice.clone(), acme.clone()],
            facts: vec![old_fact.clone()],
        },
        Extraction {
            nodes: vec![alice.clone(), acme.clone()],
            facts: vec![new_fact.clone()],
        },
    ]));
    let service = service_with(store.clone(), Arc::new(extractor));

    let first = service
        .process_episode(&Episode::new(group(), "first"))
        .await
        .unwrap();
    assert!(first.invalidated_facts.is_empty());

    let second = service
        .process_episode(&Episode::new(group(), "second"))
        .await
        .unwrap();
    assert_eq!(second.invalidated_facts, vec![old_fact.id]);
    assert!(second.alert.is_none());

    let edges = store.all_edges();
    assert_eq!(edges.len(), 2);
    let old = edges.iter().find(|e| e.id == old_fact.id).unwrap();
    assert!(old.invalid_at.is_some());
    assert!(old.expired_at.is_some());
    assert!(edges.iter().find(|e| e.id == new_fact.id).unwrap().is_valid());
    assert!(second.contradiction_edges.is_empty());
    assert!(edges.iter().all(|e| !e.is_contradiction()));
    service.queue().shutdown().await;
}

#[tokio::test]
async fn activation_reinforces_linked_beliefs() {
    let store = Arc::new(MemoryGraphStore::new());
    let tea = GraphNode::cognitive(group(), "tea", "preference", "Likes green tea").with_salience(0.2);
    let kyoto = GraphNode::cognitive(group(), "kyoto", "memory", "Visited Kyoto").with_salience(0.2);
    store.upsert_node(&kyoto).await.unwrap();
    let link = GraphEdge::new(group(), tea.id, kyoto.id, "RELATES_TO", "tea from Kyoto").unwrap();

    let extractor = Prepared(Mutex::new(vec![Extraction {
        nodes: vec![tea.clone()],
        facts: vec![link],
    }]));
    let service = service_with(store.clone(), Arc::new(extractor));

    let outcome = service
        .process_episode(&Episode::new(group(), "tea"))
        .await
        .unwrap();
    assert_eq!(outcome.reinforced, 1);

    let tea_now = store.get_node(&tea.id).await.unwrap().unwrap();
    let kyoto_now = store.get_node(&kyoto.id).await.unwrap().unwrap();
    assert!(tea_now.salience > 0.2);
    assert!(kyoto_now.salience > 0.2);
    service.queue().shutdown().await;
}

/// Delegates to the in-memory store but fails the `fail_on`-th attribute
/// batch (1-based) with a retryable error.
struct FlakyUpdates {
    inner: MemoryGraphStore,
    calls: AtomicUsize,
    fail_on: usize,
}

impl FlakyUpdates {
    fn new(fail_on: usize) -> Self {
        Self {
            inner: MemoryGraphStore::new(),
            calls: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl GraphStore for FlakyUpdates {
    async fn get_node(&self, id: &NodeId) -> StoreResult<Option<GraphNode>> {
        self.inner.get_node(id).await
    }

    async fn upsert_node(&self, node: &GraphNode) -> StoreResult<()> {
        self.inner.upsert_node(node).await
    }

    async fn create_edge(&self, edge: &GraphEdge) -> StoreResult<()> {
        self.inner.create_edge(edge).await
    }

    async fn invalidate_edge(&self, id: &EdgeId, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.invalidate_edge(id, at).await
    }

    async fn edges_between(&self, a: &NodeId, b: &NodeId) -> StoreResult<Vec<GraphEdge>> {
        self.inner.edges_between(a, b).await
    }

    async fn edges_of(&self, node: &NodeId) -> StoreResult<Vec<GraphEdge>> {
        self.inner.edges_of(node).await
    }

    async fn traverse(
        &self,
        start: &NodeId,
        max_hops: u32,
        label_filter: Option<&str>,
        group_filter: Option<&GroupId>,
    ) -> StoreResult<Vec<TraversalHit>> {
        self.inner
            .traverse(start, max_hops, label_filter, group_filter)
            .await
    }

    async fn batch_update_attributes(&self, updates: &[AttributeUpdate]) -> StoreResult<usize> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(StoreError::retryable(
                StoreErrorKind::Connection,
                "connection reset",
            ));
        }
        self.inner.batch_update_attributes(updates).await
    }

    async fn batch_delete(&self, ids: &[NodeId]) -> StoreResult<usize> {
        self.inner.batch_delete(ids).await
    }

    async fn count_neighbors(
        &self,
        id: &NodeId,
        confidence_threshold: Option<f64>,
    ) -> StoreResult<usize> {
        self.inner.count_neighbors(id, confidence_threshold).await
    }

    async fn list_cognitive_nodes(
        &self,
        group: Option<&GroupId>,
        after: Option<NodeId>,
        limit: usize,
    ) -> StoreResult<Vec<GraphNode>> {
        self.inner.list_cognitive_nodes(group, after, limit).await
    }
}

#[tokio::test]
async fn retry_after_nodes_are_stored_creates_no_duplicates() {
    let store = Arc::new(FlakyUpdates::new(1));
    let service = service_with(store.clone(), Arc::new(SentenceExtractor::default()));

    service.submit_episode(Episode::new(group(), "I enjoy long walks"));
    let stats = settle(&service, 1).await;

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(store.inner.node_count(), 1);

    let id = SentenceExtractor::node_id(&group(), "I enjoy long walks");
    let node = store.get_node(&id).await.unwrap().unwrap();
    assert!(node.salience > 0.5);
    service.queue().shutdown().await;
}

/// Runs the tea/Kyoto episode against `store`. Returns both saliences and
/// the retry count.
async fn reinforce_linked(store: Arc<dyn GraphStore>) -> (f64, f64, u64) {
    let mut tea =
        GraphNode::cognitive(group(), "tea", "preference", "Likes green tea").with_salience(0.2);
    let mut kyoto =
        GraphNode::cognitive(group(), "kyoto", "memory", "Visited Kyoto").with_salience(0.2);
    tea.id = SentenceExtractor::node_id(&group(), "tea");
    kyoto.id = SentenceExtractor::node_id(&group(), "kyoto");
    store.upsert_node(&kyoto).await.unwrap();
    let link = GraphEdge::new(group(), tea.id, kyoto.id, "RELATES_TO", "tea from Kyoto").unwrap();

    let extractor = Prepared(Mutex::new(vec![Extraction {
        nodes: vec![tea.clone()],
        facts: vec![link],
    }]));
    let service = service_with(store.clone(), Arc::new(extractor));
    service.submit_episode(Episode::new(group(), "tea"));
    let stats = settle(&service, 1).await;
    assert_eq!(stats.completed, 1);
    service.queue().shutdown().await;

    let tea_now = store.get_node(&tea.id).await.unwrap().unwrap().salience;
    let kyoto_now = store.get_node(&kyoto.id).await.unwrap().unwrap().salience;
    (tea_now, kyoto_now, stats.retried)
}

#[tokio::test]
async fn retry_does_not_repeat_additive_salience() {
    // Attribute batches: direct activation, then network reinforcement.
    // Failing the second one forces a retry after activation was written.
    let (clean_tea, clean_kyoto, clean_retries) =
        reinforce_linked(Arc::new(MemoryGraphStore::new())).await;
    let (tea, kyoto, retries) = reinforce_linked(Arc::new(FlakyUpdates::new(2))).await;

    assert_eq!(clean_retries, 0);
    assert_eq!(retries, 1);
    assert!((tea - clean_tea).abs() < 1e-9, "tea {tea} vs {clean_tea}");
    assert!((kyoto - clean_kyoto).abs() < 1e-9, "kyoto {kyoto} vs {clean_kyoto}");
}

#[tokio::test]
async fn re_mention_keeps_stored_flags_and_builds_on_stored_salience() {
    let store = Arc::new(MemoryGraphStore::new());
    let text = "I prefer window seats";
    let mut stored = GraphNode::cognitive(group(), text, "statement", text)
        .with_salience(0.9)
        .with_confidence(0.6)
        .with_flag(flags::CONTRADICTION)
        .with_flag(flags::DISMISSED);
    stored.id = SentenceExtractor::node_id(&group(), text);
    store.upsert_node(&stored).await.unwrap();

    let service = service_with(store.clone(), Arc::new(SentenceExtractor::default()));
    service
        .process_episode(&Episode::new(group(), text))
        .await
        .unwrap();

    assert_eq!(store.node_count(), 1);
    let node = store.get_node(&stored.id).await.unwrap().unwrap();
    assert!(node.has_flag(flags::CONTRADICTION));
    assert!(node.has_flag(flags::DISMISSED));
    assert_eq!(node.confidence, 0.6);
    assert_eq!(node.salience, 1.0);
    assert_eq!(node.created_at, stored.created_at);
    service.queue().shutdown().await;
}
