//! Episode ingestion pipeline.
//!
//! `submit_episode` wraps all the work for one episode in a queued job:
//! extract → persist → link contradictions → supersede facts → reinforce
//! salience → publish alert. Running inside the queue keeps every graph
//! write for an episode serialized behind earlier episodes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use noema_contradiction::{
    build_alert, AlertStore, Classifier, ContradictedItem, ContradictionEngine,
};
use noema_core::config::NoemaConfig;
use noema_core::{AlertId, EdgeId, EpisodeId, GraphEdge, GraphNode, GroupId, NodeId};
use noema_graph::GraphStore;
use noema_jobs::{Job, JobError, JobQueue};
use noema_salience::{SalienceEngine, TriggerType};

use crate::error::{DaemonError, Result};

/// A unit of new information, e.g. one conversation turn.
#[derive(Debug, Clone)]
pub struct Episode {
    pub id: EpisodeId,
    pub group_id: GroupId,
    pub content: String,
    pub observed_at: DateTime<Utc>,
}

impl Episode {
    pub fn new(group_id: GroupId, content: impl Into<String>) -> Self {
        Self {
            id: EpisodeId::new(),
            group_id,
            content: content.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Nodes and facts pulled out of an episode.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub nodes: Vec<GraphNode>,
    pub facts: Vec<GraphEdge>,
}

/// Turns episode text into graph objects.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, episode: &Episode) -> Result<Extraction>;
}

/// Offline extractor: every sentence becomes one cognitive node.
///
/// Node ids are derived from the group and the normalized sentence, so the
/// same statement always lands on the same node: extracting an episode
/// twice, or repeating a statement later, never duplicates it.
#[derive(Debug, Clone)]
pub struct SentenceExtractor {
    kind: String,
    confidence: f64,
}

impl SentenceExtractor {
    pub fn new(kind: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: kind.into(),
            confidence,
        }
    }

    /// Stable node id for `sentence` within `group`.
    pub fn node_id(group: &GroupId, sentence: &str) -> NodeId {
        let key = format!("noema:sentence:{}:{}", group, normalize(sentence));
        NodeId(Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()))
    }
}

impl Default for SentenceExtractor {
    fn default() -> Self {
        Self::new("statement", 0.7)
    }
}

fn normalize(sentence: &str) -> String {
    sentence
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Extractor for SentenceExtractor {
    async fn extract(&self, episode: &Episode) -> Result<Extraction> {
        let mut seen = BTreeSet::new();
        let nodes = episode
            .content
            .split(['.', '!', '?', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty() && seen.insert(normalize(s)))
            .map(|sentence| {
                let mut node =
                    GraphNode::cognitive(episode.group_id.clone(), sentence, &self.kind, sentence)
                        .with_confidence(self.confidence)
                        .updated_at(episode.observed_at);
                node.id = Self::node_id(&episode.group_id, sentence);
                node
            })
            .collect();
        Ok(Extraction {
            nodes,
            facts: Vec::new(),
        })
    }
}

/// What one episode changed.
#[derive(Debug, Clone, Default)]
pub struct EpisodeOutcome {
    pub nodes: Vec<NodeId>,
    pub facts: Vec<EdgeId>,
    pub contradiction_edges: Vec<EdgeId>,
    pub invalidated_facts: Vec<EdgeId>,
    pub reinforced: usize,
    pub alert: Option<AlertId>,
}

/// Stages of one episode that already reached the store.
///
/// A queued job keeps this across its retries, so a retry resumes after the
/// last completed stage. The salience stages are additive and must run at
/// most once per episode.
#[derive(Debug, Default)]
struct Progress {
    extraction: Option<Extraction>,
    nodes: Option<Vec<GraphNode>>,
    facts: Option<Vec<GraphEdge>>,
    links: Option<(Vec<GraphEdge>, Vec<GraphNode>)>,
    resolved_facts: BTreeSet<EdgeId>,
    invalidated: Vec<EdgeId>,
    activated: Option<Vec<GraphNode>>,
    involvement_applied: bool,
    reinforced: Option<usize>,
    boosted: bool,
}

/// Fold what the graph already holds for a re-extracted node into the new
/// extraction. Text and kind come from the extraction; scores, flags,
/// labels and timestamps stay with the stored node.
fn merge_stored(mut node: GraphNode, stored: GraphNode) -> GraphNode {
    node.salience = stored.salience;
    node.confidence = stored.confidence;
    node.flags.extend(stored.flags);
    node.labels.extend(stored.labels);
    node.created_at = stored.created_at;
    node.updated_at = stored.updated_at;
    node.decayed_at = stored.decayed_at;
    node
}

/// Everything a queued episode job needs. Cheap to clone.
#[derive(Clone)]
struct Pipeline {
    store: Arc<dyn GraphStore>,
    extractor: Arc<dyn Extractor>,
    contradictions: Arc<ContradictionEngine>,
    salience: Arc<SalienceEngine>,
    alerts: Arc<AlertStore>,
}

impl Pipeline {
    async fn process(&self, episode: &Episode, progress: &mut Progress) -> Result<EpisodeOutcome> {
        let extraction = match progress.extraction.clone() {
            Some(extraction) => extraction,
            None => {
                let extraction = self.extractor.extract(episode).await?;
                progress.extraction = Some(extraction.clone());
                extraction
            }
        };

        let nodes = match progress.nodes.clone() {
            Some(nodes) => nodes,
            None => {
                let nodes = self.persist_nodes(episode, extraction.nodes).await?;
                progress.nodes = Some(nodes.clone());
                nodes
            }
        };
        let facts = match progress.facts.clone() {
            Some(facts) => facts,
            None => {
                let facts = self.persist_facts(episode, extraction.facts).await?;
                progress.facts = Some(facts.clone());
                facts
            }
        };

        let (contradiction_edges, involved) = match progress.links.clone() {
            Some(links) => links,
            None => {
                let links = self.link_contradictions(episode, &nodes).await?;
                progress.links = Some(links.clone());
                links
            }
        };

        // Facts the new ones supersede. Conflicts between facts on the same
        // pair of nodes are resolved here by invalidation; the node-level
        // linking above never carries facts, so it never sees them.
        for fact in &facts {
            if progress.resolved_facts.contains(&fact.id) {
                continue;
            }
            let existing: Vec<GraphEdge> = self
                .store
                .edges_between(&fact.source_id, &fact.target_id)
                .await?
                .into_iter()
                .filter(|e| !e.episodes.contains(&episode.id))
                .collect();
            let stale = self.contradictions.contradicted_facts(fact, &existing).await?;
            let invalidated = self
                .contradictions
                .resolve_temporal_precedence(fact, &stale)
                .await?;
            progress.invalidated.extend(invalidated);
            progress.resolved_facts.insert(fact.id);
        }

        // Salience.
        let activated = match progress.activated.clone() {
            Some(activated) => activated,
            None => {
                let activated = self
                    .salience
                    .update_direct_salience(&nodes, TriggerType::ConversationMention, episode.observed_at)
                    .await?;
                progress.activated = Some(activated.clone());
                activated
            }
        };
        if !progress.involvement_applied {
            if !involved.is_empty() {
                self.salience
                    .update_direct_salience(
                        &involved,
                        TriggerType::ContradictionInvolvement,
                        episode.observed_at,
                    )
                    .await?;
            }
            progress.involvement_applied = true;
        }
        let reinforced = match progress.reinforced {
            Some(count) => count,
            None => {
                let count = self
                    .salience
                    .propagate_network_reinforcement(&activated)
                    .await?
                    .len();
                progress.reinforced = Some(count);
                count
            }
        };
        if !progress.boosted {
            self.salience.apply_structural_boosts(&nodes).await?;
            progress.boosted = true;
        }

        let alert = match build_alert(&episode.group_id, &contradiction_edges) {
            Some(alert) => Some(self.alerts.publish(alert).await),
            None => None,
        };

        let outcome = EpisodeOutcome {
            nodes: nodes.iter().map(|n| n.id).collect(),
            facts: facts.iter().map(|f| f.id).collect(),
            contradiction_edges: contradiction_edges.iter().map(|e| e.id).collect(),
            invalidated_facts: progress.invalidated.clone(),
            reinforced,
            alert,
        };
        tracing::info!(
            episode = %episode.id,
            group = %episode.group_id,
            nodes = outcome.nodes.len(),
            facts = outcome.facts.len(),
            contradictions = outcome.contradiction_edges.len(),
            invalidated = outcome.invalidated_facts.len(),
            "Episode processed"
        );
        Ok(outcome)
    }

    /// Upsert extracted nodes, merged with any stored version. Returns the
    /// nodes as they now stand in the graph.
    async fn persist_nodes(&self, episode: &Episode, extracted: Vec<GraphNode>) -> Result<Vec<GraphNode>> {
        let mut nodes = Vec::with_capacity(extracted.len());
        for mut node in extracted {
            if node.group_id != episode.group_id {
                return Err(DaemonError::Extraction(format!(
                    "node {} belongs to group {}, episode to {}",
                    node.id, node.group_id, episode.group_id
                )));
            }
            node = match self.store.get_node(&node.id).await? {
                Some(stored) if stored.group_id != episode.group_id => {
                    return Err(DaemonError::Extraction(format!(
                        "node {} is stored under group {}, episode is {}",
                        node.id, stored.group_id, episode.group_id
                    )));
                }
                Some(stored) => merge_stored(node, stored),
                None => {
                    node.updated_at = episode.observed_at;
                    node
                }
            };
            self.store.upsert_node(&node).await?;
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Create the episode's facts, skipping any already stored.
    async fn persist_facts(&self, episode: &Episode, extracted: Vec<GraphEdge>) -> Result<Vec<GraphEdge>> {
        let mut facts = Vec::with_capacity(extracted.len());
        for mut fact in extracted {
            if !fact.episodes.contains(&episode.id) {
                fact.episodes.push(episode.id);
            }
            let existing = self
                .store
                .edges_between(&fact.source_id, &fact.target_id)
                .await?;
            if !existing.iter().any(|e| e.id == fact.id) {
                self.store.create_edge(&fact).await?;
            }
            facts.push(fact);
        }
        Ok(facts)
    }

    /// Contradictions between the episode's nodes and what was already
    /// known. Returns the contradiction edges and the older nodes involved,
    /// each listed once.
    async fn link_contradictions(
        &self,
        episode: &Episode,
        nodes: &[GraphNode],
    ) -> Result<(Vec<GraphEdge>, Vec<GraphNode>)> {
        let own: BTreeSet<NodeId> = nodes.iter().map(|n| n.id).collect();
        let threshold = self.contradictions.config().confidence_threshold;
        let mut edges = Vec::new();
        let mut involved: BTreeMap<NodeId, GraphNode> = BTreeMap::new();

        for node in nodes {
            let pool: Vec<GraphNode> = self
                .contradictions
                .candidate_pool(node)
                .await?
                .into_iter()
                .filter(|n| !own.contains(&n.id))
                .collect();
            let matches = self
                .contradictions
                .detect_contradictions(node, &pool, threshold)
                .await?;
            if matches.is_empty() {
                continue;
            }
            let items: Vec<ContradictedItem> = matches.into_iter().map(Into::into).collect();
            for item in &items {
                involved.entry(item.node.id).or_insert_with(|| item.node.clone());
            }
            edges.extend(
                self.contradictions
                    .create_contradiction_edges(node, None, &items, episode.id)
                    .await?,
            );
        }
        Ok((edges, involved.into_values().collect()))
    }
}

/// Front door for episodes: owns the engines and feeds the job queue.
pub struct CognitiveService {
    pipeline: Pipeline,
    queue: Arc<JobQueue>,
}

impl CognitiveService {
    pub fn new(
        store: Arc<dyn GraphStore>,
        queue: Arc<JobQueue>,
        extractor: Arc<dyn Extractor>,
        classifier: Arc<dyn Classifier>,
        config: &NoemaConfig,
    ) -> Self {
        let contradictions = Arc::new(ContradictionEngine::new(
            classifier,
            store.clone(),
            config.contradiction.clone(),
        ));
        let salience = Arc::new(SalienceEngine::new(store.clone(), config.salience.clone()));
        Self {
            pipeline: Pipeline {
                store,
                extractor,
                contradictions,
                salience,
                alerts: Arc::new(AlertStore::new()),
            },
            queue,
        }
    }

    pub fn alerts(&self) -> &Arc<AlertStore> {
        &self.pipeline.alerts
    }

    pub fn salience(&self) -> &Arc<SalienceEngine> {
        &self.pipeline.salience
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Queue the episode for processing and return the queue depth.
    ///
    /// Results are only observable afterwards, through the graph and the
    /// alert store. Retries of the job resume where the failed attempt
    /// stopped.
    pub fn submit_episode(&self, episode: Episode) -> usize {
        let pipeline = self.pipeline.clone();
        let name = format!("episode:{}", episode.id);
        let episode = Arc::new(episode);
        let progress = Arc::new(Mutex::new(Progress::default()));

        self.queue.enqueue(Job::new(name, move || {
            let pipeline = pipeline.clone();
            let episode = episode.clone();
            let progress = progress.clone();
            async move {
                let mut progress = progress.lock().await;
                pipeline
                    .process(&episode, &mut progress)
                    .await
                    .map(|_| ())
                    .map_err(JobError::from)
            }
        }))
    }

    /// Process an episode on the calling task, bypassing the queue.
    pub async fn process_episode(&self, episode: &Episode) -> Result<EpisodeOutcome> {
        self.pipeline.process(episode, &mut Progress::default()).await
    }
}
