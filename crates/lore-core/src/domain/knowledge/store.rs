//! Pattern knowledge graph
//!
//! The store keeps the whole graph in memory for traversal and mirrors
//! writes to a [`DocumentStore`]. Pattern insertion is serialized per store;
//! queries only take the read lock and may see a graph that is one write
//! behind.
//!
//! Node documents are persisted without their connection sets. Adjacency is
//! rebuilt from the edge collection when the store is opened, so durable
//! writes stay append-only.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::GraphConfig;
use crate::domain::event::{EventBus, KnowledgeEvent};
use crate::error::{Error, Result};
use crate::infrastructure::retry::RetryPolicy;

use super::entity::{GraphNode, NodeType, PatternRecord, canonicalize};
use super::extractor::{EntityExtractor, EntityKind, ExtractedEntity, contains_bounded};
use super::relationship::GraphEdge;
use super::repository::DocumentStore;

/// Default maximum query length (in bytes)
pub const DEFAULT_MAX_QUERY_LEN: usize = 1000;

/// Entity labels shorter than this only match a query that equals them
const MIN_CONTAINED_LABEL_LEN: usize = 3;

/// Separator between labels in a match explanation
const PATH_SEPARATOR: &str = " → ";

/// A graph query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphQuery {
    pub text: String,
    /// Only return patterns created by this agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Only return patterns in this category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Maximum number of results (store default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Minimum relevance score (store default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_relevance: Option<f32>,
}

impl GraphQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_min_relevance(mut self, min_relevance: f32) -> Self {
        self.min_relevance = Some(min_relevance);
        self
    }
}

/// A pattern reached by graph traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMatch {
    pub pattern_id: String,
    pub pattern: PatternRecord,
    pub relevance_score: f32,
    /// Node ids from the matched entity to the pattern
    pub path: Vec<String>,
    /// Path resolved to labels, plus the pattern's agent and category
    pub explanation: String,
}

/// Summary statistics for the graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub average_degree: f32,
    /// Highest-centrality entity nodes (pattern nodes excluded)
    pub top_entities: Vec<EntityCentrality>,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCentrality {
    pub id: String,
    pub label: String,
    pub node_type: NodeType,
    pub degree: usize,
    pub centrality: f32,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<String, GraphNode>,
    edges: HashMap<String, GraphEdge>,
}

impl GraphState {
    /// Insert an edge and record both endpoints as connected
    ///
    /// Edges whose endpoints are unknown are rejected.
    fn link(&mut self, edge: GraphEdge) -> bool {
        if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
            return false;
        }
        if let Some(node) = self.nodes.get_mut(&edge.source) {
            node.connections.insert(edge.target.clone());
        }
        if let Some(node) = self.nodes.get_mut(&edge.target) {
            node.connections.insert(edge.source.clone());
        }
        self.edges.entry(edge.id.clone()).or_insert(edge);
        true
    }

    fn centrality(&self, node: &GraphNode) -> f32 {
        let others = self.nodes.len().saturating_sub(1);
        if others == 0 {
            0.0
        } else {
            node.degree() as f32 / others as f32
        }
    }
}

/// Working set for one `add_pattern` call
struct PendingPattern {
    pattern_node: GraphNode,
    entity_nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

/// Knowledge graph of patterns and the entities they mention
pub struct KnowledgeGraphStore {
    state: RwLock<GraphState>,
    write_lock: Mutex<()>,
    documents: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    extractor: EntityExtractor,
    config: GraphConfig,
    max_query_len: usize,
    degraded: AtomicBool,
    events: EventBus,
}

impl KnowledgeGraphStore {
    /// Create an empty store backed by `documents`
    ///
    /// Call [`open`](Self::open) to load previously persisted nodes.
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            write_lock: Mutex::new(()),
            documents,
            retry: RetryPolicy::default(),
            extractor: EntityExtractor::new(),
            config: GraphConfig::default(),
            max_query_len: DEFAULT_MAX_QUERY_LEN,
            degraded: AtomicBool::new(false),
            events: EventBus::default(),
        }
    }

    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_extractor(mut self, extractor: EntityExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_max_query_len(mut self, max_query_len: usize) -> Self {
        self.max_query_len = max_query_len;
        self
    }

    /// Load the persisted graph; on failure the store starts empty in
    /// degraded mode
    pub async fn open(self) -> Self {
        match self.hydrate().await {
            Ok((nodes, edges)) => {
                info!(
                    backend = self.documents.backend_name(),
                    nodes, edges, "Knowledge graph opened"
                );
            }
            Err(e) => self.mark_degraded(&format!("failed to load graph: {}", e)),
        }
        self
    }

    /// Replace the in-memory graph with the persisted one
    ///
    /// Returns the number of nodes and edges loaded.
    pub async fn hydrate(&self) -> Result<(usize, usize)> {
        let documents = &self.documents;
        let nodes = self.retry.run("list_nodes", || documents.list_nodes()).await?;
        let edges = self.retry.run("list_edges", || documents.list_edges()).await?;

        let mut loaded = GraphState::default();
        for mut node in nodes {
            node.connections.clear();
            node.centrality = None;
            loaded.nodes.insert(node.id.clone(), node);
        }

        for edge in edges {
            let id = edge.id.clone();
            if !loaded.link(edge) {
                warn!(edge_id = %id, "Skipping edge with missing endpoint");
            }
        }

        let counts = (loaded.nodes.len(), loaded.edges.len());
        *self.state.write().await = loaded;
        Ok(counts)
    }

    /// Add a pattern and link it to its extracted entities
    ///
    /// The in-memory graph is always updated. When the durable write fails
    /// after retries, or the store is already degraded, this returns
    /// [`Error::NotPersisted`]; re-adding the same pattern id later is safe.
    ///
    /// A pattern id that is already in the graph keeps its stored record:
    /// the stored record is written again and the new content is ignored.
    pub async fn add_pattern(&self, record: PatternRecord) -> Result<String> {
        record.validate()?;

        let _guard = self.write_lock.lock().await;

        let pattern_id = record.resolve_id();
        let existing = self.state.read().await.nodes.get(&pattern_id).cloned();
        let record = match existing {
            None => record,
            Some(node) => {
                let Some(stored) = node.pattern() else {
                    return Err(Error::InvalidInput(format!(
                        "id '{}' already belongs to a {} node",
                        pattern_id, node.node_type
                    )));
                };
                if stored.pattern != record.pattern
                    || stored.agent != record.agent
                    || stored.category != record.category
                    || stored.tags != record.tags
                {
                    warn!(
                        pattern_id = %pattern_id,
                        "Pattern id already stored with different content; keeping the stored pattern"
                    );
                }
                stored
            }
        };
        let entities = self.extractor.extract_from_pattern(&record);
        let pending = Self::build_pending(&pattern_id, &record, &entities)?;

        let persisted = if self.is_degraded() {
            Err("storage is degraded; running in memory only".to_string())
        } else {
            self.persist(&pending).await.map_err(|e| {
                let reason = e.to_string();
                self.mark_degraded(&reason);
                reason
            })
        };

        let created = self.apply(pending).await;

        let entity_ids: Vec<String> = entities.into_iter().map(|e| e.id).collect();
        debug!(
            pattern_id = %pattern_id,
            entities = entity_ids.len(),
            created_nodes = created,
            "Pattern linked"
        );
        self.events.publish(KnowledgeEvent::pattern_stored(
            &pattern_id,
            entity_ids,
            persisted.is_ok(),
        ));

        match persisted {
            Ok(()) => {
                info!(pattern_id = %pattern_id, "Pattern stored");
                Ok(pattern_id)
            }
            Err(reason) => Err(Error::NotPersisted { pattern_id, reason }),
        }
    }

    fn build_pending(
        pattern_id: &str,
        record: &PatternRecord,
        entities: &[ExtractedEntity],
    ) -> Result<PendingPattern> {
        let pattern_node = GraphNode::from_pattern(pattern_id, record)?;

        let entity_nodes = entities
            .iter()
            .map(|e| GraphNode::new(&e.id, e.kind.node_type(), &e.label))
            .collect();

        let edges = entities
            .iter()
            .map(|e| GraphEdge::new(pattern_id, &e.id, e.relationship.as_str(), e.weight))
            .collect();

        Ok(PendingPattern {
            pattern_node,
            entity_nodes,
            edges,
        })
    }

    async fn persist(&self, pending: &PendingPattern) -> Result<()> {
        let documents = &self.documents;

        for node in &pending.entity_nodes {
            self.retry
                .run("get_or_create_node", || documents.get_or_create_node(node))
                .await?;
        }

        let pattern = &pending.pattern_node;
        self.retry
            .run("put_node", || documents.put_node(pattern))
            .await?;

        for edge in &pending.edges {
            self.retry.run("put_edge", || documents.put_edge(edge)).await?;
        }

        Ok(())
    }

    /// Merge a pending pattern into memory; returns how many nodes were new
    async fn apply(&self, pending: PendingPattern) -> usize {
        let mut state = self.state.write().await;
        let mut created = 0;

        for node in std::iter::once(pending.pattern_node).chain(pending.entity_nodes) {
            if !state.nodes.contains_key(&node.id) {
                state.nodes.insert(node.id.clone(), node);
                created += 1;
            }
        }

        for edge in pending.edges {
            state.link(edge);
        }

        created
    }

    /// Find patterns related to the entities mentioned in a query
    pub async fn query(&self, query: &GraphQuery) -> Result<Vec<GraphMatch>> {
        let text = query.text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".into()));
        }
        if text.len() > self.max_query_len {
            return Err(Error::InvalidInput(format!(
                "query is {} bytes; the limit is {}",
                text.len(),
                self.max_query_len
            )));
        }
        let limit = query.limit.unwrap_or(self.config.default_limit);
        if limit == 0 {
            return Err(Error::InvalidInput("limit must be at least 1".into()));
        }
        let min_relevance = query.min_relevance.unwrap_or(self.config.min_relevance);

        let state = self.state.read().await;

        let seeds = self.seed_entities(&state, text);
        if seeds.is_empty() {
            debug!(query = %text, "Query matched no entities");
            return Ok(Vec::new());
        }

        let mut best: HashMap<String, (f32, Vec<String>)> = HashMap::new();
        for (seed_id, seed_weight) in &seeds {
            for (pattern_id, path) in traverse(&state, seed_id, self.config.max_depth) {
                let Some(node) = state.nodes.get(&pattern_id) else {
                    continue;
                };
                let Some(record) = node.pattern() else {
                    continue;
                };
                let score = path_score(path.len() - 1, *seed_weight, &record);

                match best.get(&pattern_id) {
                    Some((existing, _)) if *existing >= score => {}
                    _ => {
                        best.insert(pattern_id, (score, path));
                    }
                }
            }
        }

        let agent_filter = query.agent.as_deref().map(canonicalize);
        let category_filter = query.category.as_deref().map(canonicalize);

        let mut matches: Vec<GraphMatch> = best
            .into_iter()
            .filter_map(|(pattern_id, (score, path))| {
                let record = state.nodes.get(&pattern_id)?.pattern()?;
                if !field_matches(record.agent.as_deref(), agent_filter.as_deref())
                    || !field_matches(record.category.as_deref(), category_filter.as_deref())
                    || score < min_relevance
                {
                    return None;
                }
                let explanation = explain(&state, &path, &record);
                Some(GraphMatch {
                    pattern_id,
                    pattern: record,
                    relevance_score: score,
                    path,
                    explanation,
                })
            })
            .collect();

        matches.sort_by(compare_matches);
        matches.truncate(limit);

        debug!(
            query = %text,
            seeds = seeds.len(),
            results = matches.len(),
            "Graph query complete"
        );
        Ok(matches)
    }

    /// Entity nodes mentioned by the query, with their entity weight
    fn seed_entities(&self, state: &GraphState, text: &str) -> Vec<(String, f32)> {
        let mut seeds: Vec<(String, f32)> = Vec::new();
        let mut seen = HashSet::new();

        for entity in self.extractor.extract_technologies(text) {
            if state.nodes.contains_key(&entity.id) && seen.insert(entity.id.clone()) {
                seeds.push((entity.id, entity.weight));
            }
        }

        let lowered = text.to_lowercase();
        let canonical = canonicalize(text);

        let mut named: Vec<&GraphNode> = state
            .nodes
            .values()
            .filter(|node| !node.is_pattern() && !seen.contains(&node.id))
            .filter(|node| {
                let label = node.label.as_str();
                label == canonical
                    || (label.chars().count() >= MIN_CONTAINED_LABEL_LEN
                        && (contains_bounded(&lowered, label) || contains_bounded(&canonical, label)))
            })
            .collect();
        named.sort_by(|a, b| a.id.cmp(&b.id));

        for node in named {
            let weight = EntityKind::from_node_type(node.node_type)
                .map(|kind| kind.default_weight())
                .unwrap_or(0.0);
            seen.insert(node.id.clone());
            seeds.push((node.id.clone(), weight));
        }

        seeds
    }

    /// Get a node with its centrality filled in
    pub async fn get_node(&self, id: &str) -> Option<GraphNode> {
        let state = self.state.read().await;
        state.nodes.get(id).map(|node| {
            let mut node = node.clone();
            node.centrality = Some(state.centrality(&node));
            node
        })
    }

    /// Get a stored pattern by id
    pub async fn get_pattern(&self, id: &str) -> Result<PatternRecord> {
        self.state
            .read()
            .await
            .nodes
            .get(id)
            .and_then(GraphNode::pattern)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Every stored pattern, ordered by id
    pub async fn all_patterns(&self) -> Vec<(String, PatternRecord)> {
        let state = self.state.read().await;
        let mut patterns: Vec<(String, PatternRecord)> = state
            .nodes
            .values()
            .filter_map(|node| node.pattern().map(|p| (node.id.clone(), p)))
            .collect();
        patterns.sort_by(|a, b| a.0.cmp(&b.0));
        patterns
    }

    /// Edges touching a node
    pub async fn edges_for(&self, node_id: &str) -> Vec<GraphEdge> {
        let state = self.state.read().await;
        let mut edges: Vec<GraphEdge> = state
            .edges
            .values()
            .filter(|e| e.other_end(node_id).is_some())
            .cloned()
            .collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges
    }

    /// Summary statistics, with the `top_n` most central entities
    pub async fn stats(&self, top_n: usize) -> GraphStats {
        let state = self.state.read().await;

        let mut nodes_by_type = BTreeMap::new();
        let mut total_degree = 0usize;
        for node in state.nodes.values() {
            *nodes_by_type.entry(node.node_type.to_string()).or_insert(0) += 1;
            total_degree += node.degree();
        }

        let mut top_entities: Vec<EntityCentrality> = state
            .nodes
            .values()
            .filter(|node| !node.is_pattern())
            .map(|node| EntityCentrality {
                id: node.id.clone(),
                label: node.label.clone(),
                node_type: node.node_type,
                degree: node.degree(),
                centrality: state.centrality(node),
            })
            .collect();
        top_entities.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.id.cmp(&b.id)));
        top_entities.truncate(top_n);

        let node_count = state.nodes.len();
        GraphStats {
            node_count,
            edge_count: state.edges.len(),
            nodes_by_type,
            average_degree: if node_count == 0 {
                0.0
            } else {
                total_degree as f32 / node_count as f32
            },
            top_entities,
            degraded: self.is_degraded(),
        }
    }

    /// Whether durable writes have been abandoned
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn mark_degraded(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(
                backend = self.documents.backend_name(),
                reason, "Durable storage unavailable, continuing in memory only"
            );
            self.events.publish(KnowledgeEvent::storage_degraded(reason));
        }
    }

    /// Clear degraded mode so the next write tries storage again
    pub fn reset_degraded(&self) {
        if self.degraded.swap(false, Ordering::AcqRel) {
            info!("Durable storage writes re-enabled");
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }
}

/// Breadth-first traversal from `start`, returning each pattern node
/// reached within `max_depth` hops and the shortest path to it
fn traverse(state: &GraphState, start: &str, max_depth: u32) -> Vec<(String, Vec<String>)> {
    let mut found = Vec::new();
    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut queue: VecDeque<Vec<&str>> = VecDeque::from([vec![start]]);

    while let Some(path) = queue.pop_front() {
        let Some(current) = path.last().and_then(|id| state.nodes.get(*id)) else {
            continue;
        };

        if path.len() > 1 && current.is_pattern() {
            found.push((current.id.clone(), path.iter().map(|s| s.to_string()).collect()));
        }

        if path.len() as u32 > max_depth {
            continue;
        }

        for next in &current.connections {
            if visited.insert(next.as_str()) {
                let mut extended = path.clone();
                extended.push(next.as_str());
                queue.push_back(extended);
            }
        }
    }

    found
}

/// Score a pattern reached after `hops` edges from an entity of `entity_weight`
fn path_score(hops: usize, entity_weight: f32, record: &PatternRecord) -> f32 {
    let proximity = 1.0 / (hops as f32 + 1.0);
    let usage = (record.usage_count as f32 / 10.0).min(1.0);
    0.4 * proximity + 0.2 * entity_weight + 0.2 * record.effectiveness + 0.2 * usage
}

fn field_matches(value: Option<&str>, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(wanted) => value.is_some_and(|v| canonicalize(v) == wanted),
    }
}

fn explain(state: &GraphState, path: &[String], record: &PatternRecord) -> String {
    let labels: Vec<&str> = path
        .iter()
        .map(|id| state.nodes.get(id).map_or(id.as_str(), |n| n.label.as_str()))
        .collect();
    let mut explanation = labels.join(PATH_SEPARATOR);

    let mut context = Vec::new();
    if let Some(agent) = &record.agent {
        context.push(format!("agent: {}", agent));
    }
    if let Some(category) = &record.category {
        context.push(format!("category: {}", category));
    }
    if !context.is_empty() {
        explanation.push_str(&format!(" [{}]", context.join(", ")));
    }
    explanation
}

fn compare_matches(a: &GraphMatch, b: &GraphMatch) -> CmpOrdering {
    b.relevance_score
        .total_cmp(&a.relevance_score)
        .then_with(|| b.pattern.usage_count.cmp(&a.pattern.usage_count))
        .then_with(|| b.pattern.last_used.cmp(&a.pattern.last_used))
        .then_with(|| a.pattern_id.cmp(&b.pattern_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::knowledge::InMemoryDocumentStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    fn jwt_pattern() -> PatternRecord {
        PatternRecord::new("Use JWT auth in Express")
            .with_agent("marcus-backend")
            .with_category("backend")
            .with_tags(["auth"])
    }

    fn new_store() -> (KnowledgeGraphStore, Arc<InMemoryDocumentStore>) {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let store = KnowledgeGraphStore::new(documents.clone()).with_retry_policy(RetryPolicy::new(
            2,
            Duration::from_millis(1),
            Duration::from_millis(200),
        ));
        (store, documents)
    }

    #[tokio::test]
    async fn test_jwt_scenario() {
        let (store, _) = new_store();
        let id = store.add_pattern(jwt_pattern()).await.unwrap();

        let results = store.query(&GraphQuery::new("JWT authentication")).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].pattern_id, id);
        assert!(results[0].relevance_score > 0.0);
        assert!(results[0].explanation.contains("marcus-backend"));
        assert_eq!(results[0].path, vec!["tech_jwt".to_string(), id]);
    }

    #[tokio::test]
    async fn test_score_formula() {
        let (store, _) = new_store();
        store
            .add_pattern(jwt_pattern().with_effectiveness(1.0).with_usage(20, None))
            .await
            .unwrap();

        let results = store.query(&GraphQuery::new("jwt")).await.unwrap();
        // 0.4 * 1/2 + 0.2 * 0.8 + 0.2 * 1.0 + 0.2 * 1.0
        assert!((results[0].relevance_score - 0.76).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_max_score_across_entities() {
        let (store, _) = new_store();
        store.add_pattern(jwt_pattern()).await.unwrap();

        // Both the technology (0.8) and the agent (1.0) match; the agent path wins
        let results = store
            .query(&GraphQuery::new("jwt from marcus-backend"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path[0], "agent_marcus-backend");
        let expected = 0.4 * 0.5 + 0.2 * 1.0 + 0.2 * 0.5;
        assert!((results[0].relevance_score - expected).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_entity_nodes_are_idempotent() {
        let (store, documents) = new_store();
        store.add_pattern(jwt_pattern()).await.unwrap();
        store.add_pattern(jwt_pattern()).await.unwrap();

        let stats = store.stats(10).await;
        assert_eq!(stats.nodes_by_type.get("pattern"), Some(&2));
        assert_eq!(stats.nodes_by_type.get("agent"), Some(&1));
        assert_eq!(stats.nodes_by_type.get("technology"), Some(&2));

        let agents = documents.query_nodes_by_field("node_type", "agent").await.unwrap();
        assert_eq!(agents.len(), 1);
    }

    #[tokio::test]
    async fn test_same_pattern_id_is_idempotent() {
        let (store, _) = new_store();
        store.add_pattern(jwt_pattern().with_id("p1")).await.unwrap();
        store.add_pattern(jwt_pattern().with_id("p1")).await.unwrap();

        let stats = store.stats(10).await;
        assert_eq!(stats.nodes_by_type.get("pattern"), Some(&1));
        assert_eq!(stats.edge_count, 5);
    }

    #[tokio::test]
    async fn test_readding_id_keeps_stored_pattern_everywhere() {
        let (store, documents) = new_store();
        store
            .add_pattern(PatternRecord::new("Use JWT in Express").with_id("p1").with_agent("alice"))
            .await
            .unwrap();
        store
            .add_pattern(PatternRecord::new("Use Redis in Django").with_id("p1").with_agent("bob"))
            .await
            .unwrap();

        let in_memory = store.get_pattern("p1").await.unwrap();
        assert_eq!(in_memory.pattern, "Use JWT in Express");
        assert!(store.get_node("agent_bob").await.is_none());

        let reopened = KnowledgeGraphStore::new(documents).open().await;
        let durable = reopened.get_pattern("p1").await.unwrap();
        assert_eq!(durable.pattern, in_memory.pattern);
        assert_eq!(durable.agent.as_deref(), Some("alice"));
        assert_eq!(reopened.stats(0).await.edge_count, store.stats(0).await.edge_count);

        let by_bob = reopened.query(&GraphQuery::new("redis").with_agent("bob")).await.unwrap();
        assert!(by_bob.is_empty());
    }

    #[tokio::test]
    async fn test_pattern_id_cannot_reuse_entity_id() {
        let (store, documents) = new_store();
        store.add_pattern(jwt_pattern()).await.unwrap();

        let err = store
            .add_pattern(PatternRecord::new("Sneaky").with_id("tech_jwt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let node = documents.get_node("tech_jwt").await.unwrap().unwrap();
        assert_eq!(node.node_type, NodeType::Technology);
    }

    #[tokio::test]
    async fn test_connections_are_bidirectional() {
        let (store, _) = new_store();
        let id = store.add_pattern(jwt_pattern()).await.unwrap();

        let pattern = store.get_node(&id).await.unwrap();
        assert_eq!(pattern.degree(), 5);
        for neighbor in &pattern.connections {
            let node = store.get_node(neighbor).await.unwrap();
            assert!(node.connections.contains(&id));
        }
        for edge in store.edges_for(&id).await {
            assert!(store.get_node(&edge.target).await.is_some());
        }
    }

    #[tokio::test]
    async fn test_no_entities_returns_empty() {
        let (store, _) = new_store();
        store.add_pattern(jwt_pattern()).await.unwrap();

        let results = store.query(&GraphQuery::new("quantum knitting")).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_queries() {
        let (store, _) = new_store();
        assert!(matches!(
            store.query(&GraphQuery::new("   ")).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.query(&GraphQuery::new("x".repeat(2000))).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.query(&GraphQuery::new("jwt").with_limit(0)).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_filters() {
        let (store, _) = new_store();
        store.add_pattern(jwt_pattern()).await.unwrap();
        store
            .add_pattern(
                PatternRecord::new("JWT refresh in React")
                    .with_agent("sara-frontend")
                    .with_category("frontend"),
            )
            .await
            .unwrap();

        let all = store.query(&GraphQuery::new("jwt")).await.unwrap();
        assert_eq!(all.len(), 2);

        let backend = store
            .query(&GraphQuery::new("jwt").with_category("Backend"))
            .await
            .unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(backend[0].pattern.agent.as_deref(), Some("marcus-backend"));

        let unknown = store
            .query(&GraphQuery::new("jwt").with_agent("nobody"))
            .await
            .unwrap();
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn test_min_relevance_and_limit() {
        let (store, _) = new_store();
        for i in 0..5 {
            store
                .add_pattern(PatternRecord::new(format!("Redis pattern {}", i)).with_usage(i, None))
                .await
                .unwrap();
        }

        let limited = store.query(&GraphQuery::new("redis").with_limit(3)).await.unwrap();
        assert_eq!(limited.len(), 3);

        let none = store
            .query(&GraphQuery::new("redis").with_min_relevance(0.99))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_tie_breaks() {
        let (store, _) = new_store();
        let now = Utc::now();
        // Usage below 10 still changes the score, so equal usage isolates last_used
        store
            .add_pattern(
                PatternRecord::new("docker old")
                    .with_id("old")
                    .with_usage(3, Some(now - ChronoDuration::days(5))),
            )
            .await
            .unwrap();
        store
            .add_pattern(
                PatternRecord::new("docker new")
                    .with_id("new")
                    .with_usage(3, Some(now)),
            )
            .await
            .unwrap();
        store
            .add_pattern(PatternRecord::new("docker busy").with_id("busy").with_usage(15, None))
            .await
            .unwrap();
        store
            .add_pattern(PatternRecord::new("docker busier").with_id("busier").with_usage(40, None))
            .await
            .unwrap();

        let results = store.query(&GraphQuery::new("docker")).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.pattern_id.as_str()).collect();
        assert_eq!(ids, vec!["busier", "busy", "new", "old"]);
    }

    #[tokio::test]
    async fn test_own_fields_find_pattern() {
        let (store, _) = new_store();
        let id = store
            .add_pattern(
                PatternRecord::new("Memoize selectors")
                    .with_agent("sara-frontend")
                    .with_category("ui")
                    .with_tags(["performance"]),
            )
            .await
            .unwrap();

        for text in ["sara-frontend", "Sara Frontend", "ui", "performance"] {
            let results = store.query(&GraphQuery::new(text)).await.unwrap();
            assert!(
                results.iter().any(|r| r.pattern_id == id),
                "query {:?} missed the pattern",
                text
            );
        }
    }

    #[tokio::test]
    async fn test_deeper_traversal_reaches_related_patterns() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let store = KnowledgeGraphStore::new(documents).with_config(GraphConfig {
            max_depth: 3,
            ..Default::default()
        });
        store.add_pattern(jwt_pattern().with_id("a")).await.unwrap();
        store
            .add_pattern(PatternRecord::new("Rate limit login").with_id("b").with_tags(["auth"]))
            .await
            .unwrap();

        // jwt -> a -> tag_auth -> b
        let results = store.query(&GraphQuery::new("jwt")).await.unwrap();
        let b = results.iter().find(|r| r.pattern_id == "b").unwrap();
        assert_eq!(b.path.len(), 4);
        assert!(results[0].relevance_score > b.relevance_score);
        assert!(b.explanation.contains(" → "));
    }

    #[tokio::test]
    async fn test_hydration_rebuilds_adjacency() {
        let (store, documents) = new_store();
        let id = store.add_pattern(jwt_pattern()).await.unwrap();

        let reopened = KnowledgeGraphStore::new(documents).open().await;
        assert!(!reopened.is_degraded());

        let node = reopened.get_node(&id).await.unwrap();
        assert_eq!(node.degree(), 5);
        let results = reopened.query(&GraphQuery::new("jwt")).await.unwrap();
        assert_eq!(results[0].pattern_id, id);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory_and_degrades() {
        let (store, documents) = new_store();
        let mut events = store.events.subscribe();
        documents.set_failing(true);

        let result = store.add_pattern(jwt_pattern().with_id("p1")).await;
        assert!(matches!(result, Err(Error::NotPersisted { .. })));
        assert!(store.is_degraded());

        // Still queryable in memory
        let results = store.query(&GraphQuery::new("jwt")).await.unwrap();
        assert_eq!(results[0].pattern_id, "p1");

        let first = events.recv().await.unwrap();
        assert_eq!(first.event_type_name(), "storage_degraded");

        // Recovery: retry with the same id creates nothing new
        documents.set_failing(false);
        store.reset_degraded();
        store.add_pattern(jwt_pattern().with_id("p1")).await.unwrap();
        assert_eq!(store.stats(0).await.node_count, 6);
        assert_eq!(documents.list_nodes().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_open_with_failing_store_starts_degraded() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        documents.set_failing(true);
        let store = KnowledgeGraphStore::new(documents)
            .with_retry_policy(RetryPolicy::no_retry(Duration::from_millis(50)))
            .open()
            .await;

        assert!(store.is_degraded());
        assert_eq!(store.stats(5).await.node_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_adds_do_not_duplicate_entities() {
        let (store, _) = new_store();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add_pattern(
                        PatternRecord::new(format!("Kafka consumer {}", i)).with_agent("marcus-backend"),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = store.stats(1).await;
        assert_eq!(stats.nodes_by_type.get("agent"), Some(&1));
        assert_eq!(stats.nodes_by_type.get("technology"), Some(&1));
        assert_eq!(stats.top_entities[0].degree, 8);
    }

    #[tokio::test]
    async fn test_centrality() {
        let (store, _) = new_store();
        store.add_pattern(jwt_pattern()).await.unwrap();

        let agent = store.get_node("agent_marcus-backend").await.unwrap();
        // 6 nodes: the agent touches 1 of the 5 others
        assert!((agent.centrality.unwrap() - 0.2).abs() < 1e-6);
    }
}
