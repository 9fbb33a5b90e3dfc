//! Knowledge engine facade
//!
//! Wires the graph store, retrieval cache, hybrid coordinator and reranker
//! into the operations callers use: `add_pattern`, `query`, `cache_get`,
//! `cache_set`, `invalidate` and `get_metrics`. Every engine is an explicit
//! instance; nothing is shared process-wide.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::cache::{
    CacheHit, CacheInsert, CacheKeyParams, CacheMetrics, InvalidationCriteria, TieredRetrievalCache, generate_key,
};
use crate::domain::event::{EventBus, KnowledgeEvent};
use crate::domain::knowledge::{
    DocumentStore, EntityExtractor, GraphQuery, GraphStats, KnowledgeGraphStore, PatternRecord,
};
use crate::domain::search::{
    EmbeddingProvider, HybridSearchCoordinator, PatternKeywordSource, QueryContext, RankedResult, ResultReranker,
    RetrievalSource,
};
use crate::error::{Error, Result};
use crate::infrastructure::knowledge::{InMemoryDocumentStore, SqliteDocumentStore};
use crate::infrastructure::retry::RetryPolicy;
use crate::infrastructure::vector::InMemoryVectorIndex;
use crate::storage::{Database, DatabaseConfig};

/// Warning attached to responses while durable storage is unavailable
pub const DEGRADED_WARNING: &str = "Durable storage is unavailable; patterns are kept in memory only";

/// Backend recorded on cache entries written by `query`
///
/// New patterns only invalidate these; entries stored through `cache_set`
/// or `cache_insert` stay until their TTL or an explicit `invalidate`.
pub const QUERY_BACKEND: &str = "hybrid_query";

/// Cache of reranked query results
pub type ResultCache = TieredRetrievalCache<Vec<RankedResult>>;

/// A retrieval request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_relevance: Option<f32>,
    #[serde(default)]
    pub context: QueryContext,
}

impl QueryRequest {
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

    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    /// Agent the request is made for: the context's agent, else the filter
    fn requesting_agent(&self) -> Option<&str> {
        self.context.agent_id.as_deref().or(self.agent.as_deref())
    }
}

/// Ranked results plus what happened while producing them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<RankedResult>,
    /// Skipped sources, embedding failures and degraded storage
    pub warnings: Vec<String>,
    /// Served from the retrieval cache
    pub cached: bool,
    /// Durable storage is unavailable
    pub degraded: bool,
    /// Sources that contributed; empty for cached responses
    pub sources_used: Vec<String>,
}

/// Builder for [`KnowledgeEngine`]
pub struct KnowledgeEngineBuilder {
    config: Config,
    documents: Option<Arc<dyn DocumentStore>>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    sources: Vec<Arc<dyn RetrievalSource>>,
    extractor: Option<EntityExtractor>,
}

impl KnowledgeEngineBuilder {
    pub fn with_documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings = Some(provider);
        self
    }

    /// Add a retrieval source beyond the built-in keyword and vector ones
    pub fn with_source(mut self, source: Arc<dyn RetrievalSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_extractor(mut self, extractor: EntityExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Validate the configuration, load the graph and start the cache sweeper
    pub async fn build(self) -> Result<KnowledgeEngine> {
        let config = self.config;
        config.validate().map_err(|e| Error::ConfigError(e.to_string()))?;

        let events = EventBus::default();
        let documents: Arc<dyn DocumentStore> = match self.documents {
            Some(documents) => documents,
            None => Arc::new(InMemoryDocumentStore::new()),
        };
        let backend = documents.backend_name();

        let mut graph = KnowledgeGraphStore::new(documents)
            .with_config(config.graph.clone())
            .with_retry_policy(RetryPolicy::from_config(&config.storage))
            .with_event_bus(events.clone())
            .with_max_query_len(config.search.max_query_len);
        if let Some(extractor) = self.extractor {
            graph = graph.with_extractor(extractor);
        }
        let graph = Arc::new(graph.open().await);

        let cache = Arc::new(ResultCache::new(&config.cache).with_event_bus(events.clone()));
        let vectors = Arc::new(InMemoryVectorIndex::new());

        let mut coordinator = HybridSearchCoordinator::new(Arc::clone(&graph))
            .with_source_timeout(Duration::from_millis(config.search.source_timeout_ms))
            .with_multi_source_boost(config.rerank.multi_source_boost);
        if config.search.keyword_source {
            coordinator = coordinator.with_source(Arc::new(PatternKeywordSource::new(Arc::clone(&graph))));
        }
        if self.embeddings.is_some() {
            coordinator = coordinator.with_source(vectors.clone());
        }
        for source in self.sources {
            coordinator = coordinator.with_source(source);
        }

        let shutdown = CancellationToken::new();
        let sweeper = cache.spawn_cleanup_task(config.cache.cleanup_interval(), shutdown.child_token());

        info!(
            backend,
            sources = ?coordinator.source_names(),
            embeddings = self.embeddings.is_some(),
            degraded = graph.is_degraded(),
            "Knowledge engine ready"
        );

        Ok(KnowledgeEngine {
            reranker: ResultReranker::new(config.rerank.clone()),
            config,
            graph,
            cache,
            coordinator,
            embeddings: self.embeddings,
            vectors,
            events,
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }
}

/// Hybrid knowledge-retrieval engine
pub struct KnowledgeEngine {
    config: Config,
    graph: Arc<KnowledgeGraphStore>,
    cache: Arc<ResultCache>,
    coordinator: HybridSearchCoordinator,
    reranker: ResultReranker,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    vectors: Arc<InMemoryVectorIndex>,
    events: EventBus,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl KnowledgeEngine {
    pub fn builder(config: Config) -> KnowledgeEngineBuilder {
        KnowledgeEngineBuilder {
            config,
            documents: None,
            embeddings: None,
            sources: Vec::new(),
            extractor: None,
        }
    }

    /// Engine backed by an in-memory document store
    pub async fn in_memory(config: Config) -> Result<Self> {
        Self::builder(config).build().await
    }

    /// Engine backed by the SQLite database named in the configuration
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = config.storage.resolved_database_path()?;
        let database = Database::new(DatabaseConfig::with_path(&path))
            .await
            .with_context(|| format!("Failed to open knowledge database at {}", path.display()))?;
        let documents = Arc::new(SqliteDocumentStore::new(database.pool().clone()));

        Ok(Self::builder(config).with_documents(documents).build().await?)
    }

    /// Store a pattern and return its id
    ///
    /// A pattern that could not be written to durable storage is still
    /// queryable; the failure is logged rather than returned. Cached query
    /// results are dropped so later queries can see the new pattern.
    pub async fn add_pattern(&self, record: PatternRecord) -> Result<String> {
        let id = match self.graph.add_pattern(record).await {
            Ok(id) => id,
            Err(Error::NotPersisted { pattern_id, reason }) => {
                warn!(pattern_id = %pattern_id, reason = %reason, "Pattern kept in memory only");
                pattern_id
            }
            Err(e) => return Err(e),
        };

        // Index what the graph holds, which differs from the input on a re-added id
        let record = self.graph.get_pattern(&id).await?;
        if let Some(embedding) = self.embed(&record.searchable_text()).await.ok().flatten() {
            self.vectors.upsert(&id, record, embedding)?;
        }

        let dropped = self.cache.invalidate(&InvalidationCriteria::for_backend(QUERY_BACKEND));
        if dropped > 0 {
            debug!(pattern_id = %id, dropped, "Cached results invalidated by new pattern");
        }
        Ok(id)
    }

    /// Answer a query from the cache, or from the graph and other sources
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        self.validate_query(&request)?;
        let started = Instant::now();
        let mut warnings = Vec::new();

        let embedding = match self.embed(&request.text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warnings.push(e.to_string());
                None
            }
        };

        let key = self.cache_key(&request);
        let agent = request.requesting_agent();
        let degraded = self.graph.is_degraded();
        if degraded {
            warnings.push(DEGRADED_WARNING.to_string());
        }

        if let Some(hit) = self.cache.lookup(&key, embedding.as_deref(), agent) {
            debug!(key = %key, tier = %hit.tier, fuzzy = hit.fuzzy, "Query served from cache");
            return Ok(QueryResponse {
                results: hit.value,
                warnings,
                cached: true,
                degraded,
                sources_used: Vec::new(),
            });
        }

        let limit = request.limit.unwrap_or(self.config.graph.default_limit);
        let graph_query = GraphQuery {
            text: request.text.clone(),
            agent: request.agent.clone(),
            category: request.category.clone(),
            limit: Some(limit),
            min_relevance: request.min_relevance,
        };
        let outcome = self.coordinator.search(&graph_query, embedding.as_deref()).await?;
        let complete = outcome.warnings.is_empty();
        warnings.extend(outcome.warnings);

        let mut results = self.reranker.rerank(outcome.candidates, &request.context);
        results.truncate(limit);
        self.cache.record_fetch(started.elapsed());

        // Results missing a source are not worth keeping
        if complete {
            let mut insert = CacheInsert::new(key, request.text.clone(), results.clone())
                .with_backend(QUERY_BACKEND)
                .with_tags(outcome.sources_used.iter().cloned());
            if let Some(agent) = agent {
                insert = insert.with_agent(agent);
            }
            if let Some(embedding) = embedding {
                insert = insert.with_embedding(embedding);
            }
            self.cache.set(insert)?;
        }

        info!(
            query = %request.text,
            results = results.len(),
            sources = ?outcome.sources_used,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query answered"
        );

        Ok(QueryResponse {
            results,
            warnings,
            cached: false,
            degraded,
            sources_used: outcome.sources_used,
        })
    }

    /// Cache key for a request, covering every parameter that shapes results
    pub fn cache_key(&self, request: &QueryRequest) -> String {
        let context = &request.context;
        let params = CacheKeyParams::new()
            .with_optional("agent", request.agent.as_deref())
            .with_optional("category", request.category.as_deref())
            .with_optional("limit", request.limit.map(|l| l.to_string()))
            .with_optional("min_relevance", request.min_relevance.map(|m| m.to_string()))
            .with_optional("language", context.language.as_deref())
            .with_optional("framework", context.framework.as_deref())
            .with_optional("requesting_agent", context.agent_id.as_deref())
            .with_component("images", context.wants_images.to_string());
        generate_key(&request.text, &params)
    }

    /// Direct cache lookup
    pub fn cache_get(&self, key: &str, embedding: Option<&[f32]>) -> Option<Vec<RankedResult>> {
        self.cache.get(key, embedding)
    }

    /// Direct cache lookup with hit details
    pub fn cache_lookup(&self, key: &str, embedding: Option<&[f32]>, agent_id: Option<&str>) -> Option<CacheHit<Vec<RankedResult>>> {
        self.cache.lookup(key, embedding, agent_id)
    }

    /// Direct cache insert; returns false when the entry was dropped
    pub fn cache_set(
        &self,
        key: impl Into<String>,
        query: impl Into<String>,
        results: Vec<RankedResult>,
        embedding: Option<Vec<f32>>,
    ) -> Result<bool> {
        let mut insert = CacheInsert::new(key, query, results);
        if let Some(embedding) = embedding {
            insert = insert.with_embedding(embedding);
        }
        self.cache.set(insert)
    }

    /// Insert with full control over metadata
    pub fn cache_insert(&self, insert: CacheInsert<Vec<RankedResult>>) -> Result<bool> {
        self.cache.set(insert)
    }

    pub fn invalidate(&self, criteria: &InvalidationCriteria) -> usize {
        self.cache.invalidate(criteria)
    }

    pub fn get_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    pub async fn graph_stats(&self, top_n: usize) -> GraphStats {
        self.graph.stats(top_n).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KnowledgeEvent> {
        self.events.subscribe()
    }

    pub fn is_degraded(&self) -> bool {
        self.graph.is_degraded()
    }

    pub fn graph(&self) -> &Arc<KnowledgeGraphStore> {
        &self.graph
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the cache sweeper and wait for it to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Cache sweeper did not stop cleanly");
        }
        info!("Knowledge engine stopped");
    }

    fn validate_query(&self, request: &QueryRequest) -> Result<()> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".into()));
        }
        if text.len() > self.config.search.max_query_len {
            return Err(Error::InvalidInput(format!(
                "query is {} bytes; the limit is {}",
                text.len(),
                self.config.search.max_query_len
            )));
        }
        if request.limit == Some(0) {
            return Err(Error::InvalidInput("limit must be at least 1".into()));
        }
        Ok(())
    }

    /// Embed text when a provider is configured and available
    ///
    /// Returns `Ok(None)` when there is no usable provider.
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let Some(provider) = &self.embeddings else {
            return Ok(None);
        };
        if !provider.is_available() {
            debug!(provider = provider.name(), "Embedding provider unavailable");
            return Ok(None);
        }

        let timeout = Duration::from_millis(self.config.search.source_timeout_ms);
        let result = match tokio::time::timeout(timeout, provider.embed(text)).await {
            Ok(Ok(embedding)) if !embedding.is_empty() => Ok(Some(embedding)),
            Ok(Ok(_)) => Err(Error::EmbeddingFailed(format!("{} returned an empty vector", provider.name()))),
            Ok(Err(e)) => Err(Error::EmbeddingFailed(e.to_string())),
            Err(_) => Err(Error::Timeout {
                operation: format!("{} embedding", provider.name()),
                millis: timeout.as_millis() as u64,
            }),
        };
        if let Err(e) = &result {
            warn!(provider = provider.name(), error = %e, "Continuing without an embedding");
        }
        result
    }
}

impl Drop for KnowledgeEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
