//! Hybrid search coordination
//!
//! The graph is always queried. Additional sources run concurrently under a
//! per-source timeout; a source that fails, times out or panics is skipped
//! and reported as a warning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::knowledge::{GraphQuery, KnowledgeGraphStore, canonicalize};
use crate::error::{Error, Result};

use super::candidate::{GRAPH_SOURCE, RetrievalSource, SearchCandidate, SourceRequest};

/// Default per-source timeout
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default boost for candidates returned by more than one source
pub const DEFAULT_MULTI_SOURCE_BOOST: f32 = 0.3;

/// Candidates gathered per requested result, leaving room for reranking
const CANDIDATE_FACTOR: usize = 3;

/// Merged candidates and what happened along the way
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HybridOutcome {
    /// Deduplicated candidates, best first
    pub candidates: Vec<SearchCandidate>,
    /// One entry per skipped source
    pub warnings: Vec<String>,
    /// Sources that answered
    pub sources_used: Vec<String>,
}

/// Merges graph results with keyword and vector sources
pub struct HybridSearchCoordinator {
    graph: Arc<KnowledgeGraphStore>,
    sources: Vec<Arc<dyn RetrievalSource>>,
    source_timeout: Duration,
    multi_source_boost: f32,
}

impl HybridSearchCoordinator {
    pub fn new(graph: Arc<KnowledgeGraphStore>) -> Self {
        Self {
            graph,
            sources: Vec::new(),
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            multi_source_boost: DEFAULT_MULTI_SOURCE_BOOST,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn RetrievalSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_multi_source_boost(mut self, boost: f32) -> Self {
        self.multi_source_boost = boost;
        self
    }

    pub fn graph(&self) -> &Arc<KnowledgeGraphStore> {
        &self.graph
    }

    /// Names of the configured sources, graph first
    pub fn source_names(&self) -> Vec<String> {
        std::iter::once(GRAPH_SOURCE.to_string())
            .chain(self.sources.iter().map(|s| s.name().to_string()))
            .collect()
    }

    /// Query every source and merge the results
    ///
    /// Only graph validation errors are returned; everything else from
    /// additional sources degrades to a warning.
    pub async fn search(&self, query: &GraphQuery, embedding: Option<&[f32]>) -> Result<HybridOutcome> {
        let limit = query.limit.unwrap_or(self.graph.config().default_limit);
        let wide_limit = limit.saturating_mul(CANDIDATE_FACTOR).max(limit);

        let graph_query = GraphQuery {
            limit: Some(wide_limit),
            ..query.clone()
        };
        let graph_matches = self.graph.query(&graph_query).await?;

        let mut outcome = HybridOutcome {
            sources_used: vec![GRAPH_SOURCE.to_string()],
            ..Default::default()
        };
        let mut collected: Vec<SearchCandidate> = graph_matches.into_iter().map(SearchCandidate::from).collect();

        let request = SourceRequest {
            text: query.text.clone(),
            agent: query.agent.clone(),
            category: query.category.clone(),
            limit: wide_limit,
        };
        let mut extra = self.run_sources(&request, embedding).await;
        extra.sort_by_key(|(index, _, _)| *index);

        for (_, name, result) in extra {
            match result {
                Ok(candidates) => {
                    debug!(source = %name, count = candidates.len(), "Source answered");
                    outcome.sources_used.push(name);
                    collected.extend(candidates);
                }
                Err(e) => {
                    warn!(source = %name, error = %e, "Skipping retrieval source");
                    outcome.warnings.push(e.to_string());
                }
            }
        }

        outcome.candidates = self.merge(collected, query);
        Ok(outcome)
    }

    async fn run_sources(
        &self,
        request: &SourceRequest,
        embedding: Option<&[f32]>,
    ) -> Vec<(usize, String, Result<Vec<SearchCandidate>>)> {
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for (index, source) in self.sources.iter().enumerate() {
            let name = source.name().to_string();
            if source.requires_embedding() && embedding.is_none() {
                debug!(source = %name, "No query embedding, skipping source");
                continue;
            }

            let source = Arc::clone(source);
            let request = request.clone();
            let embedding = embedding.map(<[f32]>::to_vec);
            let timeout = self.source_timeout;
            names.insert(index, name.clone());

            tasks.spawn(async move {
                let result = match tokio::time::timeout(timeout, source.search(&request, embedding.as_deref())).await {
                    Ok(Ok(candidates)) => Ok(candidates),
                    Ok(Err(e)) => Err(Error::SourceFailed {
                        source_name: name.clone(),
                        reason: e.to_string(),
                    }),
                    Err(_) => Err(Error::Timeout {
                        operation: format!("{} search", name),
                        millis: timeout.as_millis() as u64,
                    }),
                };
                (index, name, result)
            });
        }

        let mut results = Vec::with_capacity(names.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    names.remove(&result.0);
                    results.push(result);
                }
                Err(e) => warn!(error = %e, "Retrieval source task failed"),
            }
        }

        // Sources whose task panicked never reported back
        for (index, name) in names {
            results.push((
                index,
                name.clone(),
                Err(Error::SourceFailed {
                    source_name: name,
                    reason: "source task aborted".to_string(),
                }),
            ));
        }
        results
    }

    /// Deduplicate by pattern id, boost multi-source hits, filter and sort
    fn merge(&self, collected: Vec<SearchCandidate>, query: &GraphQuery) -> Vec<SearchCandidate> {
        let mut by_id: HashMap<String, SearchCandidate> = HashMap::new();
        for candidate in collected {
            match by_id.get_mut(&candidate.pattern_id) {
                Some(existing) => existing.absorb(candidate),
                None => {
                    by_id.insert(candidate.pattern_id.clone(), candidate);
                }
            }
        }

        let agent = query.agent.as_deref().map(canonicalize);
        let category = query.category.as_deref().map(canonicalize);
        let min_relevance = query
            .min_relevance
            .unwrap_or(self.graph.config().min_relevance);

        let mut merged: Vec<SearchCandidate> = by_id
            .into_values()
            .filter(|c| {
                let agent_ok = agent
                    .as_ref()
                    .is_none_or(|a| c.pattern.agent.as_deref().map(canonicalize).as_ref() == Some(a));
                let category_ok = category
                    .as_ref()
                    .is_none_or(|cat| c.pattern.category.as_deref().map(canonicalize).as_ref() == Some(cat));
                agent_ok && category_ok
            })
            .map(|mut c| {
                if c.is_multi_source() {
                    c.score += self.multi_source_boost;
                }
                c
            })
            .filter(|c| c.score >= min_relevance)
            .collect();

        merged.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::PatternRecord;
    use crate::infrastructure::knowledge::InMemoryDocumentStore;
    use async_trait::async_trait;

    struct FixedSource {
        name: &'static str,
        candidates: Vec<SearchCandidate>,
        needs_embedding: bool,
    }

    #[async_trait]
    impl RetrievalSource for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        fn requires_embedding(&self) -> bool {
            self.needs_embedding
        }

        async fn search(&self, _request: &SourceRequest, _embedding: Option<&[f32]>) -> Result<Vec<SearchCandidate>> {
            Ok(self.candidates.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl RetrievalSource for FailingSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn search(&self, _request: &SourceRequest, _embedding: Option<&[f32]>) -> Result<Vec<SearchCandidate>> {
            Err(Error::Other("backend offline".into()))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl RetrievalSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn search(&self, _request: &SourceRequest, _embedding: Option<&[f32]>) -> Result<Vec<SearchCandidate>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    async fn graph() -> Arc<KnowledgeGraphStore> {
        let graph = KnowledgeGraphStore::new(Arc::new(InMemoryDocumentStore::new()))
            .open()
            .await;
        graph
            .add_pattern(
                PatternRecord::new("Use JWT auth in Express")
                    .with_id("jwt")
                    .with_agent("marcus-backend")
                    .with_category("backend"),
            )
            .await
            .unwrap();
        graph
            .add_pattern(
                PatternRecord::new("Store JWT in httpOnly cookies")
                    .with_id("cookie")
                    .with_agent("sara-frontend")
                    .with_category("frontend"),
            )
            .await
            .unwrap();
        Arc::new(graph)
    }

    fn fixed(name: &'static str, id: &str, text: &str, score: f32) -> Arc<dyn RetrievalSource> {
        Arc::new(FixedSource {
            name,
            candidates: vec![SearchCandidate::new(id, PatternRecord::new(text), score, name)],
            needs_embedding: false,
        })
    }

    #[tokio::test]
    async fn test_graph_only() {
        let coordinator = HybridSearchCoordinator::new(graph().await);
        let outcome = coordinator.search(&GraphQuery::new("jwt"), None).await.unwrap();
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.sources_used, vec!["graph"]);
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_multi_source_boost_applied_once() {
        let graph = graph().await;
        let graph_score = graph.query(&GraphQuery::new("jwt")).await.unwrap()
            .into_iter()
            .find(|m| m.pattern_id == "jwt")
            .unwrap()
            .relevance_score;

        let coordinator = HybridSearchCoordinator::new(graph)
            .with_source(fixed("keyword", "jwt", "Use JWT auth in Express", 0.1))
            .with_source(fixed("vector", "jwt", "Use JWT auth in Express", 0.2));
        let outcome = coordinator.search(&GraphQuery::new("jwt"), None).await.unwrap();

        let merged = outcome.candidates.iter().find(|c| c.pattern_id == "jwt").unwrap();
        assert_eq!(merged.sources.len(), 3);
        assert!((merged.score - (graph_score.max(0.2) + DEFAULT_MULTI_SOURCE_BOOST)).abs() < 1e-5);
        assert_eq!(outcome.candidates[0].pattern_id, "jwt");
    }

    #[tokio::test]
    async fn test_graph_explanation_survives_higher_keyword_score() {
        let coordinator = HybridSearchCoordinator::new(graph().await).with_source(Arc::new(FixedSource {
            name: "keyword",
            candidates: vec![
                SearchCandidate::new("jwt", PatternRecord::new("Use JWT auth in Express"), 0.95, "keyword")
                    .with_explanation("keyword match: jwt"),
            ],
            needs_embedding: false,
        }));
        let outcome = coordinator.search(&GraphQuery::new("jwt"), None).await.unwrap();

        let merged = outcome.candidates.iter().find(|c| c.pattern_id == "jwt").unwrap();
        assert!((merged.score - (0.95 + DEFAULT_MULTI_SOURCE_BOOST)).abs() < 1e-5);
        assert!(merged.explanation.contains("marcus-backend"));
        assert!(!merged.explanation.contains("keyword match"));
        assert_eq!(merged.path.last().map(String::as_str), Some("jwt"));
    }

    #[tokio::test]
    async fn test_failing_source_becomes_warning() {
        let coordinator = HybridSearchCoordinator::new(graph().await).with_source(Arc::new(FailingSource));
        let outcome = coordinator.search(&GraphQuery::new("jwt"), None).await.unwrap();

        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("broken"));
        assert_eq!(outcome.sources_used, vec!["graph"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out() {
        let coordinator = HybridSearchCoordinator::new(graph().await)
            .with_source(Arc::new(SlowSource))
            .with_source_timeout(Duration::from_millis(100));
        let outcome = coordinator.search(&GraphQuery::new("jwt"), None).await.unwrap();

        assert_eq!(outcome.candidates.len(), 2);
        assert!(outcome.warnings[0].contains("timed out"));
    }

    #[tokio::test]
    async fn test_embedding_sources_skipped_without_embedding() {
        let source = Arc::new(FixedSource {
            name: "vector",
            candidates: vec![SearchCandidate::new("x", PatternRecord::new("x"), 0.9, "vector")],
            needs_embedding: true,
        });
        let coordinator = HybridSearchCoordinator::new(graph().await).with_source(source);

        let outcome = coordinator.search(&GraphQuery::new("jwt"), None).await.unwrap();
        assert!(outcome.candidates.iter().all(|c| c.pattern_id != "x"));
        assert!(outcome.warnings.is_empty());

        let outcome = coordinator.search(&GraphQuery::new("jwt"), Some(&[1.0])).await.unwrap();
        assert!(outcome.candidates.iter().any(|c| c.pattern_id == "x"));
        assert_eq!(outcome.sources_used, vec!["graph", "vector"]);
    }

    #[tokio::test]
    async fn test_filters_apply_to_all_sources() {
        let coordinator = HybridSearchCoordinator::new(graph().await)
            .with_source(fixed("keyword", "other", "JWT notes", 0.9));
        let query = GraphQuery::new("jwt").with_agent("Marcus Backend");
        let outcome = coordinator.search(&query, None).await.unwrap();

        let ids: Vec<_> = outcome.candidates.iter().map(|c| c.pattern_id.as_str()).collect();
        assert_eq!(ids, vec!["jwt"]);
    }

    #[tokio::test]
    async fn test_validation_errors_propagate() {
        let coordinator = HybridSearchCoordinator::new(graph().await);
        let err = coordinator.search(&GraphQuery::new("  "), None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
