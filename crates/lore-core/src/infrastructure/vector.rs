//! In-memory vector index
//!
//! Brute-force cosine search over pattern embeddings. Filled by the engine
//! when an embedding provider is available and queried as a
//! [`RetrievalSource`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::knowledge::PatternRecord;
use crate::domain::search::{RetrievalSource, SearchCandidate, SourceRequest};
use crate::domain::similarity::cosine_similarity;
use crate::error::{Error, Result};

pub const VECTOR_SOURCE: &str = "vector";

/// Similarity below which a pattern is not returned
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.5;

#[derive(Debug, Clone)]
struct IndexedPattern {
    record: PatternRecord,
    embedding: Vec<f32>,
}

#[derive(Debug)]
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<String, IndexedPattern>>,
    min_similarity: f32,
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    /// Add or replace a pattern's embedding
    pub fn upsert(&self, pattern_id: impl Into<String>, record: PatternRecord, embedding: Vec<f32>) -> Result<()> {
        if embedding.is_empty() {
            return Err(Error::InvalidInput("embedding must not be empty".into()));
        }
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pattern_id.into(), IndexedPattern { record, embedding });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RetrievalSource for InMemoryVectorIndex {
    fn name(&self) -> &str {
        VECTOR_SOURCE
    }

    fn requires_embedding(&self) -> bool {
        true
    }

    async fn search(&self, request: &SourceRequest, embedding: Option<&[f32]>) -> Result<Vec<SearchCandidate>> {
        let Some(embedding) = embedding else {
            return Ok(Vec::new());
        };

        let mut candidates: Vec<SearchCandidate> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .iter()
                .filter_map(|(id, indexed)| {
                    let similarity = cosine_similarity(embedding, &indexed.embedding);
                    (similarity >= self.min_similarity).then(|| {
                        SearchCandidate::new(id.clone(), indexed.record.clone(), similarity.min(1.0), VECTOR_SOURCE)
                            .with_explanation(format!("vector similarity {:.2}", similarity))
                    })
                })
                .collect()
        };

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });
        candidates.truncate(request.limit);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SourceRequest {
        SourceRequest {
            text: "anything".into(),
            limit: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_search_by_similarity() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", PatternRecord::new("a"), vec![1.0, 0.0]).unwrap();
        index.upsert("b", PatternRecord::new("b"), vec![0.8, 0.6]).unwrap();
        index.upsert("c", PatternRecord::new("c"), vec![0.0, 1.0]).unwrap();

        let results = index.search(&request(), Some(&[1.0, 0.0])).await.unwrap();
        let ids: Vec<_> = results.iter().map(|c| c.pattern_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!((results[1].score - 0.8).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_no_embedding_returns_nothing() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", PatternRecord::new("a"), vec![1.0]).unwrap();
        assert!(index.requires_embedding());
        assert!(index.search(&request(), None).await.unwrap().is_empty());
    }

    #[test]
    fn test_upsert_replaces() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", PatternRecord::new("a"), vec![1.0]).unwrap();
        index.upsert("a", PatternRecord::new("a2"), vec![0.5]).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.upsert("b", PatternRecord::new("b"), Vec::new()).is_err());
    }
}
