//! Search candidates and the result sources that produce them

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::knowledge::{GraphMatch, PatternRecord};
use crate::error::Result;

/// Source name used for graph traversal results
pub const GRAPH_SOURCE: &str = "graph";

/// A pattern proposed by one or more sources, before reranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub pattern_id: String,
    pub pattern: PatternRecord,
    /// Source relevance in [0, 1], plus the multi-source boost once merged
    pub score: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    #[serde(default)]
    pub explanation: String,
    /// Names of the sources that returned this pattern
    pub sources: BTreeSet<String>,
}

impl SearchCandidate {
    pub fn new(pattern_id: impl Into<String>, pattern: PatternRecord, score: f32, source: &str) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            pattern,
            score,
            path: Vec::new(),
            explanation: String::new(),
            sources: BTreeSet::from([source.to_string()]),
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }

    /// Fold another source's view of the same pattern into this one
    ///
    /// Keeps the higher score. When graph traversal found the pattern, its
    /// path and explanation stay, whichever source scored higher; otherwise
    /// the explanation follows the higher score.
    pub fn absorb(&mut self, other: SearchCandidate) {
        let ours_from_graph = self.sources.contains(GRAPH_SOURCE);
        let theirs_from_graph = other.sources.contains(GRAPH_SOURCE);
        let theirs_scored_higher = other.score > self.score;

        self.score = self.score.max(other.score);
        self.sources.extend(other.sources);

        let take_theirs = if ours_from_graph != theirs_from_graph {
            theirs_from_graph
        } else {
            theirs_scored_higher || self.explanation.is_empty()
        };
        if take_theirs {
            if !other.explanation.is_empty() {
                self.explanation = other.explanation;
            }
            if !other.path.is_empty() {
                self.path = other.path;
            }
        }
    }

    pub fn is_multi_source(&self) -> bool {
        self.sources.len() > 1
    }
}

impl From<GraphMatch> for SearchCandidate {
    fn from(m: GraphMatch) -> Self {
        Self::new(m.pattern_id, m.pattern, m.relevance_score, GRAPH_SOURCE)
            .with_path(m.path)
            .with_explanation(m.explanation)
    }
}

/// What a retrieval source is asked for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub limit: usize,
}

/// An additional result source merged with graph traversal
#[async_trait]
pub trait RetrievalSource: Send + Sync {
    fn name(&self) -> &str;

    /// Sources that need a query embedding are skipped when none is available
    fn requires_embedding(&self) -> bool {
        false
    }

    async fn search(&self, request: &SourceRequest, embedding: Option<&[f32]>) -> Result<Vec<SearchCandidate>>;
}

/// Text to vector embedding
///
/// Callers check [`is_available`](Self::is_available) before embedding and
/// fall back to graph and keyword retrieval when it returns false.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
