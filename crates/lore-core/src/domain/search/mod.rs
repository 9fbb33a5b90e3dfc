//! Hybrid search and reranking
//!
//! # Architecture
//!
//! - **Candidates**: `SearchCandidate`, produced by graph traversal and any
//!   number of `RetrievalSource`s
//! - **Coordinator**: `HybridSearchCoordinator` merges and deduplicates
//!   candidates, isolating source failures
//! - **Reranker**: `ResultReranker` turns candidates into `RankedResult`s
//!   using relevance, recency, project context, agent expertise and modality
//!
//! # Example
//!
//! ```ignore
//! use lore_core::domain::search::{HybridSearchCoordinator, PatternKeywordSource, QueryContext, ResultReranker};
//!
//! let coordinator = HybridSearchCoordinator::new(graph.clone())
//!     .with_source(Arc::new(PatternKeywordSource::new(graph.clone())));
//! let outcome = coordinator.search(&GraphQuery::new("JWT authentication"), None).await?;
//! let ranked = ResultReranker::default().rerank(outcome.candidates, &QueryContext::new().with_language("typescript"));
//! ```

mod candidate;
mod coordinator;
mod keyword;
mod reranker;

pub use candidate::{EmbeddingProvider, GRAPH_SOURCE, RetrievalSource, SearchCandidate, SourceRequest};
pub use coordinator::{DEFAULT_MULTI_SOURCE_BOOST, DEFAULT_SOURCE_TIMEOUT, HybridOutcome, HybridSearchCoordinator};
pub use keyword::{KEYWORD_SOURCE, PatternKeywordSource};
pub use reranker::{QueryContext, RankedResult, ResultReranker, ScoreBreakdown};
