//! Lore Core Library
//!
//! This crate provides a hybrid knowledge-retrieval engine, including:
//! - Pattern knowledge graph (entity extraction, bounded traversal, path scoring)
//! - Tiered retrieval cache (hot/warm/cold TTLs, LRU eviction, fuzzy lookups)
//! - Hybrid search across graph, keyword and vector sources
//! - Multi-factor result reranking
//! - Storage (SQLite document store with versioned migrations)

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod infrastructure;
pub mod storage;

pub use engine::{KnowledgeEngine, KnowledgeEngineBuilder, QueryRequest, QueryResponse};
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::cache::{CacheMetrics, InvalidationCriteria};
    pub use crate::domain::knowledge::{Modality, PatternRecord};
    pub use crate::domain::search::{QueryContext, RankedResult};
    pub use crate::engine::{KnowledgeEngine, QueryRequest, QueryResponse};
    pub use crate::error::{Error, Result};
}

#[cfg(test)]
mod config_tests;
