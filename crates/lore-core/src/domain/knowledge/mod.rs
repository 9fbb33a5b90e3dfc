//! Pattern knowledge graph
//!
//! Patterns are linked to the entities they mention (agent, category,
//! technology, tag). A query is answered by finding the entities it names
//! and walking a bounded number of hops out to pattern nodes.
//!
//! ```text
//!   PatternRecord ─► EntityExtractor ─► KnowledgeGraphStore ─► DocumentStore
//!                                            │
//!   query text ─► seed entities ─► BFS ─► scored GraphMatch list
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lore_core::domain::knowledge::{GraphQuery, KnowledgeGraphStore, PatternRecord};
//! use lore_core::infrastructure::knowledge::InMemoryDocumentStore;
//!
//! let store = KnowledgeGraphStore::new(Arc::new(InMemoryDocumentStore::new())).open().await;
//! store.add_pattern(
//!     PatternRecord::new("Use JWT auth in Express").with_agent("marcus-backend"),
//! ).await?;
//!
//! let matches = store.query(&GraphQuery::new("JWT authentication")).await?;
//! println!("{}", matches[0].explanation);
//! ```

mod entity;
mod extractor;
mod relationship;
mod repository;
mod store;

pub use entity::{ENTITY_ID_PREFIXES, GraphNode, Modality, NodeType, PatternRecord, canonicalize};
pub use extractor::{EntityExtractor, EntityKind, ExtractedEntity, TechTerm};
pub(crate) use extractor::contains_bounded;
pub use relationship::{GraphEdge, Relationship};
pub use repository::{DocumentStore, node_matches_field};
pub use store::{EntityCentrality, GraphMatch, GraphQuery, GraphStats, KnowledgeGraphStore};
