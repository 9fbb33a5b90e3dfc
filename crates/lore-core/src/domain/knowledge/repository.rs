//! Durable document store for the knowledge graph
//!
//! The graph keeps its working set in memory and mirrors every write to a
//! document store with two collections: nodes and edges. Any backend that
//! can get-or-create by id, upsert, fetch and filter on a field fits.

use async_trait::async_trait;

use crate::error::Result;

use super::entity::GraphNode;
use super::relationship::GraphEdge;

/// Document store holding the `nodes` and `edges` collections
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ========== Node Operations ==========

    /// Insert the node unless one with the same id exists; returns the
    /// stored node and whether it was created by this call
    async fn get_or_create_node(&self, node: &GraphNode) -> Result<(GraphNode, bool)>;

    /// Insert or replace a node
    async fn put_node(&self, node: &GraphNode) -> Result<()>;

    /// Get a node by id
    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>>;

    /// Find nodes whose top-level field (`node_type`, `label`) or property
    /// equals `value`
    async fn query_nodes_by_field(&self, field: &str, value: &str) -> Result<Vec<GraphNode>>;

    /// List every node
    async fn list_nodes(&self) -> Result<Vec<GraphNode>>;

    // ========== Edge Operations ==========

    /// Insert an edge; an existing edge with the same id is left untouched
    async fn put_edge(&self, edge: &GraphEdge) -> Result<()>;

    /// List every edge
    async fn list_edges(&self) -> Result<Vec<GraphEdge>>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Whether a node matches a `query_nodes_by_field` filter
pub fn node_matches_field(node: &GraphNode, field: &str, value: &str) -> bool {
    match field {
        "id" => node.id == value,
        "node_type" | "type" => node.node_type.as_str() == value,
        "label" => node.label == value,
        _ => match node.properties.get(field) {
            Some(serde_json::Value::String(s)) => s == value,
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .any(|item| item.as_str().is_some_and(|s| s == value)),
            Some(other) => other.to_string() == value,
            None => false,
        },
    }
}
