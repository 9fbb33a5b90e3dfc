//! In-memory DocumentStore
//!
//! Used for ephemeral engines and tests. `set_failing` makes every call
//! return a storage error so degraded-mode handling can be exercised.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::domain::knowledge::{DocumentStore, GraphEdge, GraphNode, node_matches_field};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Collections {
    nodes: BTreeMap<String, GraphNode>,
    edges: BTreeMap<String, GraphEdge>,
}

/// Document store held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<Collections>,
    failing: AtomicBool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::StorageError("in-memory store is unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Collections> {
        self.collections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Collections> {
        self.collections.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Stored documents never carry adjacency or centrality
fn as_document(node: &GraphNode) -> GraphNode {
    let mut doc = node.clone();
    doc.connections.clear();
    doc.centrality = None;
    doc
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_or_create_node(&self, node: &GraphNode) -> Result<(GraphNode, bool)> {
        self.check()?;
        let mut collections = self.write();
        if let Some(existing) = collections.nodes.get(&node.id) {
            return Ok((existing.clone(), false));
        }
        let doc = as_document(node);
        collections.nodes.insert(doc.id.clone(), doc.clone());
        Ok((doc, true))
    }

    async fn put_node(&self, node: &GraphNode) -> Result<()> {
        self.check()?;
        self.write().nodes.insert(node.id.clone(), as_document(node));
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        self.check()?;
        Ok(self.read().nodes.get(id).cloned())
    }

    async fn query_nodes_by_field(&self, field: &str, value: &str) -> Result<Vec<GraphNode>> {
        self.check()?;
        Ok(self
            .read()
            .nodes
            .values()
            .filter(|node| node_matches_field(node, field, value))
            .cloned()
            .collect())
    }

    async fn list_nodes(&self) -> Result<Vec<GraphNode>> {
        self.check()?;
        Ok(self.read().nodes.values().cloned().collect())
    }

    async fn put_edge(&self, edge: &GraphEdge) -> Result<()> {
        self.check()?;
        let mut collections = self.write();
        if !collections.nodes.contains_key(&edge.source) || !collections.nodes.contains_key(&edge.target) {
            return Err(Error::InvalidInput(format!(
                "edge {} references a missing node",
                edge.id
            )));
        }
        collections
            .edges
            .entry(edge.id.clone())
            .or_insert_with(|| edge.clone());
        Ok(())
    }

    async fn list_edges(&self) -> Result<Vec<GraphEdge>> {
        self.check()?;
        Ok(self.read().edges.values().cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::NodeType;

    #[tokio::test]
    async fn test_get_or_create() {
        let store = InMemoryDocumentStore::new();
        let node = GraphNode::new("tech_jwt", NodeType::Technology, "jwt");

        assert!(store.get_or_create_node(&node).await.unwrap().1);
        assert!(!store.get_or_create_node(&node).await.unwrap().1);
        assert_eq!(store.list_nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_edge_requires_nodes() {
        let store = InMemoryDocumentStore::new();
        let edge = GraphEdge::new("p", "tech_jwt", "uses", 0.8);
        assert!(store.put_edge(&edge).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let store = InMemoryDocumentStore::new();
        store.set_failing(true);
        let err = store.list_nodes().await.unwrap_err();
        assert!(err.is_retryable());

        store.set_failing(false);
        assert!(store.list_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_documents_drop_connections() {
        let store = InMemoryDocumentStore::new();
        let mut node = GraphNode::new("agent_a", NodeType::Agent, "a");
        node.connections.insert("p1".into());
        store.put_node(&node).await.unwrap();

        let stored = store.get_node("agent_a").await.unwrap().unwrap();
        assert!(stored.connections.is_empty());
    }
}
