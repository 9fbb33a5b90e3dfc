//! SQLite implementation of the DocumentStore
//!
//! Nodes and edges live in `graph_nodes` / `graph_edges`; node properties
//! are stored as a JSON document.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::domain::knowledge::{DocumentStore, GraphEdge, GraphNode, NodeType, node_matches_field};
use crate::error::{Error, Result};

/// SQLite implementation of the graph document store
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Create a store over a migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_node(&self, id: &str) -> Result<Option<GraphNode>> {
        let row: Option<NodeRow> = sqlx::query_as(
            "SELECT id, node_type, label, properties FROM graph_nodes WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NodeRow::into_node).transpose()
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    // ========== Node Operations ==========

    async fn get_or_create_node(&self, node: &GraphNode) -> Result<(GraphNode, bool)> {
        let properties = serde_json::to_string(&node.properties)?;

        let result = sqlx::query(
            r#"
            INSERT INTO graph_nodes (id, node_type, label, properties)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&node.id)
        .bind(node.node_type.as_str())
        .bind(&node.label)
        .bind(&properties)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;
        if created {
            debug!(node_id = %node.id, node_type = %node.node_type, "Node created");
        }

        let stored = self
            .fetch_node(&node.id)
            .await?
            .ok_or_else(|| Error::StorageError(format!("node '{}' vanished after insert", node.id)))?;
        Ok((stored, created))
    }

    async fn put_node(&self, node: &GraphNode) -> Result<()> {
        let properties = serde_json::to_string(&node.properties)?;

        sqlx::query(
            r#"
            INSERT INTO graph_nodes (id, node_type, label, properties)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                node_type = excluded.node_type,
                label = excluded.label,
                properties = excluded.properties
            "#,
        )
        .bind(&node.id)
        .bind(node.node_type.as_str())
        .bind(&node.label)
        .bind(&properties)
        .execute(&self.pool)
        .await?;

        debug!(node_id = %node.id, "Node saved");
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        self.fetch_node(id).await
    }

    async fn query_nodes_by_field(&self, field: &str, value: &str) -> Result<Vec<GraphNode>> {
        let rows: Vec<NodeRow> = match field {
            "id" | "node_type" | "type" | "label" => {
                let column = match field {
                    "id" => "id",
                    "label" => "label",
                    _ => "node_type",
                };
                sqlx::query_as(&format!(
                    "SELECT id, node_type, label, properties FROM graph_nodes WHERE {} = ? ORDER BY id",
                    column
                ))
                .bind(value)
                .fetch_all(&self.pool)
                .await?
            }
            // Narrow by substring, then match the decoded property exactly
            _ => {
                sqlx::query_as(
                    "SELECT id, node_type, label, properties FROM graph_nodes WHERE instr(properties, ?) > 0 ORDER BY id",
                )
                .bind(value)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let node = row.into_node()?;
            if node_matches_field(&node, field, value) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn list_nodes(&self) -> Result<Vec<GraphNode>> {
        let rows: Vec<NodeRow> =
            sqlx::query_as("SELECT id, node_type, label, properties FROM graph_nodes ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(NodeRow::into_node).collect()
    }

    // ========== Edge Operations ==========

    async fn put_edge(&self, edge: &GraphEdge) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO graph_edges (id, source, target, relationship, weight)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&edge.id)
        .bind(&edge.source)
        .bind(&edge.target)
        .bind(&edge.relationship)
        .bind(edge.weight)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_edges(&self) -> Result<Vec<GraphEdge>> {
        let rows: Vec<EdgeRow> = sqlx::query_as(
            "SELECT id, source, target, relationship, weight FROM graph_edges ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EdgeRow::into_edge).collect())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[derive(FromRow)]
struct NodeRow {
    id: String,
    node_type: String,
    label: String,
    properties: String,
}

impl NodeRow {
    fn into_node(self) -> Result<GraphNode> {
        let node_type = NodeType::parse(&self.node_type).ok_or_else(|| {
            Error::StorageError(format!("Invalid node type '{}' on node {}", self.node_type, self.id))
        })?;
        let properties: BTreeMap<String, serde_json::Value> = serde_json::from_str(&self.properties)?;

        Ok(GraphNode::new(self.id, node_type, self.label).with_properties(properties))
    }
}

#[derive(FromRow)]
struct EdgeRow {
    id: String,
    source: String,
    target: String,
    relationship: String,
    weight: f32,
}

impl EdgeRow {
    fn into_edge(self) -> GraphEdge {
        GraphEdge {
            id: self.id,
            source: self.source,
            target: self.target,
            relationship: self.relationship,
            weight: self.weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::PatternRecord;
    use crate::storage::migrations::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqliteDocumentStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");

        run_migrations(&pool).await.expect("Failed to run migrations");

        SqliteDocumentStore::new(pool)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = setup_test_db().await;
        let node = GraphNode::new("agent_marcus-backend", NodeType::Agent, "marcus-backend");

        let (_, created) = store.get_or_create_node(&node).await.unwrap();
        assert!(created);

        let renamed = GraphNode::new("agent_marcus-backend", NodeType::Agent, "other");
        let (stored, created) = store.get_or_create_node(&renamed).await.unwrap();
        assert!(!created);
        assert_eq!(stored.label, "marcus-backend");

        assert_eq!(store.list_nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pattern_node_roundtrip() {
        let store = setup_test_db().await;
        let record = PatternRecord::new("Use JWT auth in Express")
            .with_agent("marcus-backend")
            .with_tags(["auth"]);
        let node = GraphNode::from_pattern("p1", &record).unwrap();

        store.put_node(&node).await.unwrap();
        let loaded = store.get_node("p1").await.unwrap().unwrap();

        let decoded = loaded.pattern().unwrap();
        assert_eq!(decoded.agent.as_deref(), Some("marcus-backend"));
        assert!(decoded.tags.contains("auth"));
        assert!(store.get_node("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_edges_deduplicated() {
        let store = setup_test_db().await;
        store
            .put_node(&GraphNode::new("p1", NodeType::Pattern, "p1"))
            .await
            .unwrap();
        store
            .put_node(&GraphNode::new("tech_jwt", NodeType::Technology, "jwt"))
            .await
            .unwrap();

        let edge = GraphEdge::new("p1", "tech_jwt", "uses", 0.8);
        store.put_edge(&edge).await.unwrap();
        store.put_edge(&edge).await.unwrap();

        let edges = store.list_edges().await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0], edge);
    }

    #[tokio::test]
    async fn test_edge_to_missing_node_fails() {
        let store = setup_test_db().await;
        let edge = GraphEdge::new("p1", "tech_jwt", "uses", 0.8);
        assert!(store.put_edge(&edge).await.is_err());
    }

    #[tokio::test]
    async fn test_query_nodes_by_field() {
        let store = setup_test_db().await;
        let a = PatternRecord::new("a").with_agent("marcus-backend");
        let b = PatternRecord::new("b").with_agent("marcus-backend-two");
        store.put_node(&GraphNode::from_pattern("pa", &a).unwrap()).await.unwrap();
        store.put_node(&GraphNode::from_pattern("pb", &b).unwrap()).await.unwrap();
        store
            .put_node(&GraphNode::new("agent_x", NodeType::Agent, "x"))
            .await
            .unwrap();

        let by_agent = store.query_nodes_by_field("agent", "marcus-backend").await.unwrap();
        assert_eq!(by_agent.len(), 1);
        assert_eq!(by_agent[0].id, "pa");

        let patterns = store.query_nodes_by_field("node_type", "pattern").await.unwrap();
        assert_eq!(patterns.len(), 2);
    }
}
