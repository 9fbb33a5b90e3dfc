//! Graph edges for the pattern knowledge graph
//!
//! Every edge links a pattern node to one of its extracted entities. Edge
//! ids are derived from their endpoints and relationship, so re-adding a
//! pattern never creates duplicate edges.

use serde::{Deserialize, Serialize};

/// An edge between two graph nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Deterministic identifier: `<source>-><target>:<relationship>`
    pub id: String,
    /// ID of the source node
    pub source: String,
    /// ID of the target node
    pub target: String,
    /// Relationship name (see [`Relationship`])
    pub relationship: String,
    /// Strength of the link (0.0 to 1.0)
    pub weight: f32,
}

impl GraphEdge {
    /// Create a new edge; the weight is clamped to 0.0-1.0
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relationship: impl Into<String>,
        weight: f32,
    ) -> Self {
        let source = source.into();
        let target = target.into();
        let relationship = relationship.into();

        Self {
            id: Self::edge_id(&source, &target, &relationship),
            source,
            target,
            relationship,
            weight: weight.clamp(0.0, 1.0),
        }
    }

    /// Compute the deterministic id for an edge
    pub fn edge_id(source: &str, target: &str, relationship: &str) -> String {
        format!("{}->{}:{}", source, target, relationship)
    }

    /// The endpoint opposite `node_id`, if the edge touches it
    pub fn other_end(&self, node_id: &str) -> Option<&str> {
        if self.source == node_id {
            Some(&self.target)
        } else if self.target == node_id {
            Some(&self.source)
        } else {
            None
        }
    }
}

/// Relationships between a pattern and its entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    /// Pattern was created by an agent
    CreatedBy,
    /// Pattern belongs to a category
    BelongsTo,
    /// Pattern uses a technology
    Uses,
    /// Pattern is tagged with a concept
    TaggedWith,
}

impl Relationship {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatedBy => "created_by",
            Self::BelongsTo => "belongs_to",
            Self::Uses => "uses",
            Self::TaggedWith => "tagged_with",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created_by" | "createdby" => Some(Self::CreatedBy),
            "belongs_to" | "belongsto" => Some(Self::BelongsTo),
            "uses" => Some(Self::Uses),
            "tagged_with" | "taggedwith" => Some(Self::TaggedWith),
            _ => None,
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
