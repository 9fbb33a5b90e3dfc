//! Graph node types for the pattern knowledge graph
//!
//! A node is either a stored pattern or an entity (agent, technology,
//! concept, category) extracted from patterns. Entity nodes have
//! deterministic ids so repeated extraction never duplicates them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Id prefixes of extracted entity nodes; pattern ids may not start with these
pub const ENTITY_ID_PREFIXES: [&str; 4] = ["agent_", "category_", "tech_", "tag_"];

/// A node in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Unique identifier (`agent_<name>`, `tech_<name>`, `pattern_<uuid>`, ...)
    pub id: String,
    /// Kind of node
    pub node_type: NodeType,
    /// Human-readable label
    pub label: String,
    /// Free-form properties; pattern nodes carry a serialized [`PatternRecord`]
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Ids of every node sharing an edge with this one
    #[serde(default)]
    pub connections: BTreeSet<String>,
    /// Normalized degree centrality, filled in on read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centrality: Option<f32>,
}

impl GraphNode {
    /// Create a node with no properties or connections
    pub fn new(id: impl Into<String>, node_type: NodeType, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            label: label.into(),
            properties: BTreeMap::new(),
            connections: BTreeSet::new(),
            centrality: None,
        }
    }

    /// Set the properties map
    pub fn with_properties(mut self, properties: BTreeMap<String, serde_json::Value>) -> Self {
        self.properties = properties;
        self
    }

    /// Build a pattern node from a validated record
    pub fn from_pattern(id: impl Into<String>, record: &PatternRecord) -> Result<Self> {
        let id = id.into();
        let mut stored = record.clone();
        stored.id = Some(id.clone());
        Ok(Self::new(id, NodeType::Pattern, record.label()).with_properties(stored.to_properties()?))
    }

    /// Decode the pattern record of a pattern node
    pub fn pattern(&self) -> Option<PatternRecord> {
        if self.node_type != NodeType::Pattern {
            return None;
        }
        PatternRecord::from_properties(&self.properties).ok()
    }

    /// Whether this is a pattern node
    pub fn is_pattern(&self) -> bool {
        self.node_type == NodeType::Pattern
    }

    /// Number of distinct neighbours
    pub fn degree(&self) -> usize {
        self.connections.len()
    }
}

/// Types of graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A stored pattern
    Pattern,
    /// The agent that produced a pattern (e.g., "marcus-backend")
    Agent,
    /// A technology from the curated vocabulary (e.g., "jwt", "express")
    Technology,
    /// A free-form concept, created from pattern tags
    Concept,
    /// A pattern category (e.g., "backend")
    Category,
}

impl NodeType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Agent => "agent",
            Self::Technology => "technology",
            Self::Concept => "concept",
            Self::Category => "category",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pattern" => Some(Self::Pattern),
            "agent" => Some(Self::Agent),
            "technology" | "tech" => Some(Self::Technology),
            "concept" | "tag" => Some(Self::Concept),
            "category" => Some(Self::Category),
            _ => None,
        }
    }

    /// Get all node types
    pub fn all() -> &'static [NodeType] {
        &[
            Self::Pattern,
            Self::Agent,
            Self::Technology,
            Self::Concept,
            Self::Category,
        ]
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Content modality of a pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    Text,
    Image,
    Diagram,
}

impl Modality {
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text)
    }
}

/// A pattern as submitted by callers and stored on pattern nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    /// Caller-supplied id; a fresh `pattern_<uuid>` is assigned when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The pattern text itself
    pub pattern: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Agent that produced the pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// How well the pattern worked (0.0 to 1.0)
    #[serde(default = "default_effectiveness")]
    pub effectiveness: f32,
    /// Minutes saved by applying the pattern
    #[serde(default)]
    pub time_saved: f32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modality: Modality,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_effectiveness() -> f32 {
    0.5
}

impl PatternRecord {
    /// Create a new pattern record
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            id: None,
            pattern: pattern.into(),
            description: String::new(),
            code: None,
            agent: None,
            category: None,
            effectiveness: default_effectiveness(),
            time_saved: 0.0,
            tags: BTreeSet::new(),
            usage_count: 0,
            last_used: None,
            modality: Modality::Text,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_effectiveness(mut self, effectiveness: f32) -> Self {
        self.effectiveness = effectiveness;
        self
    }

    pub fn with_time_saved(mut self, minutes: f32) -> Self {
        self.time_saved = minutes;
        self
    }

    pub fn with_usage(mut self, usage_count: u64, last_used: Option<DateTime<Utc>>) -> Self {
        self.usage_count = usage_count;
        self.last_used = last_used;
        self
    }

    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = modality;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Reject records that cannot be stored
    pub fn validate(&self) -> Result<()> {
        if self.pattern.trim().is_empty() {
            return Err(Error::InvalidInput("pattern text must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.effectiveness) || self.effectiveness.is_nan() {
            return Err(Error::InvalidInput(format!(
                "effectiveness must be between 0.0 and 1.0, got {}",
                self.effectiveness
            )));
        }
        if self.time_saved < 0.0 {
            return Err(Error::InvalidInput("time_saved must be non-negative".into()));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(Error::InvalidInput("pattern id must not be blank".into()));
            }
            if let Some(prefix) = ENTITY_ID_PREFIXES.iter().find(|p| id.starts_with(*p)) {
                return Err(Error::InvalidInput(format!(
                    "pattern id '{}' uses the entity prefix '{}'",
                    id, prefix
                )));
            }
        }
        Ok(())
    }

    /// Id to store the pattern under
    pub fn resolve_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("pattern_{}", Uuid::new_v4().simple()),
        }
    }

    /// Short label used for the pattern node
    pub fn label(&self) -> String {
        truncate_label(self.pattern.trim(), 80)
    }

    /// All free text of the pattern, used for vocabulary matching
    pub fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(self.pattern.len() + self.description.len() + 2);
        text.push_str(&self.pattern);
        text.push(' ');
        text.push_str(&self.description);
        if let Some(code) = &self.code {
            text.push(' ');
            text.push_str(code);
        }
        text
    }

    /// Most recent activity: last use, or creation when never used
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_used.unwrap_or(self.created_at)
    }

    pub fn to_properties(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(Error::Other(format!(
                "pattern serialized to non-object value: {}",
                other
            ))),
        }
    }

    pub fn from_properties(properties: &BTreeMap<String, serde_json::Value>) -> Result<Self> {
        let map: serde_json::Map<String, serde_json::Value> =
            properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Ok(serde_json::from_value(serde_json::Value::Object(map))?)
    }
}

/// Normalize a name for use inside a deterministic node id
///
/// Lowercases, keeps alphanumerics plus `.`, `+` and `#`, and joins
/// whitespace/underscore/hyphen runs with a single `-`.
pub fn canonicalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;

    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() || matches!(c, '.' | '+' | '#') {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(c);
        } else if c.is_whitespace() || matches!(c, '-' | '_' | '/') {
            pending_sep = true;
        }
    }

    out
}

fn truncate_label(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("Marcus Backend"), "marcus-backend");
        assert_eq!(canonicalize("marcus-backend"), "marcus-backend");
        assert_eq!(canonicalize("  Node.js  "), "node.js");
        assert_eq!(canonicalize("C#"), "c#");
        assert_eq!(canonicalize("error__handling"), "error-handling");
        assert_eq!(canonicalize("!!!"), "");
    }

    #[test]
    fn test_pattern_roundtrip_through_node() {
        let record = PatternRecord::new("Use JWT auth in Express")
            .with_agent("marcus-backend")
            .with_category("backend")
            .with_tags(["auth"])
            .with_effectiveness(0.9);

        let node = GraphNode::from_pattern("pattern_1", &record).unwrap();
        assert_eq!(node.node_type, NodeType::Pattern);
        assert_eq!(node.label, "Use JWT auth in Express");

        let decoded = node.pattern().unwrap();
        assert_eq!(decoded.id.as_deref(), Some("pattern_1"));
        assert_eq!(decoded.agent.as_deref(), Some("marcus-backend"));
        assert!(decoded.tags.contains("auth"));
        assert_eq!(decoded.effectiveness, 0.9);
    }

    #[test]
    fn test_validation() {
        assert!(PatternRecord::new("  ").validate().is_err());
        assert!(PatternRecord::new("x").with_effectiveness(1.5).validate().is_err());
        assert!(PatternRecord::new("x").with_time_saved(-1.0).validate().is_err());
        assert!(PatternRecord::new("x").with_id(" ").validate().is_err());
        assert!(PatternRecord::new("x").with_id("tech_jwt").validate().is_err());
        assert!(PatternRecord::new("x").with_id("agent_marcus").validate().is_err());
        assert!(PatternRecord::new("x").with_id("jwt-express").validate().is_ok());
        assert!(PatternRecord::new("x").validate().is_ok());
    }

    #[test]
    fn test_resolve_id() {
        let fixed = PatternRecord::new("x").with_id("p-1");
        assert_eq!(fixed.resolve_id(), "p-1");

        let generated = PatternRecord::new("x").resolve_id();
        assert!(generated.starts_with("pattern_"));
    }

    #[test]
    fn test_entity_node_has_no_pattern() {
        let node = GraphNode::new("agent_a", NodeType::Agent, "a");
        assert!(node.pattern().is_none());
        assert!(!node.is_pattern());
    }

    #[test]
    fn test_node_type_parsing() {
        assert_eq!(NodeType::parse("agent"), Some(NodeType::Agent));
        assert_eq!(NodeType::parse("TECH"), Some(NodeType::Technology));
        assert_eq!(NodeType::parse("tag"), Some(NodeType::Concept));
        assert_eq!(NodeType::parse("unknown"), None);
    }

    #[test]
    fn test_long_label_truncated() {
        let record = PatternRecord::new("x".repeat(200));
        assert!(record.label().ends_with("..."));
        assert_eq!(record.label().chars().count(), 83);
    }
}
