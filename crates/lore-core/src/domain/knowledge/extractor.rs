//! Deterministic entity extraction from patterns and query text
//!
//! Entities come from two places: the structured fields of a pattern
//! (agent, category, tags) and word-bounded matches of the pattern's text
//! against a curated technology vocabulary. There is no model involved, so
//! the same input always yields the same entities in the same order.

use std::collections::HashSet;

use super::entity::{NodeType, PatternRecord, canonicalize};
use super::relationship::Relationship;

/// Weight of an entity taken from the agent field
pub const AGENT_WEIGHT: f32 = 1.0;
/// Weight of an entity taken from the category field
pub const CATEGORY_WEIGHT: f32 = 1.0;
/// Weight of an entity taken from a tag
pub const TAG_WEIGHT: f32 = 0.6;
/// Weight of a technology vocabulary match
pub const TECHNOLOGY_WEIGHT: f32 = 0.8;

/// Curated technology vocabulary: canonical name followed by aliases
const DEFAULT_VOCABULARY: &[(&str, &[&str])] = &[
    // Languages
    ("typescript", &["typescript", "ts"]),
    ("javascript", &["javascript", "js"]),
    ("python", &["python"]),
    ("rust", &["rust"]),
    ("go", &["golang"]),
    ("java", &["java"]),
    ("kotlin", &["kotlin"]),
    ("swift", &["swift"]),
    ("ruby", &["ruby"]),
    ("php", &["php"]),
    ("csharp", &["c#", "csharp", ".net", "dotnet"]),
    ("sql", &["sql"]),
    // Frontend
    ("react", &["react", "reactjs"]),
    ("nextjs", &["nextjs", "next.js"]),
    ("vue", &["vue", "vuejs", "vue.js", "nuxt"]),
    ("angular", &["angular"]),
    ("svelte", &["svelte", "sveltekit"]),
    ("tailwind", &["tailwind", "tailwindcss"]),
    ("css", &["css", "scss", "sass"]),
    ("html", &["html"]),
    ("webpack", &["webpack"]),
    ("vite", &["vite"]),
    // Backend
    ("node", &["node", "nodejs", "node.js"]),
    ("express", &["express", "expressjs"]),
    ("fastify", &["fastify"]),
    ("nestjs", &["nestjs"]),
    ("django", &["django"]),
    ("flask", &["flask"]),
    ("fastapi", &["fastapi"]),
    ("rails", &["rails"]),
    ("spring", &["spring", "spring boot"]),
    ("tokio", &["tokio"]),
    ("axum", &["axum"]),
    ("graphql", &["graphql"]),
    ("rest", &["rest", "restful"]),
    ("grpc", &["grpc"]),
    ("websocket", &["websocket", "websockets"]),
    // Auth & security
    ("jwt", &["jwt", "json web token"]),
    ("oauth", &["oauth", "oauth2"]),
    ("bcrypt", &["bcrypt"]),
    ("cors", &["cors"]),
    // Data
    ("postgres", &["postgres", "postgresql"]),
    ("mysql", &["mysql"]),
    ("sqlite", &["sqlite"]),
    ("mongodb", &["mongodb", "mongo", "mongoose"]),
    ("redis", &["redis"]),
    ("elasticsearch", &["elasticsearch"]),
    ("prisma", &["prisma"]),
    ("kafka", &["kafka"]),
    ("rabbitmq", &["rabbitmq"]),
    // Infrastructure
    ("docker", &["docker", "dockerfile"]),
    ("kubernetes", &["kubernetes", "k8s"]),
    ("terraform", &["terraform"]),
    ("aws", &["aws", "lambda", "s3"]),
    ("gcp", &["gcp", "google cloud"]),
    ("azure", &["azure"]),
    ("nginx", &["nginx"]),
    ("github-actions", &["github actions"]),
    // Testing
    ("jest", &["jest"]),
    ("vitest", &["vitest"]),
    ("pytest", &["pytest"]),
    ("playwright", &["playwright"]),
    ("cypress", &["cypress"]),
];

/// Kind of extracted entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Agent,
    Category,
    Technology,
    Tag,
}

impl EntityKind {
    /// Graph node type backing this entity kind
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Agent => NodeType::Agent,
            Self::Category => NodeType::Category,
            Self::Technology => NodeType::Technology,
            Self::Tag => NodeType::Concept,
        }
    }

    /// Prefix of deterministic node ids for this kind
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Category => "category",
            Self::Technology => "tech",
            Self::Tag => "tag",
        }
    }

    /// Relationship from a pattern to an entity of this kind
    pub fn relationship(&self) -> Relationship {
        match self {
            Self::Agent => Relationship::CreatedBy,
            Self::Category => Relationship::BelongsTo,
            Self::Technology => Relationship::Uses,
            Self::Tag => Relationship::TaggedWith,
        }
    }

    pub fn default_weight(&self) -> f32 {
        match self {
            Self::Agent => AGENT_WEIGHT,
            Self::Category => CATEGORY_WEIGHT,
            Self::Technology => TECHNOLOGY_WEIGHT,
            Self::Tag => TAG_WEIGHT,
        }
    }

    /// Kind for an existing node type (patterns are not entities)
    pub fn from_node_type(node_type: NodeType) -> Option<Self> {
        match node_type {
            NodeType::Agent => Some(Self::Agent),
            NodeType::Category => Some(Self::Category),
            NodeType::Technology => Some(Self::Technology),
            NodeType::Concept => Some(Self::Tag),
            NodeType::Pattern => None,
        }
    }

    /// Deterministic node id for a canonical name
    pub fn entity_id(&self, canonical_name: &str) -> String {
        format!("{}_{}", self.id_prefix(), canonical_name)
    }
}

/// An entity extracted from a pattern or query
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    /// Deterministic node id (e.g., `agent_marcus-backend`)
    pub id: String,
    pub kind: EntityKind,
    /// Label as it should appear on the node
    pub label: String,
    /// Relationship from the pattern to this entity
    pub relationship: Relationship,
    pub weight: f32,
}

impl ExtractedEntity {
    /// Build an entity from a raw name; returns None when the name
    /// canonicalizes to nothing
    pub fn from_name(kind: EntityKind, name: &str) -> Option<Self> {
        let canonical = canonicalize(name);
        if canonical.is_empty() {
            return None;
        }
        Some(Self {
            id: kind.entity_id(&canonical),
            kind,
            label: canonical,
            relationship: kind.relationship(),
            weight: kind.default_weight(),
        })
    }
}

/// A technology term with the spellings that match it
#[derive(Debug, Clone)]
pub struct TechTerm {
    pub canonical: String,
    pub aliases: Vec<String>,
}

impl TechTerm {
    pub fn new<I, S>(canonical: impl Into<String>, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            canonical: canonical.into(),
            aliases: aliases.into_iter().map(|a| a.into().to_lowercase()).collect(),
        }
    }
}

/// Vocabulary-based entity extractor
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    vocabulary: Vec<TechTerm>,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityExtractor {
    /// Create an extractor with the built-in technology vocabulary
    pub fn new() -> Self {
        let vocabulary = DEFAULT_VOCABULARY
            .iter()
            .map(|(canonical, aliases)| TechTerm::new(*canonical, aliases.iter().copied()))
            .collect();
        Self { vocabulary }
    }

    /// Create an extractor with a custom vocabulary
    pub fn with_vocabulary(vocabulary: Vec<TechTerm>) -> Self {
        Self { vocabulary }
    }

    /// Extract entities from a pattern
    ///
    /// Order: agent, category, tags (sorted), then technologies in
    /// vocabulary order. Duplicate ids keep their first occurrence.
    pub fn extract_from_pattern(&self, record: &PatternRecord) -> Vec<ExtractedEntity> {
        let mut entities = Vec::new();

        if let Some(agent) = &record.agent {
            entities.extend(ExtractedEntity::from_name(EntityKind::Agent, agent));
        }
        if let Some(category) = &record.category {
            entities.extend(ExtractedEntity::from_name(EntityKind::Category, category));
        }
        for tag in &record.tags {
            entities.extend(ExtractedEntity::from_name(EntityKind::Tag, tag));
        }
        entities.extend(self.extract_technologies(&record.searchable_text()));

        dedupe(entities)
    }

    /// Extract technology entities from free text
    pub fn extract_technologies(&self, text: &str) -> Vec<ExtractedEntity> {
        let haystack = text.to_lowercase();

        self.vocabulary
            .iter()
            .filter(|term| {
                term.aliases
                    .iter()
                    .any(|alias| contains_bounded(&haystack, alias))
            })
            .filter_map(|term| ExtractedEntity::from_name(EntityKind::Technology, &term.canonical))
            .collect()
    }

    /// Number of technology terms known to the extractor
    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }
}

fn dedupe(entities: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert(e.id.clone()))
        .collect()
}

/// Whether `needle` occurs in `haystack` with non-alphanumeric characters
/// (or the string edges) on both sides
pub(crate) fn contains_bounded(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    let mut start = 0;
    while let Some(offset) = haystack[start..].find(needle) {
        let begin = start + offset;
        let end = begin + needle.len();

        let before_ok = haystack[..begin]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());

        if before_ok && after_ok {
            return true;
        }

        // Advance past the first character of this match
        start = begin + haystack[begin..].chars().next().map_or(1, char::len_utf8);
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_pattern() -> PatternRecord {
        PatternRecord::new("Use JWT auth in Express")
            .with_agent("marcus-backend")
            .with_category("backend")
            .with_tags(["auth"])
    }

    #[test]
    fn test_entity_ids_use_reserved_prefixes() {
        for kind in [EntityKind::Agent, EntityKind::Category, EntityKind::Technology, EntityKind::Tag] {
            let id = kind.entity_id("x");
            assert!(
                crate::domain::knowledge::ENTITY_ID_PREFIXES.iter().any(|p| id.starts_with(p)),
                "{} is not reserved",
                id
            );
        }
    }

    #[test]
    fn test_extract_from_pattern() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract_from_pattern(&jwt_pattern());

        let ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "agent_marcus-backend",
                "category_backend",
                "tag_auth",
                "tech_express",
                "tech_jwt",
            ]
        );
    }

    #[test]
    fn test_field_weights() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract_from_pattern(&jwt_pattern());
        let weight = |id: &str| entities.iter().find(|e| e.id == id).unwrap().weight;

        assert_eq!(weight("agent_marcus-backend"), 1.0);
        assert_eq!(weight("category_backend"), 1.0);
        assert_eq!(weight("tag_auth"), 0.6);
        assert_eq!(weight("tech_jwt"), 0.8);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let extractor = EntityExtractor::new();
        let record = jwt_pattern();
        let first = extractor.extract_from_pattern(&record);
        let _ = extractor.extract_technologies("react and redis");
        let second = extractor.extract_from_pattern(&record);
        assert_eq!(first, second);
    }

    #[test]
    fn test_word_boundaries() {
        let extractor = EntityExtractor::new();
        // "go" is not an alias; "golang" is. "java" must not match "javascript".
        let techs = extractor.extract_technologies("A javascript helper for mongodb");
        let ids: Vec<&str> = techs.iter().map(|e| e.id.as_str()).collect();
        assert!(ids.contains(&"tech_javascript"));
        assert!(ids.contains(&"tech_mongodb"));
        assert!(!ids.contains(&"tech_java"));
    }

    #[test]
    fn test_aliases_map_to_canonical() {
        let extractor = EntityExtractor::new();
        let techs = extractor.extract_technologies("Deploy Node.js to k8s with PostgreSQL");
        let ids: Vec<&str> = techs.iter().map(|e| e.id.as_str()).collect();
        assert!(ids.contains(&"tech_node"));
        assert!(ids.contains(&"tech_kubernetes"));
        assert!(ids.contains(&"tech_postgres"));
    }

    #[test]
    fn test_query_text() {
        let extractor = EntityExtractor::new();
        let techs = extractor.extract_technologies("JWT authentication");
        assert_eq!(techs.len(), 1);
        assert_eq!(techs[0].id, "tech_jwt");
    }

    #[test]
    fn test_blank_fields_are_skipped() {
        let extractor = EntityExtractor::new();
        let record = PatternRecord::new("plain text")
            .with_agent("   ")
            .with_tags(["", "ok"]);
        let entities = extractor.extract_from_pattern(&record);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "tag_ok");
    }

    #[test]
    fn test_contains_bounded() {
        assert!(contains_bounded("use jwt now", "jwt"));
        assert!(contains_bounded("jwt", "jwt"));
        assert!(contains_bounded("(jwt)", "jwt"));
        assert!(!contains_bounded("jwtx", "jwt"));
        assert!(contains_bounded("jwtx jwt", "jwt"));
        assert!(!contains_bounded("anything", ""));
    }

    #[test]
    fn test_custom_vocabulary() {
        let extractor = EntityExtractor::with_vocabulary(vec![TechTerm::new("htmx", ["htmx"])]);
        assert_eq!(extractor.vocabulary_len(), 1);
        assert_eq!(extractor.extract_technologies("htmx swap").len(), 1);
        assert!(extractor.extract_technologies("react").is_empty());
    }
}
