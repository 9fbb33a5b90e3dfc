//! Cache entries and tiers

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;

/// Freshness class of a cache entry
///
/// Entries start cold and are promoted as they are reused. Each tier has
/// its own idle TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Cold,
    Warm,
    Hot,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Warm => "warm",
            Self::Hot => "hot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cold" => Some(Self::Cold),
            "warm" => Some(Self::Warm),
            "hot" => Some(Self::Hot),
            _ => None,
        }
    }

    pub fn all() -> &'static [CacheTier] {
        &[Self::Hot, Self::Warm, Self::Cold]
    }

    /// The next tier up, if any
    pub fn promoted(&self) -> Option<Self> {
        match self {
            Self::Cold => Some(Self::Warm),
            Self::Warm => Some(Self::Hot),
            Self::Hot => None,
        }
    }

    /// The next tier down, if any
    pub fn demoted(&self) -> Option<Self> {
        match self {
            Self::Hot => Some(Self::Warm),
            Self::Warm => Some(Self::Cold),
            Self::Cold => None,
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// TTLs and promotion thresholds per tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierPolicy {
    pub hot_ttl: Duration,
    pub warm_ttl: Duration,
    pub cold_ttl: Duration,
    /// Access count at which a cold entry becomes warm
    pub warm_threshold: u64,
    /// Access count at which a warm entry becomes hot
    pub hot_threshold: u64,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl TierPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            hot_ttl: Duration::from_secs(config.hot_ttl_secs),
            warm_ttl: Duration::from_secs(config.warm_ttl_secs),
            cold_ttl: Duration::from_secs(config.cold_ttl_secs),
            warm_threshold: config.warm_promotion_threshold,
            hot_threshold: config.hot_promotion_threshold,
        }
    }

    pub fn ttl(&self, tier: CacheTier) -> Duration {
        match tier {
            CacheTier::Hot => self.hot_ttl,
            CacheTier::Warm => self.warm_ttl,
            CacheTier::Cold => self.cold_ttl,
        }
    }

    /// Tier an entry should hold after reaching `access_count`
    ///
    /// Promotion moves at most one tier per access.
    pub fn tier_after_access(&self, tier: CacheTier, access_count: u64) -> CacheTier {
        match tier {
            CacheTier::Cold if access_count >= self.warm_threshold => CacheTier::Warm,
            CacheTier::Warm if access_count >= self.hot_threshold => CacheTier::Hot,
            other => other,
        }
    }
}

/// Bookkeeping for a cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Retrieval backend that produced the result
    pub backend: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// When the entry was inserted
    pub timestamp: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub tier: CacheTier,
}

/// A snapshot of a cached (query, result) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    /// Hash of the normalized query text
    pub query_hash: String,
    pub query: String,
    pub result: V,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub metadata: EntryMetadata,
}

/// Input to [`TieredRetrievalCache::set`](super::TieredRetrievalCache::set)
#[derive(Debug, Clone)]
pub struct CacheInsert<V> {
    pub key: String,
    pub query: String,
    pub result: V,
    pub embedding: Option<Vec<f32>>,
    pub backend: String,
    pub agent_id: Option<String>,
    pub tags: BTreeSet<String>,
}

impl<V> CacheInsert<V> {
    pub fn new(key: impl Into<String>, query: impl Into<String>, result: V) -> Self {
        Self {
            key: key.into(),
            query: query.into(),
            result,
            embedding: None,
            backend: "hybrid".to_string(),
            agent_id: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
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
}

/// Which entries [`invalidate`](super::TieredRetrievalCache::invalidate) removes
///
/// Set fields are combined with AND; `tags` matches entries carrying any of
/// the listed tags. Criteria with nothing set match no entries unless `all`
/// is true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidationCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub all: bool,
}

impl InvalidationCriteria {
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Default::default()
        }
    }

    pub fn for_backend(backend: impl Into<String>) -> Self {
        Self {
            backend: Some(backend.into()),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.agent_id.is_none() && self.backend.is_none() && self.tags.is_empty()
    }

    pub fn matches(&self, agent_id: Option<&str>, backend: &str, tags: &BTreeSet<String>) -> bool {
        if self.all {
            return true;
        }
        if self.is_empty() {
            return false;
        }
        if let Some(wanted) = &self.agent_id
            && agent_id != Some(wanted.as_str())
        {
            return false;
        }
        if let Some(wanted) = &self.backend
            && backend != wanted
        {
            return false;
        }
        self.tags.is_empty() || !self.tags.is_disjoint(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering_and_steps() {
        assert!(CacheTier::Hot > CacheTier::Warm);
        assert!(CacheTier::Warm > CacheTier::Cold);
        assert_eq!(CacheTier::Cold.promoted(), Some(CacheTier::Warm));
        assert_eq!(CacheTier::Hot.promoted(), None);
        assert_eq!(CacheTier::Hot.demoted(), Some(CacheTier::Warm));
        assert_eq!(CacheTier::Cold.demoted(), None);
        assert_eq!(CacheTier::parse("HOT"), Some(CacheTier::Hot));
    }

    #[test]
    fn test_policy_promotion() {
        let policy = TierPolicy::default();
        assert_eq!(policy.tier_after_access(CacheTier::Cold, 2), CacheTier::Cold);
        assert_eq!(policy.tier_after_access(CacheTier::Cold, 3), CacheTier::Warm);
        // One step at a time
        assert_eq!(policy.tier_after_access(CacheTier::Cold, 50), CacheTier::Warm);
        assert_eq!(policy.tier_after_access(CacheTier::Warm, 10), CacheTier::Hot);
        assert_eq!(policy.ttl(CacheTier::Hot), Duration::from_secs(86_400));
    }

    #[test]
    fn test_invalidation_criteria() {
        let tags: BTreeSet<String> = ["auth".to_string()].into();

        assert!(InvalidationCriteria::all().matches(None, "graph", &tags));
        assert!(!InvalidationCriteria::default().matches(Some("a"), "graph", &tags));

        let by_agent = InvalidationCriteria::for_agent("a");
        assert!(by_agent.matches(Some("a"), "graph", &tags));
        assert!(!by_agent.matches(Some("b"), "graph", &tags));
        assert!(!by_agent.matches(None, "graph", &tags));

        let combined = InvalidationCriteria::for_backend("graph").with_tags(["auth", "db"]);
        assert!(combined.matches(None, "graph", &tags));
        assert!(!combined.matches(None, "vector", &tags));
        assert!(!combined.matches(None, "graph", &BTreeSet::new()));
    }
}
