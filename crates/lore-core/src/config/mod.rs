//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Lore configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub graph: GraphConfig,
    pub cache: CacheConfig,
    pub rerank: RerankConfig,
    pub search: SearchConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Maximum BFS depth when expanding from query entities
    pub max_depth: u32,
    pub default_limit: usize,
    pub min_relevance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub hot_ttl_secs: u64,
    pub warm_ttl_secs: u64,
    pub cold_ttl_secs: u64,
    /// Access count at which a cold entry moves to warm
    pub warm_promotion_threshold: u64,
    /// Access count at which a warm entry moves to hot
    pub hot_promotion_threshold: u64,
    /// Minimum cosine similarity for a fuzzy (embedding) hit
    pub similarity_threshold: f32,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub relevance_weight: f32,
    pub recency_weight: f32,
    pub context_weight: f32,
    pub expertise_weight: f32,
    pub cross_modal_weight: f32,
    pub recency_window_days: f64,
    /// Flat boost for candidates returned by more than one source
    pub multi_source_boost: f32,
    /// Expertise keywords per agent id
    pub agent_expertise: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub source_timeout_ms: u64,
    pub keyword_source: bool,
    pub max_query_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: Option<PathBuf>,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub operation_timeout_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            default_limit: 10,
            min_relevance: 0.0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            hot_ttl_secs: 24 * 60 * 60,
            warm_ttl_secs: 6 * 60 * 60,
            cold_ttl_secs: 60 * 60,
            warm_promotion_threshold: 3,
            hot_promotion_threshold: 10,
            similarity_threshold: 0.9,
            cleanup_interval_secs: 300,
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            relevance_weight: 0.4,
            recency_weight: 0.15,
            context_weight: 0.25,
            expertise_weight: 0.1,
            cross_modal_weight: 0.1,
            recency_window_days: 30.0,
            multi_source_boost: 0.3,
            agent_expertise: BTreeMap::new(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: 2000,
            keyword_source: true,
            max_query_len: 1000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_retries: 3,
            retry_base_delay_ms: 50,
            operation_timeout_ms: 2000,
        }
    }
}

impl CacheConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl RerankConfig {
    /// Sum of the five factor weights
    pub fn weight_sum(&self) -> f32 {
        self.relevance_weight
            + self.recency_weight
            + self.context_weight
            + self.expertise_weight
            + self.cross_modal_weight
    }
}

impl StorageConfig {
    /// Resolve the SQLite database path, falling back to the config directory
    pub fn resolved_database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Config::config_dir()?.join("lore.db")),
        }
    }
}

const CONFIG_KEYS: &[&str] = &[
    "graph.max_depth",
    "graph.default_limit",
    "graph.min_relevance",
    "cache.max_entries",
    "cache.hot_ttl_secs",
    "cache.warm_ttl_secs",
    "cache.cold_ttl_secs",
    "cache.warm_promotion_threshold",
    "cache.hot_promotion_threshold",
    "cache.similarity_threshold",
    "cache.cleanup_interval_secs",
    "rerank.relevance_weight",
    "rerank.recency_weight",
    "rerank.context_weight",
    "rerank.expertise_weight",
    "rerank.cross_modal_weight",
    "rerank.recency_window_days",
    "rerank.multi_source_boost",
    "search.source_timeout_ms",
    "search.keyword_source",
    "search.max_query_len",
    "storage.database_path",
    "storage.max_retries",
    "storage.retry_base_delay_ms",
    "storage.operation_timeout_ms",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LORE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("lore")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=4).contains(&self.graph.max_depth) {
            return Err(anyhow!("graph.max_depth must be between 1 and 4"));
        }
        if self.graph.default_limit == 0 {
            return Err(anyhow!("graph.default_limit must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.cache.similarity_threshold) {
            return Err(anyhow!("cache.similarity_threshold must be between 0.0 and 1.0"));
        }
        if self.cache.hot_ttl_secs == 0 || self.cache.warm_ttl_secs == 0 || self.cache.cold_ttl_secs == 0 {
            return Err(anyhow!("Cache TTLs must be greater than zero"));
        }
        if self.cache.cleanup_interval_secs == 0 {
            return Err(anyhow!("cache.cleanup_interval_secs must be greater than zero"));
        }
        if self.cache.hot_promotion_threshold < self.cache.warm_promotion_threshold {
            return Err(anyhow!(
                "cache.hot_promotion_threshold must not be lower than cache.warm_promotion_threshold"
            ));
        }

        let weights = [
            self.rerank.relevance_weight,
            self.rerank.recency_weight,
            self.rerank.context_weight,
            self.rerank.expertise_weight,
            self.rerank.cross_modal_weight,
        ];
        if weights.iter().any(|w| *w < 0.0) {
            return Err(anyhow!("Rerank weights must be non-negative"));
        }
        if (self.rerank.weight_sum() - 1.0).abs() > 0.01 {
            return Err(anyhow!(
                "Rerank weights must sum to 1.0 (currently {:.3})",
                self.rerank.weight_sum()
            ));
        }
        if self.rerank.recency_window_days <= 0.0 {
            return Err(anyhow!("rerank.recency_window_days must be positive"));
        }
        if self.storage.max_retries == 0 {
            return Err(anyhow!("storage.max_retries must be at least 1"));
        }

        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "graph.max_depth" => Ok(self.graph.max_depth.to_string()),
            "graph.default_limit" => Ok(self.graph.default_limit.to_string()),
            "graph.min_relevance" => Ok(self.graph.min_relevance.to_string()),

            "cache.max_entries" => Ok(self.cache.max_entries.to_string()),
            "cache.hot_ttl_secs" => Ok(self.cache.hot_ttl_secs.to_string()),
            "cache.warm_ttl_secs" => Ok(self.cache.warm_ttl_secs.to_string()),
            "cache.cold_ttl_secs" => Ok(self.cache.cold_ttl_secs.to_string()),
            "cache.warm_promotion_threshold" => Ok(self.cache.warm_promotion_threshold.to_string()),
            "cache.hot_promotion_threshold" => Ok(self.cache.hot_promotion_threshold.to_string()),
            "cache.similarity_threshold" => Ok(self.cache.similarity_threshold.to_string()),
            "cache.cleanup_interval_secs" => Ok(self.cache.cleanup_interval_secs.to_string()),

            "rerank.relevance_weight" => Ok(self.rerank.relevance_weight.to_string()),
            "rerank.recency_weight" => Ok(self.rerank.recency_weight.to_string()),
            "rerank.context_weight" => Ok(self.rerank.context_weight.to_string()),
            "rerank.expertise_weight" => Ok(self.rerank.expertise_weight.to_string()),
            "rerank.cross_modal_weight" => Ok(self.rerank.cross_modal_weight.to_string()),
            "rerank.recency_window_days" => Ok(self.rerank.recency_window_days.to_string()),
            "rerank.multi_source_boost" => Ok(self.rerank.multi_source_boost.to_string()),

            "search.source_timeout_ms" => Ok(self.search.source_timeout_ms.to_string()),
            "search.keyword_source" => Ok(self.search.keyword_source.to_string()),
            "search.max_query_len" => Ok(self.search.max_query_len.to_string()),

            "storage.database_path" => Ok(match &self.storage.database_path {
                Some(path) => path.display().to_string(),
                None => "(default)".to_string(),
            }),
            "storage.max_retries" => Ok(self.storage.max_retries.to_string()),
            "storage.retry_base_delay_ms" => Ok(self.storage.retry_base_delay_ms.to_string()),
            "storage.operation_timeout_ms" => Ok(self.storage.operation_timeout_ms.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `lore config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    ///
    /// The resulting configuration is validated as a whole, so weight changes
    /// that break the sum-to-one rule are rejected.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut updated = self.clone();

        match key {
            "graph.max_depth" => updated.graph.max_depth = parse_value(key, value)?,
            "graph.default_limit" => updated.graph.default_limit = parse_value(key, value)?,
            "graph.min_relevance" => updated.graph.min_relevance = parse_value(key, value)?,

            "cache.max_entries" => updated.cache.max_entries = parse_value(key, value)?,
            "cache.hot_ttl_secs" => updated.cache.hot_ttl_secs = parse_value(key, value)?,
            "cache.warm_ttl_secs" => updated.cache.warm_ttl_secs = parse_value(key, value)?,
            "cache.cold_ttl_secs" => updated.cache.cold_ttl_secs = parse_value(key, value)?,
            "cache.warm_promotion_threshold" => {
                updated.cache.warm_promotion_threshold = parse_value(key, value)?
            }
            "cache.hot_promotion_threshold" => {
                updated.cache.hot_promotion_threshold = parse_value(key, value)?
            }
            "cache.similarity_threshold" => {
                updated.cache.similarity_threshold = parse_value(key, value)?
            }
            "cache.cleanup_interval_secs" => {
                updated.cache.cleanup_interval_secs = parse_value(key, value)?
            }

            "rerank.relevance_weight" => updated.rerank.relevance_weight = parse_value(key, value)?,
            "rerank.recency_weight" => updated.rerank.recency_weight = parse_value(key, value)?,
            "rerank.context_weight" => updated.rerank.context_weight = parse_value(key, value)?,
            "rerank.expertise_weight" => updated.rerank.expertise_weight = parse_value(key, value)?,
            "rerank.cross_modal_weight" => {
                updated.rerank.cross_modal_weight = parse_value(key, value)?
            }
            "rerank.recency_window_days" => {
                updated.rerank.recency_window_days = parse_value(key, value)?
            }
            "rerank.multi_source_boost" => {
                updated.rerank.multi_source_boost = parse_value(key, value)?
            }

            "search.source_timeout_ms" => updated.search.source_timeout_ms = parse_value(key, value)?,
            "search.keyword_source" => updated.search.keyword_source = parse_value(key, value)?,
            "search.max_query_len" => updated.search.max_query_len = parse_value(key, value)?,

            "storage.database_path" => {
                updated.storage.database_path = if value.trim().is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "storage.max_retries" => updated.storage.max_retries = parse_value(key, value)?,
            "storage.retry_base_delay_ms" => {
                updated.storage.retry_base_delay_ms = parse_value(key, value)?
            }
            "storage.operation_timeout_ms" => {
                updated.storage.operation_timeout_ms = parse_value(key, value)?
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `lore config list` to see available keys.",
                    key
                ));
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        CONFIG_KEYS
            .iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid value '{}' for {}: {}", value, key, e))
}
