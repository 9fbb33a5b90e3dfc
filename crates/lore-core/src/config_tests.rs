//! Config module tests

use crate::config::{CacheConfig, Config, RerankConfig};

#[test]
fn test_default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.graph.max_depth, 2);
    assert_eq!(config.rerank.multi_source_boost, 0.3);
}

#[test]
fn test_default_rerank_weights_sum_to_one() {
    let rerank = RerankConfig::default();
    assert!((rerank.weight_sum() - 1.0).abs() < 1e-6);
    assert_eq!(rerank.relevance_weight, 0.4);
    assert_eq!(rerank.recency_weight, 0.15);
    assert_eq!(rerank.context_weight, 0.25);
    assert_eq!(rerank.expertise_weight, 0.1);
    assert_eq!(rerank.cross_modal_weight, 0.1);
}

#[test]
fn test_cache_tiers_have_decreasing_ttl() {
    let cache = CacheConfig::default();
    assert!(cache.hot_ttl_secs > cache.warm_ttl_secs);
    assert!(cache.warm_ttl_secs > cache.cold_ttl_secs);
    assert!(cache.hot_promotion_threshold > cache.warm_promotion_threshold);
}

#[test]
fn test_get_and_set_roundtrip() {
    let mut config = Config::default();
    config.set("cache.max_entries", "42").unwrap();
    assert_eq!(config.get("cache.max_entries").unwrap(), "42");

    config.set("search.keyword_source", "false").unwrap();
    assert!(!config.search.keyword_source);
}

#[test]
fn test_set_rejects_unbalanced_weights() {
    let mut config = Config::default();
    let err = config.set("rerank.relevance_weight", "0.9").unwrap_err();
    assert!(err.to_string().contains("sum to 1.0"));
    // Unchanged on failure
    assert_eq!(config.rerank.relevance_weight, 0.4);
}

#[test]
fn test_set_rejects_bad_values() {
    let mut config = Config::default();
    assert!(config.set("graph.max_depth", "0").is_err());
    assert!(config.set("cache.similarity_threshold", "1.5").is_err());
    assert!(config.set("cache.max_entries", "many").is_err());
    assert!(config.set("no.such.key", "1").is_err());
}

#[test]
fn test_database_path_can_be_cleared() {
    let mut config = Config::default();
    config.set("storage.database_path", "/tmp/lore.db").unwrap();
    assert_eq!(config.get("storage.database_path").unwrap(), "/tmp/lore.db");
    config.set("storage.database_path", "").unwrap();
    assert!(config.storage.database_path.is_none());
}

#[test]
fn test_list_covers_every_key() {
    let config = Config::default();
    let entries = config.list().unwrap();
    assert!(entries.iter().any(|(k, _)| k == "cache.similarity_threshold"));
    assert!(entries.iter().any(|(k, _)| k == "rerank.multi_source_boost"));
    assert_eq!(entries.len(), 25);
}

#[test]
fn test_toml_roundtrip_with_partial_file() {
    let parsed: Config = toml::from_str("[cache]\nmax_entries = 5\n").unwrap();
    assert_eq!(parsed.cache.max_entries, 5);
    assert_eq!(parsed.cache.cold_ttl_secs, CacheConfig::default().cold_ttl_secs);
    assert!(parsed.validate().is_ok());
}
