//! Cache key generation

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Filter parameters folded into a cache key
///
/// Components are kept sorted so insertion order never changes the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheKeyParams {
    pub components: BTreeMap<String, String>,
}

impl CacheKeyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.components.insert(key.into(), value.into());
        self
    }

    /// Add a component only when a value is present
    pub fn with_optional(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.with_component(key, value),
            None => self,
        }
    }
}

/// Collapse case and whitespace so trivially different queries share a key
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 of the normalized query text
pub fn query_hash(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic cache key over the normalized query and its filters
pub fn generate_key(query: &str, params: &CacheKeyParams) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"q=");
    hasher.update(normalize_query(query).as_bytes());
    for (key, value) in &params.components {
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}
