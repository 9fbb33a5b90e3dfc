//! Cache counters and the metrics snapshot built from them

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Monotonic counters updated by the cache
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub fuzzy_hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
    pub promotions: AtomicU64,
    pub demotions: AtomicU64,
    pub dropped: AtomicU64,
    hit_latency_micros: AtomicU64,
    miss_latency_micros: AtomicU64,
    fetch_latency_micros: AtomicU64,
    fetches: AtomicU64,
    per_agent: Mutex<HashMap<String, AgentCounters>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct AgentCounters {
    hits: u64,
    misses: u64,
}

impl CacheCounters {
    pub fn record_hit(&self, fuzzy: bool, elapsed: Duration, agent_id: Option<&str>) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        if fuzzy {
            self.fuzzy_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.hit_latency_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.record_agent(agent_id, true);
    }

    pub fn record_miss(&self, elapsed: Duration, agent_id: Option<&str>) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.miss_latency_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.record_agent(agent_id, false);
    }

    /// Time spent producing a result after a miss
    pub fn record_fetch(&self, elapsed: Duration) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.fetch_latency_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_agent(&self, agent_id: Option<&str>, hit: bool) {
        let Some(agent_id) = agent_id else {
            return;
        };
        let mut per_agent = self.per_agent.lock().unwrap_or_else(|e| e.into_inner());
        let counters = per_agent.entry(agent_id.to_string()).or_default();
        if hit {
            counters.hits += 1;
        } else {
            counters.misses += 1;
        }
    }

    /// Build a snapshot; reads counters only
    pub fn snapshot(&self, entries_by_tier: BTreeMap<String, usize>) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let fetches = self.fetches.load(Ordering::Relaxed);

        let avg_hit_latency_ms = average_ms(self.hit_latency_micros.load(Ordering::Relaxed), hits);
        let avg_fetch_latency_ms =
            average_ms(self.fetch_latency_micros.load(Ordering::Relaxed), fetches);
        // A miss costs the failed lookup plus the fetch that follows it
        let avg_miss_latency_ms =
            average_ms(self.miss_latency_micros.load(Ordering::Relaxed), misses) + avg_fetch_latency_ms;

        let speedup = if avg_hit_latency_ms > 0.0 {
            avg_miss_latency_ms / avg_hit_latency_ms
        } else {
            0.0
        };

        let per_agent = self
            .per_agent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(agent, c)| {
                (
                    agent.clone(),
                    AgentCacheMetrics {
                        hits: c.hits,
                        misses: c.misses,
                        hit_rate: rate(c.hits, c.misses),
                    },
                )
            })
            .collect();

        CacheMetrics {
            entries: entries_by_tier.values().sum(),
            entries_by_tier,
            hits,
            fuzzy_hits: self.fuzzy_hits.load(Ordering::Relaxed),
            misses,
            hit_rate: rate(hits, misses),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            avg_hit_latency_ms,
            avg_miss_latency_ms,
            avg_fetch_latency_ms,
            speedup,
            per_agent,
        }
    }
}

fn rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

fn average_ms(total_micros: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total_micros as f64 / count as f64 / 1000.0
    }
}

/// Point-in-time cache metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub entries: usize,
    pub entries_by_tier: BTreeMap<String, usize>,
    pub hits: u64,
    /// Hits served by embedding similarity
    pub fuzzy_hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub promotions: u64,
    pub demotions: u64,
    /// Inserts dropped because the cache had no room
    pub dropped: u64,
    pub avg_hit_latency_ms: f64,
    pub avg_miss_latency_ms: f64,
    pub avg_fetch_latency_ms: f64,
    /// Average miss latency divided by average hit latency
    pub speedup: f64,
    pub per_agent: BTreeMap<String, AgentCacheMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentCacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_and_per_agent() {
        let counters = CacheCounters::default();
        counters.record_hit(false, Duration::from_micros(100), Some("a"));
        counters.record_hit(true, Duration::from_micros(100), Some("a"));
        counters.record_miss(Duration::from_micros(100), Some("b"));
        counters.record_miss(Duration::from_micros(100), None);

        let metrics = counters.snapshot(BTreeMap::new());
        assert_eq!(metrics.hits, 2);
        assert_eq!(metrics.fuzzy_hits, 1);
        assert_eq!(metrics.misses, 2);
        assert!((metrics.hit_rate - 0.5).abs() < 1e-9);
        assert_eq!(metrics.per_agent["a"].hit_rate, 1.0);
        assert_eq!(metrics.per_agent["b"].hit_rate, 0.0);
        assert!(!metrics.per_agent.contains_key(""));
    }

    #[test]
    fn test_speedup_includes_fetch_time() {
        let counters = CacheCounters::default();
        counters.record_hit(false, Duration::from_micros(1_000), None);
        counters.record_miss(Duration::from_micros(1_000), None);
        counters.record_fetch(Duration::from_micros(9_000));

        let metrics = counters.snapshot(BTreeMap::new());
        assert!((metrics.avg_hit_latency_ms - 1.0).abs() < 1e-9);
        assert!((metrics.avg_miss_latency_ms - 10.0).abs() < 1e-9);
        assert!((metrics.speedup - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_has_no_side_effects() {
        let counters = CacheCounters::default();
        counters.record_miss(Duration::ZERO, Some("a"));
        let first = counters.snapshot(BTreeMap::new());
        let second = counters.snapshot(BTreeMap::new());
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = CacheCounters::default().snapshot(BTreeMap::from([("cold".to_string(), 2)]));
        assert_eq!(metrics.entries, 2);
        assert_eq!(metrics.hit_rate, 0.0);
        assert_eq!(metrics.speedup, 0.0);
    }
}
