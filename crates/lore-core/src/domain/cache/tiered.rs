//! Tiered retrieval cache
//!
//! Entries are inserted cold, promoted to warm and hot as their access
//! count crosses the configured thresholds, and demoted one tier by the
//! sweeper after sitting idle for half of their tier's TTL. An entry
//! expires once it has been idle longer than its tier's TTL.
//!
//! The entry map is guarded by a reader-writer lock; per-entry bookkeeping
//! sits behind its own mutex so concurrent lookups never take the map's
//! write lock. Lock order is always map, then entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::domain::event::{EventBus, EvictionReason, KnowledgeEvent};
use crate::domain::similarity::cosine_similarity;
use crate::error::{Error, Result};

use super::entry::{CacheEntry, CacheInsert, CacheTier, EntryMetadata, InvalidationCriteria, TierPolicy};
use super::key::{self, CacheKeyParams};
use super::metrics::{CacheCounters, CacheMetrics};

/// A successful cache lookup
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit<V> {
    pub value: V,
    /// Key of the entry that served the lookup
    pub key: String,
    /// Tier after this access
    pub tier: CacheTier,
    pub access_count: u64,
    /// Served by embedding similarity rather than the exact key
    pub fuzzy: bool,
    /// Cosine similarity for fuzzy hits, 1.0 for exact hits
    pub similarity: f32,
}

#[derive(Debug)]
struct SlotState {
    access_count: u64,
    tier: CacheTier,
    /// Global access sequence number; lowest is least recently used
    last_access_seq: u64,
    /// Start of the current idle period (last access or last demotion)
    idle_since: Instant,
    last_accessed: DateTime<Utc>,
}

#[derive(Debug)]
struct Slot<V> {
    key: String,
    query: String,
    query_hash: String,
    result: V,
    embedding: Option<Vec<f32>>,
    agent_id: Option<String>,
    backend: String,
    tags: std::collections::BTreeSet<String>,
    created_at: DateTime<Utc>,
    state: Mutex<SlotState>,
}

impl<V: Clone> Slot<V> {
    fn new(insert: CacheInsert<V>, seq: u64, now: Instant) -> Self {
        let created_at = Utc::now();
        Self {
            query_hash: key::query_hash(&insert.query),
            key: insert.key,
            query: insert.query,
            result: insert.result,
            embedding: insert.embedding,
            agent_id: insert.agent_id,
            backend: insert.backend,
            tags: insert.tags,
            created_at,
            state: Mutex::new(SlotState {
                access_count: 0,
                tier: CacheTier::Cold,
                last_access_seq: seq,
                idle_since: now,
                last_accessed: created_at,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> CacheEntry<V> {
        let state = self.state();
        CacheEntry {
            key: self.key.clone(),
            query_hash: self.query_hash.clone(),
            query: self.query.clone(),
            result: self.result.clone(),
            embedding: self.embedding.clone(),
            metadata: EntryMetadata {
                agent_id: self.agent_id.clone(),
                backend: self.backend.clone(),
                tags: self.tags.clone(),
                timestamp: self.created_at,
                last_accessed: state.last_accessed,
                access_count: state.access_count,
                tier: state.tier,
            },
        }
    }
}

/// Cache of (query, result) pairs with hot/warm/cold tiers
pub struct TieredRetrievalCache<V> {
    entries: RwLock<HashMap<String, Arc<Slot<V>>>>,
    policy: TierPolicy,
    max_entries: usize,
    similarity_threshold: f32,
    counters: CacheCounters,
    access_seq: AtomicU64,
    events: EventBus,
}

impl<V> TieredRetrievalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy: TierPolicy::from_config(config),
            max_entries: config.max_entries,
            similarity_threshold: config.similarity_threshold,
            counters: CacheCounters::default(),
            access_seq: AtomicU64::new(0),
            events: EventBus::default(),
        }
    }

    pub fn with_capacity(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_policy(mut self, policy: TierPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Number of entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Deterministic key over the normalized query and its filters
    pub fn generate_key(query: &str, params: &CacheKeyParams) -> String {
        key::generate_key(query, params)
    }

    /// Look up a result by key, falling back to embedding similarity
    pub fn get(&self, key: &str, embedding: Option<&[f32]>) -> Option<V> {
        self.lookup(key, embedding, None).map(|hit| hit.value)
    }

    /// Look up a result, attributing the hit or miss to `agent_id`
    pub fn lookup(&self, key: &str, embedding: Option<&[f32]>, agent_id: Option<&str>) -> Option<CacheHit<V>> {
        let started = std::time::Instant::now();
        let now = Instant::now();

        let exact = self.read().get(key).cloned();
        if let Some(slot) = exact {
            match self.touch(&slot, now, false, 1.0) {
                Some(hit) => return Some(self.finish_hit(hit, started, agent_id)),
                None => self.expire(&slot),
            }
        }

        if let Some(embedding) = embedding
            && let Some((slot, similarity)) = self.most_similar(embedding, now)
            && let Some(hit) = self.touch(&slot, now, true, similarity)
        {
            debug!(key, matched = %hit.key, similarity, "Fuzzy cache hit");
            return Some(self.finish_hit(hit, started, agent_id));
        }

        self.counters.record_miss(started.elapsed(), agent_id);
        debug!(key, "Cache miss");
        None
    }

    fn finish_hit(&self, hit: CacheHit<V>, started: std::time::Instant, agent_id: Option<&str>) -> CacheHit<V> {
        self.counters.record_hit(hit.fuzzy, started.elapsed(), agent_id);
        self.events
            .publish(KnowledgeEvent::cache_hit(&hit.key, hit.tier, hit.fuzzy));
        hit
    }

    /// Record an access; returns None when the entry has expired
    fn touch(&self, slot: &Slot<V>, now: Instant, fuzzy: bool, similarity: f32) -> Option<CacheHit<V>> {
        let mut state = slot.state();
        if self.is_expired(&state, now) {
            return None;
        }

        state.access_count += 1;
        state.last_access_seq = self.next_seq();
        state.idle_since = now;
        state.last_accessed = Utc::now();

        let promoted = self.policy.tier_after_access(state.tier, state.access_count);
        if promoted != state.tier {
            debug!(key = %slot.key, from = %state.tier, to = %promoted, "Cache entry promoted");
            state.tier = promoted;
            self.counters.promotions.fetch_add(1, Ordering::Relaxed);
        }

        Some(CacheHit {
            value: slot.result.clone(),
            key: slot.key.clone(),
            tier: state.tier,
            access_count: state.access_count,
            fuzzy,
            similarity,
        })
    }

    /// Best live entry whose embedding clears the similarity threshold
    fn most_similar(&self, embedding: &[f32], now: Instant) -> Option<(Arc<Slot<V>>, f32)> {
        let entries = self.read();
        let mut best: Option<(&Arc<Slot<V>>, f32)> = None;

        for slot in entries.values() {
            let Some(stored) = &slot.embedding else {
                continue;
            };
            let similarity = cosine_similarity(embedding, stored);
            if similarity < self.similarity_threshold || self.is_expired(&slot.state(), now) {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, score)) => {
                    similarity > score || (similarity == score && slot.key < current.key)
                }
            };
            if better {
                best = Some((slot, similarity));
            }
        }

        best.map(|(slot, similarity)| (Arc::clone(slot), similarity))
    }

    /// Remove an entry found expired on access
    fn expire(&self, slot: &Arc<Slot<V>>) {
        let removed = {
            let mut entries = self.write();
            match entries.get(&slot.key) {
                Some(current) if Arc::ptr_eq(current, slot) => entries.remove(&slot.key).is_some(),
                _ => false,
            }
        };
        if removed {
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            debug!(key = %slot.key, "Expired cache entry removed on access");
            self.events
                .publish(KnowledgeEvent::cache_evicted(&slot.key, EvictionReason::Expired));
        }
    }

    /// Insert a result at the cold tier
    ///
    /// When the cache is full the least recently used entry is evicted
    /// first. Returns `Ok(false)` when the entry was dropped because the
    /// cache has no capacity at all.
    pub fn set(&self, insert: CacheInsert<V>) -> Result<bool> {
        if insert.key.trim().is_empty() {
            return Err(Error::InvalidInput("cache key must not be empty".into()));
        }
        if self.max_entries == 0 {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                key = %insert.key,
                error = %Error::CapacityExceeded { capacity: 0 },
                "Dropping cache entry"
            );
            return Ok(false);
        }

        let slot = Arc::new(Slot::new(insert, self.next_seq(), Instant::now()));
        let key = slot.key.clone();

        let evicted = {
            let mut entries = self.write();
            let mut evicted = None;
            if !entries.contains_key(&key) && entries.len() >= self.max_entries {
                evicted = entries
                    .iter()
                    .min_by_key(|(_, s)| s.state().last_access_seq)
                    .map(|(k, _)| k.clone());
                if let Some(lru) = &evicted {
                    entries.remove(lru);
                }
            }
            entries.insert(key.clone(), slot);
            evicted
        };

        if let Some(lru) = evicted {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(evicted = %lru, inserted = %key, "Evicted least recently used cache entry");
            self.events
                .publish(KnowledgeEvent::cache_evicted(lru, EvictionReason::Capacity));
        }

        Ok(true)
    }

    /// Snapshot of an entry without counting an access
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        self.read().get(key).map(|slot| slot.snapshot())
    }

    /// Remove entries matching the criteria; returns how many were removed
    pub fn invalidate(&self, criteria: &InvalidationCriteria) -> usize {
        if criteria.is_empty() {
            return 0;
        }

        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, slot| !criteria.matches(slot.agent_id.as_deref(), &slot.backend, &slot.tags));
        let removed = before - entries.len();

        if removed > 0 {
            info!(removed, all = criteria.all, "Cache entries invalidated");
        }
        removed
    }

    /// Remove expired entries and demote idle ones; returns how many were
    /// removed
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut demoted = 0u64;

        {
            let entries = self.read();
            for slot in entries.values() {
                let mut state = slot.state();
                if self.is_expired(&state, now) {
                    expired.push(Arc::clone(slot));
                    continue;
                }
                let idle = now.saturating_duration_since(state.idle_since);
                if idle >= self.policy.ttl(state.tier) / 2
                    && let Some(lower) = state.tier.demoted()
                {
                    state.tier = lower;
                    state.idle_since = now;
                    demoted += 1;
                }
            }
        }

        let mut removed_keys = Vec::new();
        if !expired.is_empty() {
            let mut entries = self.write();
            for slot in &expired {
                let still_expired = match entries.get(&slot.key) {
                    Some(current) => Arc::ptr_eq(current, slot) && self.is_expired(&slot.state(), now),
                    None => false,
                };
                if still_expired {
                    entries.remove(&slot.key);
                    removed_keys.push(slot.key.clone());
                }
            }
        }

        self.counters
            .expirations
            .fetch_add(removed_keys.len() as u64, Ordering::Relaxed);
        self.counters.demotions.fetch_add(demoted, Ordering::Relaxed);
        for key in &removed_keys {
            self.events
                .publish(KnowledgeEvent::cache_evicted(key, EvictionReason::Expired));
        }

        if !removed_keys.is_empty() || demoted > 0 {
            debug!(removed = removed_keys.len(), demoted, "Cache sweep complete");
        }
        removed_keys.len()
    }

    /// Record time spent producing a result after a miss
    pub fn record_fetch(&self, elapsed: Duration) {
        self.counters.record_fetch(elapsed);
    }

    /// Current metrics; reading them changes nothing
    pub fn metrics(&self) -> CacheMetrics {
        let mut by_tier: BTreeMap<String, usize> = CacheTier::all()
            .iter()
            .map(|tier| (tier.to_string(), 0))
            .collect();
        for slot in self.read().values() {
            *by_tier.entry(slot.state().tier.to_string()).or_insert(0) += 1;
        }
        self.counters.snapshot(by_tier)
    }

    /// Run [`cleanup`](Self::cleanup) every `period` until cancelled
    ///
    /// The task holds a weak reference and stops on its own once the cache
    /// is dropped.
    pub fn spawn_cleanup_task(self: &Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            info!(interval_secs = period.as_secs(), "Cache sweeper started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else {
                            break;
                        };
                        cache.cleanup();
                    }
                }
            }

            info!("Cache sweeper stopped");
        })
    }

    fn is_expired(&self, state: &SlotState, now: Instant) -> bool {
        now.saturating_duration_since(state.idle_since) > self.policy.ttl(state.tier)
    }

    fn next_seq(&self) -> u64 {
        self.access_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Slot<V>>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Slot<V>>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
