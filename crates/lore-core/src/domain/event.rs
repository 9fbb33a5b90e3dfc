//! Engine events
//!
//! Observers subscribe to a broadcast channel owned by the engine instead
//! of registering callbacks. Slow receivers lag and drop old events; the
//! publisher never blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::cache::CacheTier;

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events emitted by the knowledge engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum KnowledgeEvent {
    /// A pattern was added to the graph
    PatternStored {
        pattern_id: String,
        entity_ids: Vec<String>,
        persisted: bool,
        timestamp: DateTime<Utc>,
    },
    /// A cache lookup was served
    CacheHit {
        key: String,
        tier: CacheTier,
        /// Served by embedding similarity rather than the exact key
        fuzzy: bool,
        timestamp: DateTime<Utc>,
    },
    /// An entry left the cache because of capacity or TTL
    CacheEvicted {
        key: String,
        reason: EvictionReason,
        timestamp: DateTime<Utc>,
    },
    /// Durable storage failed and the graph now runs in memory only
    StorageDegraded {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// Why an entry left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    Capacity,
    Expired,
}

impl KnowledgeEvent {
    pub fn pattern_stored(pattern_id: impl Into<String>, entity_ids: Vec<String>, persisted: bool) -> Self {
        Self::PatternStored {
            pattern_id: pattern_id.into(),
            entity_ids,
            persisted,
            timestamp: Utc::now(),
        }
    }

    pub fn cache_hit(key: impl Into<String>, tier: CacheTier, fuzzy: bool) -> Self {
        Self::CacheHit {
            key: key.into(),
            tier,
            fuzzy,
            timestamp: Utc::now(),
        }
    }

    pub fn cache_evicted(key: impl Into<String>, reason: EvictionReason) -> Self {
        Self::CacheEvicted {
            key: key.into(),
            reason,
            timestamp: Utc::now(),
        }
    }

    pub fn storage_degraded(reason: impl Into<String>) -> Self {
        Self::StorageDegraded {
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PatternStored { timestamp, .. }
            | Self::CacheHit { timestamp, .. }
            | Self::CacheEvicted { timestamp, .. }
            | Self::StorageDegraded { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name
    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::PatternStored { .. } => "pattern_stored",
            Self::CacheHit { .. } => "cache_hit",
            Self::CacheEvicted { .. } => "cache_evicted",
            Self::StorageDegraded { .. } => "storage_degraded",
        }
    }

    /// Get the pattern id or cache key the event is about
    pub fn aggregate_id(&self) -> Option<&str> {
        match self {
            Self::PatternStored { pattern_id, .. } => Some(pattern_id),
            Self::CacheHit { key, .. } | Self::CacheEvicted { key, .. } => Some(key),
            Self::StorageDegraded { .. } => None,
        }
    }
}

/// Broadcast channel for [`KnowledgeEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<KnowledgeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: KnowledgeEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KnowledgeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
