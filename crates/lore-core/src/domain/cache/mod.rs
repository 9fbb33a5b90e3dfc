//! Tiered retrieval cache
//!
//! Caches (query, result) pairs keyed by a hash of the normalized query and
//! its filters, with an optional embedding for fuzzy lookups of paraphrased
//! queries.

mod entry;
mod key;
mod metrics;
mod tiered;

pub use entry::{CacheEntry, CacheInsert, CacheTier, EntryMetadata, InvalidationCriteria, TierPolicy};
pub use key::{CacheKeyParams, generate_key, normalize_query, query_hash};
pub use metrics::{AgentCacheMetrics, CacheMetrics};
pub use tiered::{CacheHit, TieredRetrievalCache};
