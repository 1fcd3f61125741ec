//! Two-tier market data cache.
//!
//! Tier one is process-local (`DashMap`); tier two is a shared Redis
//! store. Both tiers hold the same JSON envelope: the value plus its
//! `captured_at` instant, so freshness is judged identically everywhere.
//! The shared tier is optional: if Redis is unreachable the cache
//! silently degrades to local-only. Reads never return stale data; once a
//! domain's TTL has passed, `get` reports a miss and the caller refreshes.
//! Writes are best-effort and never fail the hot path.

pub mod store;

pub use store::{CacheDomain, CacheStats, TieredCache};
