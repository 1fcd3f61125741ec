//! Tiered cache implementation.

use chrono::Utc;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache domains with fixed freshness contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheDomain {
    /// Spot prices: 5 s, never served older.
    Spot,
    /// Option chains: 10 s; the chain carries its own captured_at too.
    Chain,
    /// Technical indicators per (symbol, timeframe): 30 s.
    Technicals,
    /// Historical IV series for IV-rank: 5 min, shared tier only.
    IvHistory,
}

impl CacheDomain {
    pub fn ttl(&self) -> Duration {
        match self {
            Self::Spot => Duration::from_secs(5),
            Self::Chain => Duration::from_secs(10),
            Self::Technicals => Duration::from_secs(30),
            Self::IvHistory => Duration::from_secs(300),
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Chain => "chain",
            Self::Technicals => "tech",
            Self::IvHistory => "ivhist",
        }
    }

    /// IV history lives only in the shared tier; everything else is
    /// mirrored locally.
    fn uses_local_tier(&self) -> bool {
        !matches!(self, Self::IvHistory)
    }
}

/// JSON envelope stored in both tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    /// Capture time, epoch milliseconds.
    captured_at_ms: i64,
    value: serde_json::Value,
}

impl Envelope {
    fn age(&self) -> Duration {
        let elapsed_ms = (Utc::now().timestamp_millis() - self.captured_at_ms).max(0);
        Duration::from_millis(elapsed_ms as u64)
    }
}

/// Hit/miss counters for health reporting.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub local_hits: AtomicU64,
    pub shared_hits: AtomicU64,
    pub misses: AtomicU64,
}

impl CacheStats {
    /// Hit rate over all lookups so far, in [0, 1].
    pub fn hit_rate(&self) -> f64 {
        let hits = self.local_hits.load(Ordering::Relaxed) + self.shared_hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        hits as f64 / total as f64
    }
}

/// Two-tier cache: local DashMap plus optional shared Redis.
pub struct TieredCache {
    local: DashMap<String, Envelope>,
    shared: Option<ConnectionManager>,
    pub stats: CacheStats,
}

impl TieredCache {
    /// Local-only cache (tests, or Redis disabled by config).
    pub fn local_only() -> Self {
        Self {
            local: DashMap::new(),
            shared: None,
            stats: CacheStats::default(),
        }
    }

    /// Connect the shared tier. A failed connection degrades to
    /// local-only rather than erroring.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let shared = match redis_url {
            Some(url) => match redis::Client::open(url) {
                Ok(client) => match ConnectionManager::new(client).await {
                    Ok(conn) => {
                        info!("shared cache tier connected");
                        Some(conn)
                    }
                    Err(e) => {
                        warn!(error = %e, "shared cache unavailable, running local-only");
                        None
                    }
                },
                Err(e) => {
                    warn!(error = %e, "invalid redis url, running local-only");
                    None
                }
            },
            None => None,
        };
        Self {
            local: DashMap::new(),
            shared,
            stats: CacheStats::default(),
        }
    }

    pub fn has_shared_tier(&self) -> bool {
        self.shared.is_some()
    }

    fn full_key(domain: CacheDomain, key: &str) -> String {
        format!("{}:{}", domain.prefix(), key)
    }

    /// Fetch a fresh value, or `None` once the domain TTL has expired.
    pub async fn get<T: DeserializeOwned>(&self, domain: CacheDomain, key: &str) -> Option<T> {
        let full_key = Self::full_key(domain, key);
        let ttl = domain.ttl();

        if domain.uses_local_tier() {
            if let Some(entry) = self.local.get(&full_key) {
                if entry.age() <= ttl {
                    if let Ok(v) = serde_json::from_value(entry.value.clone()) {
                        self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
                        return Some(v);
                    }
                } else {
                    drop(entry);
                    self.local.remove(&full_key);
                }
            }
        }

        if let Some(shared) = &self.shared {
            let mut conn = shared.clone();
            let fetched: redis::RedisResult<Option<String>> = redis::cmd("GET")
                .arg(&full_key)
                .query_async(&mut conn)
                .await;
            match fetched {
                Ok(Some(raw)) => {
                    if let Ok(envelope) = serde_json::from_str::<Envelope>(&raw) {
                        if envelope.age() <= ttl {
                            if let Ok(v) = serde_json::from_value(envelope.value.clone()) {
                                // Refill the local tier with the same envelope so
                                // the original capture time keeps governing TTL.
                                if domain.uses_local_tier() {
                                    self.local.insert(full_key, envelope);
                                }
                                self.stats.shared_hits.fetch_add(1, Ordering::Relaxed);
                                return Some(v);
                            }
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(error = %e, key = %full_key, "shared cache read failed"),
            }
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value in both tiers. Best-effort: shared-tier failures are
    /// logged at debug and swallowed.
    pub async fn put<T: Serialize>(&self, domain: CacheDomain, key: &str, value: &T) {
        let full_key = Self::full_key(domain, key);
        let envelope = Envelope {
            captured_at_ms: Utc::now().timestamp_millis(),
            value: match serde_json::to_value(value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, key = %full_key, "unserializable cache value dropped");
                    return;
                }
            },
        };

        if domain.uses_local_tier() {
            self.local.insert(full_key.clone(), envelope.clone());
        }

        if let Some(shared) = &self.shared {
            let raw = match serde_json::to_string(&envelope) {
                Ok(s) => s,
                Err(_) => return,
            };
            let mut conn = shared.clone();
            let ttl_secs = domain.ttl().as_secs().max(1);
            let result: redis::RedisResult<()> = redis::cmd("SET")
                .arg(&full_key)
                .arg(raw)
                .arg("EX")
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                debug!(error = %e, key = %full_key, "shared cache write failed");
            }
        }
    }

    /// Drop one entry from the local tier (shared entries age out on TTL).
    pub fn invalidate_local(&self, domain: CacheDomain, key: &str) {
        self.local.remove(&Self::full_key(domain, key));
    }
}
