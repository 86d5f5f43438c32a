//! Last-known-good response cache.
//!
//! Entries are keyed by `(category, query_key)` and are never evicted: a
//! stale entry is the last line of defence when every provider fails or is
//! rate limited, so the most recent successful value is always retained and
//! only ever overwritten by a newer one.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::SharedClock;
use crate::errors::ConfigError;
use crate::models::{Category, ProviderId, QueryKey};

/// Default freshness window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// How a single fetch interacts with the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Serve a fresh entry without touching the network; otherwise walk the
    /// pool and write the result back.
    #[default]
    Use,
    /// Always walk the pool and write the result back. Stale entries are
    /// still served when every provider fails.
    Refresh,
    /// Neither read nor write the cache.
    Bypass,
}

impl CacheMode {
    pub fn reads_fresh(self) -> bool {
        matches!(self, Self::Use)
    }

    pub fn writes(self) -> bool {
        !matches!(self, Self::Bypass)
    }

    pub fn serves_stale(self) -> bool {
        !matches!(self, Self::Bypass)
    }
}

impl FromStr for CacheMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "use" => Ok(Self::Use),
            "refresh" => Ok(Self::Refresh),
            "bypass" => Ok(Self::Bypass),
            other => Err(ConfigError::Invalid(format!("unknown cache mode '{other}'"))),
        }
    }
}

/// Cache key: one logical query within one category.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub category: Category,
    pub query_key: QueryKey,
}

impl CacheKey {
    pub fn new(category: Category, query_key: impl Into<QueryKey>) -> Self {
        Self {
            category,
            query_key: query_key.into(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.category, self.query_key)
    }
}

/// The most recent successful value for a key.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub value: Value,
    pub provider_id: ProviderId,
    pub fetched_at: Instant,
    pub fetched_at_wall: DateTime<Utc>,
    pub ttl: Duration,
    /// Cache-wide write sequence number; higher means written later.
    pub version: u64,
}

impl CacheEntry {
    /// `now - fetched_at > ttl`.
    pub fn is_stale_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) > self.ttl
    }
}

/// Concurrent response cache with per-category TTLs.
pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    default_ttl: Duration,
    ttl_overrides: HashMap<Category, Duration>,
    clock: SharedClock,
    writes: AtomicU64,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration, ttl_overrides: HashMap<Category, Duration>, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            ttl_overrides,
            clock,
            writes: AtomicU64::new(0),
        }
    }

    pub fn ttl_for(&self, category: Category) -> Duration {
        self.ttl_overrides
            .get(&category)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Store a successful value. A write never replaces a newer entry.
    ///
    /// The version is drawn while the key's shard is locked, so versions of
    /// one key only grow.
    pub fn put(&self, key: CacheKey, value: Value, provider_id: ProviderId) -> CacheEntry {
        let mut entry = CacheEntry {
            ttl: self.ttl_for(key.category),
            value,
            provider_id,
            fetched_at: self.clock.now(),
            fetched_at_wall: self.clock.wall(),
            version: 0,
        };

        match self.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                if entry.fetched_at >= slot.get().fetched_at {
                    entry.version = self.next_version();
                    slot.insert(entry);
                }
                slot.get().clone()
            }
            Entry::Vacant(slot) => {
                entry.version = self.next_version();
                slot.insert(entry).value().clone()
            }
        }
    }

    fn next_version(&self) -> u64 {
        self.writes.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Latest entry regardless of freshness.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Entry only if it is still fresh.
    pub fn get_fresh(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = self.clock.now();
        self.get(key).filter(|entry| !entry.is_stale_at(now))
    }

    pub fn is_stale(&self, key: &CacheKey) -> Option<bool> {
        let now = self.clock.now();
        self.entries.get(key).map(|entry| entry.is_stale_at(now))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.entries.len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
