// =============================================================================
// DATAGO — LRU response cache
// =============================================================================
// Bounded in-memory cache keyed by "{type}:{key}". Per-type TTLs, strict LRU
// over both entry count and serialized size. All bookkeeping sits behind one
// mutex so the bounds hold after every operation commits; the time-dependent
// paths take an explicit now_ms so expiry logic is testable without sleeping.
// =============================================================================

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

pub const MAX_ENTRIES: usize = 1_000;
pub const MAX_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheType {
    Address,
    Building,
    Coordinate,
    Realtime,
    Static,
}

impl CacheType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Building => "building",
            Self::Coordinate => "coordinate",
            Self::Realtime => "realtime",
            Self::Static => "static",
        }
    }

    /// Per-type TTL policy.
    pub fn ttl(self) -> Duration {
        match self {
            Self::Address => Duration::from_secs(86_400),
            Self::Building => Duration::from_secs(86_400),
            Self::Coordinate => Duration::from_secs(604_800),
            Self::Realtime => Duration::from_secs(300),
            Self::Static => Duration::from_secs(2_592_000),
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Entry {
    value: Value,
    created_ms: u64,
    expires_ms: u64,
    hits: u64,
    size: usize,
    tick: u64,
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, Entry>,
    /// recency tick → full key; the lowest tick is the LRU victim.
    recency: BTreeMap<u64, String>,
    tick: u64,
    total_bytes: usize,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &str) {
        let tick = self.next_tick();
        if let Some(entry) = self.map.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.map.remove(key)?;
        self.recency.remove(&entry.tick);
        self.total_bytes -= entry.size;
        Some(entry)
    }
}

/// Result of a lookup; a miss carries neither value nor age.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub hit: bool,
    pub value: Option<Value>,
    pub age_ms: Option<u64>,
}

impl CacheLookup {
    fn miss() -> Self {
        Self { hit: false, value: None, age_ms: None }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
    /// Percent of lookups served from cache; 0 before any lookup.
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedCacheStats {
    #[serde(flatten)]
    pub basic: CacheStats,
    pub sets: u64,
    pub deletes: u64,
    pub calculated_size: usize,
    pub max_calculated_size: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub current: usize,
    pub max: usize,
    pub percentage: f64,
}

pub struct GatewayCache {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

impl Default for GatewayCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayCache {
    pub fn new() -> Self {
        Self::with_bounds(MAX_ENTRIES, MAX_BYTES)
    }

    pub fn with_bounds(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries,
            max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn full_key(ty: CacheType, key: &str) -> String {
        format!("{}:{}", ty.as_str(), key)
    }

    fn now_ms() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }

    pub fn set(&self, ty: CacheType, key: &str, value: Value, ttl: Option<Duration>) {
        self.set_at(ty, key, value, ttl, Self::now_ms());
    }

    fn set_at(&self, ty: CacheType, key: &str, value: Value, ttl: Option<Duration>, now_ms: u64) {
        let size = serde_json::to_vec(&value).map(|b| b.len()).unwrap_or(0);
        if size > self.max_bytes {
            warn!(key = %key, size, max = self.max_bytes, "cache_value_exceeds_capacity_skipped");
            return;
        }
        let ttl_ms = ttl.unwrap_or_else(|| ty.ttl()).as_millis() as u64;
        let full = Self::full_key(ty, key);

        let mut inner = self.inner.lock().expect("cache lock");
        inner.remove(&full);
        // Make room before the insert so the bounds hold when it commits.
        while inner.map.len() >= self.max_entries || inner.total_bytes + size > self.max_bytes {
            let Some((&victim_tick, _)) = inner.recency.iter().next() else { break };
            let victim_key = inner.recency[&victim_tick].clone();
            if let Some(victim) = inner.remove(&victim_key) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %victim_key, size = victim.size, hits = victim.hits, "cache_evicted_lru");
            }
        }
        let tick = inner.next_tick();
        inner.total_bytes += size;
        inner.recency.insert(tick, full.clone());
        inner.map.insert(
            full,
            Entry {
                value,
                created_ms: now_ms,
                expires_ms: now_ms + ttl_ms,
                hits: 0,
                size,
                tick,
            },
        );
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, ty: CacheType, key: &str) -> CacheLookup {
        self.get_at(ty, key, Self::now_ms())
    }

    fn get_at(&self, ty: CacheType, key: &str, now_ms: u64) -> CacheLookup {
        let full = Self::full_key(ty, key);
        let mut inner = self.inner.lock().expect("cache lock");
        let expired = match inner.map.get(&full) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return CacheLookup::miss();
            }
            Some(entry) => entry.expires_ms <= now_ms,
        };
        if expired {
            inner.remove(&full);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::miss();
        }
        let entry = inner.map.get_mut(&full).expect("entry present");
        entry.hits += 1;
        let value = entry.value.clone();
        let age_ms = now_ms.saturating_sub(entry.created_ms);
        inner.touch(&full);
        self.hits.fetch_add(1, Ordering::Relaxed);
        CacheLookup { hit: true, value: Some(value), age_ms: Some(age_ms) }
    }

    pub fn delete(&self, ty: CacheType, key: &str) -> bool {
        let full = Self::full_key(ty, key);
        let removed = self.inner.lock().expect("cache lock").remove(&full).is_some();
        if removed {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn delete_by_type(&self, ty: CacheType) -> usize {
        let prefix = format!("{}:", ty.as_str());
        let mut inner = self.inner.lock().expect("cache lock");
        let keys: Vec<String> =
            inner.map.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
        for key in &keys {
            inner.remove(key);
        }
        self.deletes.fetch_add(keys.len() as u64, Ordering::Relaxed);
        keys.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock");
        let count = inner.map.len() as u64;
        *inner = Inner::default();
        self.deletes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn has(&self, ty: CacheType, key: &str) -> bool {
        self.has_at(ty, key, Self::now_ms())
    }

    fn has_at(&self, ty: CacheType, key: &str, now_ms: u64) -> bool {
        let full = Self::full_key(ty, key);
        let mut inner = self.inner.lock().expect("cache lock");
        let expired = match inner.map.get(&full) {
            None => return false,
            Some(entry) => entry.expires_ms <= now_ms,
        };
        if expired {
            inner.remove(&full);
            return false;
        }
        true
    }

    /// Milliseconds until expiry; 0 for absent or already-expired entries.
    pub fn remaining_ttl(&self, ty: CacheType, key: &str) -> u64 {
        let full = Self::full_key(ty, key);
        let now = Self::now_ms();
        let inner = self.inner.lock().expect("cache lock");
        inner.map.get(&full).map(|e| e.expires_ms.saturating_sub(now)).unwrap_or(0)
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let current = self.inner.lock().expect("cache lock").total_bytes;
        MemoryUsage {
            current,
            max: self.max_bytes,
            percentage: current as f64 / self.max_bytes as f64 * 100.0,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            size: self.inner.lock().expect("cache lock").map.len(),
            max_size: self.max_entries,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 * 100.0 },
        }
    }

    pub fn detailed_stats(&self) -> DetailedCacheStats {
        DetailedCacheStats {
            basic: self.stats(),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            calculated_size: self.inner.lock().expect("cache lock").total_bytes,
            max_calculated_size: self.max_bytes,
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Removes every expired entry; returns how many were dropped. Driven by
    /// the housekeeping task alongside the remove-at-observation paths.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Self::now_ms())
    }

    fn sweep_expired_at(&self, now_ms: u64) -> usize {
        let mut inner = self.inner.lock().expect("cache lock");
        let expired: Vec<String> = inner
            .map
            .iter()
            .filter(|(_, e)| e.expires_ms <= now_ms)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }
}
