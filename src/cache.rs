//! # Result Cache
//!
//! In-memory cache of module results keyed on (target, module id, operation
//! key). Every entry carries an expiry instant that is checked lazily: an
//! expired entry is reported as a miss and evicted by the `get` or `put` that
//! touches it. [`ResultCache::purge_expired`] sweeps everything at once.
//!
//! Reads run concurrently; concurrent writes to the same key are
//! last-writer-wins.
//!
//! ## Example
//!
//! ```rust
//! use reconmap::cache::{CacheKey, CachedReport, ResultCache};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = ResultCache::new();
//! let key = CacheKey::new("example.com", "whois", "lookup");
//!
//! cache.put(key.clone(), CachedReport::new(json!({"registrar": "x"})), Duration::from_secs(60));
//! assert!(cache.get(&key).is_some());
//! # }
//! ```

use crate::module::{ModuleDescriptor, Options};
use crate::target::Discoveries;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use dashmap::DashMap;

/// Cache lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub target: String,
    pub module_id: String,
    pub operation: String,
}

impl CacheKey {
    pub fn new(
        target: impl Into<String>,
        module_id: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            module_id: module_id.into(),
            operation: operation.into(),
        }
    }

    /// Key for one module invocation: the declared operation key plus the
    /// canonical form of the options it will run with.
    pub fn for_module(target: &str, descriptor: &ModuleDescriptor, options: &Options) -> Self {
        Self::new(
            target,
            descriptor.id.as_str(),
            operation_key(&descriptor.operation_key, options),
        )
    }
}

/// Appends the canonical JSON of `options` to `base`
///
/// `serde_json::Map` keeps keys sorted, so equal option sets always serialize
/// to the same text regardless of insertion order. The full text is kept, so
/// two different option sets can never share a key.
pub fn operation_key(base: &str, options: &Options) -> String {
    if options.is_empty() {
        return base.to_string();
    }
    format!("{}#{}", base, Value::Object(options.clone()))
}

/// What the cache remembers of a successful module run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedReport {
    pub payload: Value,
    #[serde(default)]
    pub discoveries: Discoveries,
}

impl CachedReport {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            discoveries: Discoveries::default(),
        }
    }

    pub fn with_discoveries(mut self, discoveries: Discoveries) -> Self {
        self.discoveries = discoveries;
        self
    }
}

/// One stored value and its lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CachedReport,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Concurrent, expiring result cache
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live entry; expired entries count as misses and are evicted
    pub fn get(&self, key: &CacheKey) -> Option<CachedReport> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(module = %key.module_id, target = %key.target, "Cache hit");
                return Some(entry.value.clone());
            }
        }

        if self.entries.remove_if(key, |_, e| e.is_expired(now)).is_some() {
            trace!(module = %key.module_id, target = %key.target, "Evicted expired cache entry");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value` for `ttl`; a zero TTL stores nothing
    pub fn put(&self, key: CacheKey, value: CachedReport, ttl: Duration) {
        if ttl.is_zero() {
            self.entries.remove(&key);
            return;
        }
        let now = Instant::now();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + ttl,
            },
        );
    }

    /// Drop one entry; returns whether it existed
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry for `target`; returns how many were removed
    pub fn invalidate_target(&self, target: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = key.target != target;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Evict every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of stored entries, expired ones included until evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
