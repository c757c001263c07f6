//! Content-addressed response cache for external generation calls.
//!
//! The cache is a pure memoization layer keyed by caller-computed
//! fingerprints: it never computes results itself, and a hit must
//! short-circuit the service call entirely. Entries expire by TTL (checked
//! lazily on access or via [`ResponseCache::sweep`]) and are evicted
//! least-recently-accessed-first when the entry cap is exceeded,
//! irrespective of remaining TTL.

use crate::config::CacheConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A deterministic digest of a normalized service request.
///
/// Computed by the caller; the cache is fingerprint-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps a precomputed digest.
    #[must_use]
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Returns the digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One memoized response.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    created_at: Instant,
    last_access: Instant,
    hits: u64,
}

/// Read-only cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that fell through to the service.
    pub misses: u64,
    /// Entries currently resident.
    pub entries: usize,
}

/// Memoization cache around the external generation service.
///
/// Safe for concurrent use from many workers; a single mutex guards the
/// entry map, which is only ever held for map bookkeeping, never across a
/// service call.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up a fingerprint, refreshing its last-access time on a hit.
    ///
    /// Expired entries are removed lazily here and count as misses.
    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(fingerprint) {
            if entry.created_at.elapsed() >= self.config.ttl() {
                entries.remove(fingerprint);
            } else {
                entry.last_access = Instant::now();
                entry.hits += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores a response under a fingerprint.
    ///
    /// Last put wins for a given fingerprint; values for one fingerprint are
    /// expected to be deterministic for the same input. Inserting beyond the
    /// configured capacity evicts the least-recently-accessed entry.
    pub fn put(&self, fingerprint: Fingerprint, value: serde_json::Value) {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        entries.insert(
            fingerprint,
            CacheEntry {
                value,
                created_at: now,
                last_access: now,
                hits: 0,
            },
        );

        while entries.len() > self.config.max_entries {
            let Some(victim) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(fp, _)| fp.clone())
            else {
                break;
            };
            entries.remove(&victim);
            tracing::debug!(fingerprint = %victim, "Evicted least-recently-used cache entry");
        }
    }

    /// Removes every expired entry. Suitable for a periodic sweep; the lazy
    /// expiry in [`ResponseCache::get`] makes calling this optional.
    pub fn sweep(&self) {
        let ttl = self.config.ttl();
        self.entries
            .lock()
            .retain(|_, entry| entry.created_at.elapsed() < ttl);
    }

    /// Returns the hit/miss counters and resident entry count.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
        }
    }

    /// Returns the number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
