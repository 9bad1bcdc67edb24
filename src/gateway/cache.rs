//! Listing cache with TTL
//!
//! Holds the merged result of fan-out listings (`tools/list`,
//! `resources/list`, `prompts/list`) keyed by method. Every change to mount
//! membership or a catalog clears it, so a listing never shows a removed
//! mount.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

/// Thread-safe listing cache
pub struct ListingCache {
    /// Entries keyed by method name
    entries: DashMap<String, CachedListing>,
    /// Time-to-live; zero disables caching
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

struct CachedListing {
    value: Value,
    cached_at: Instant,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    /// Served from cache
    pub hits: u64,
    /// Not cached or expired
    pub misses: u64,
    /// Full clears caused by mount changes
    pub invalidations: u64,
    /// Current entry count
    pub size: usize,
}

impl ListingCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Cached listing for `method`, if present and fresh
    pub fn get(&self, method: &str) -> Option<Value> {
        let fresh = self
            .entries
            .get(method)
            .filter(|entry| entry.cached_at.elapsed() <= self.ttl)
            .map(|entry| entry.value.clone());

        if fresh.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.entries.remove(method);
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    /// Current generation; read it before computing a listing
    pub fn generation(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Store a listing computed at `generation`
    ///
    /// Dropped if a clear happened since `generation` was read.
    pub fn set(&self, method: &str, value: Value, generation: u64) {
        if self.ttl.is_zero() || self.generation() != generation {
            return;
        }
        self.entries.insert(
            method.to_string(),
            CachedListing {
                value,
                cached_at: Instant::now(),
            },
        );
        // A clear may have landed between the check and the insert
        if self.generation() != generation {
            self.entries.remove(method);
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }
}
