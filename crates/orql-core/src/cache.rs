//! Compiled statement cache.
//!
//! Compiling a query tree is deterministic for a given tree and the parts of
//! the execution options that shape the statement, so compiled queries are
//! shared across sessions keyed by a fingerprint of exactly those inputs.
//! Parameter values are bound per execution and never part of the key.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use orql_proto::{LoadQueryInfluencers, QueryOptions, QueryTree};
use tracing::trace;

use crate::compile::CompiledQuery;
use crate::error::Error;

/// Fingerprint of a query tree and the options shaping its statements.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StatementKey {
    hash: [u8; 32],
}

impl StatementKey {
    /// Fingerprint of `tree` compiled under `options` and `influencers`.
    ///
    /// Covers the tree (literals included, as they are inlined), the lock
    /// mode, which paging bounds are present, the enabled fetch profiles and
    /// the internal fetch profile.
    pub fn new(tree: &QueryTree, options: &QueryOptions, influencers: &LoadQueryInfluencers) -> Result<Self, Error> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&serde_json::to_vec(tree)?);
        hasher.update(options.lock_mode.as_str().as_bytes());
        hasher.update(&[
            u8::from(options.limit.first_result.is_some()),
            u8::from(options.limit.max_results.is_some()),
        ]);
        for profile in &influencers.enabled_fetch_profiles {
            hasher.update(profile.as_bytes());
            hasher.update(&[0]);
        }
        if let Some(profile) = influencers.internal_fetch_profile {
            hasher.update(profile.as_str().as_bytes());
        }
        Ok(Self {
            hash: *hasher.finalize().as_bytes(),
        })
    }

    /// Hex rendering, for logs.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.hash[..8])
    }
}

/// Cached compiled query with metadata.
#[derive(Debug)]
pub struct CachedStatement {
    pub compiled: Arc<CompiledQuery>,
    hit_count: AtomicU64,
}

impl CachedStatement {
    pub fn new(compiled: Arc<CompiledQuery>) -> Self {
        Self {
            compiled,
            hit_count: AtomicU64::new(0),
        }
    }

    /// Increment the hit count and return the new value.
    pub fn record_hit(&self) -> u64 {
        self.hit_count.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    pub fn hits(&self) -> u64 {
        self.hit_count.load(AtomicOrdering::Relaxed)
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(AtomicOrdering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Concurrent compiled statement cache.
///
/// When full, the entry with the fewest hits is evicted. Concurrent misses
/// on the same key may compile twice; the first insert wins and every caller
/// gets that instance.
pub struct StatementCache {
    entries: DashMap<StatementKey, CachedStatement>,
    max_entries: usize,
    stats: CacheStats,
}

impl StatementCache {
    /// Create a cache holding at most `max_entries` statements; zero disables
    /// caching.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            stats: CacheStats::default(),
        }
    }

    pub fn get(&self, key: &StatementKey) -> Option<Arc<CompiledQuery>> {
        match self.entries.get(key) {
            Some(cached) => {
                cached.record_hit();
                self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
                Some(cached.compiled.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
                None
            }
        }
    }

    /// Insert unless present, returning the cached instance.
    pub fn insert(&self, key: StatementKey, compiled: Arc<CompiledQuery>) -> Arc<CompiledQuery> {
        if self.max_entries == 0 {
            return compiled;
        }
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_least_used();
        }
        self.entries
            .entry(key)
            .or_insert_with(|| CachedStatement::new(compiled))
            .compiled
            .clone()
    }

    /// Cached statement for `key`, compiling it with `compile` on a miss.
    pub fn get_or_insert_with<F>(&self, key: StatementKey, compile: F) -> Result<Arc<CompiledQuery>, Error>
    where
        F: FnOnce() -> Result<CompiledQuery, Error>,
    {
        if let Some(cached) = self.get(&key) {
            trace!(key = %key.to_hex(), "Statement cache hit");
            return Ok(cached);
        }
        let compiled = Arc::new(compile()?);
        Ok(self.insert(key, compiled))
    }

    fn evict_least_used(&self) {
        let evict_key = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().hits())
            .map(|entry| *entry.key());

        if let Some(key) = evict_key {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
