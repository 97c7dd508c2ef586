//! Verbose-transaction cache.
//!
//! Caching here leans on chain semantics rather than generic TTLs. A
//! transaction buried at or beyond the maturity depth is immutable, so a
//! mature entry never goes stale and stays until evicted for space. A
//! shallower transaction can still be reorganized away (its blockhash and
//! confirmation count change), so shallow entries are only served within a
//! short revalidation window and are the first to be evicted. Unconfirmed
//! transactions are never stored; the mempool changes under us.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_MATURITY_DEPTH: i32 = 6;
const DEFAULT_REVALIDATION_WINDOW: Duration = Duration::from_secs(120);

/// Configuration for the transaction cache.
#[derive(Clone, Debug)]
pub struct TxCacheConfig {
    /// Maximum number of cached transactions.
    pub capacity: usize,
    /// Confirmation depth at which a transaction is treated as immutable.
    pub maturity_depth: i32,
    /// How long a shallow entry may be served before it must be refetched.
    pub revalidation_window: Duration,
}

impl Default for TxCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            maturity_depth: DEFAULT_MATURITY_DEPTH,
            revalidation_window: DEFAULT_REVALIDATION_WINDOW,
        }
    }
}

struct CacheEntry {
    value: Value,
    /// Buried deeply enough that a reorg cannot touch it.
    mature: bool,
    stored_at: Instant,
    /// Logical-clock stamp of the last lookup, for eviction.
    last_used: u64,
}

impl CacheEntry {
    fn is_stale(&self, window: Duration) -> bool {
        !self.mature && self.stored_at.elapsed() >= window
    }
}

/// Bounded cache of verbose transactions keyed by txid.
pub struct TxCache {
    entries: HashMap<String, CacheEntry>,
    config: TxCacheConfig,
    /// Logical clock; every lookup and store advances it.
    clock: u64,
    hits: u64,
    misses: u64,
}

impl TxCache {
    /// Create a cache with the given configuration.
    pub fn new(config: TxCacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a transaction snapshot.
    ///
    /// A shallow entry past its revalidation window counts as a miss and is
    /// dropped, forcing the caller back to the wire.
    pub fn get(&mut self, txid: &str) -> Option<Value> {
        let stale = match self.entries.get(txid) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => entry.is_stale(self.config.revalidation_window),
        };
        if stale {
            self.entries.remove(txid);
            self.misses += 1;
            return None;
        }

        self.clock += 1;
        self.hits += 1;
        let clock = self.clock;
        self.entries.get_mut(txid).map(|entry| {
            entry.last_used = clock;
            entry.value.clone()
        })
    }

    /// Store a transaction snapshot with its confirmation count.
    ///
    /// Unconfirmed transactions are not cacheable; returns whether the
    /// entry was stored.
    pub fn insert(&mut self, txid: &str, confirmations: i32, value: Value) -> bool {
        if confirmations <= 0 {
            return false;
        }
        if !self.entries.contains_key(txid) && self.entries.len() >= self.config.capacity {
            self.evict();
        }
        self.clock += 1;
        let entry = CacheEntry {
            value,
            mature: confirmations >= self.config.maturity_depth,
            stored_at: Instant::now(),
            last_used: self.clock,
        };
        drop(self.entries.insert(txid.to_string(), entry));
        true
    }

    /// Whether a servable entry exists (non-destructive).
    pub fn contains(&self, txid: &str) -> bool {
        self.entries
            .get(txid)
            .is_some_and(|entry| !entry.is_stale(self.config.revalidation_window))
    }

    /// Number of cached transactions, stale shallow entries included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fraction of lookups served from the cache.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Drop one entry to make room.
    ///
    /// Shallow entries are the cheapest to lose (a reorg could invalidate
    /// them anyway), so the victim is the least-recently-used shallow entry,
    /// falling back to the least-recently-used mature one.
    fn evict(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.mature, entry.last_used))
            .map(|(txid, _)| txid.clone());
        if let Some(txid) = victim {
            drop(self.entries.remove(&txid));
        }
    }
}

impl Default for TxCache {
    fn default() -> Self {
        Self::new(TxCacheConfig::default())
    }
}
