//! Run-scoped token cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::TokenRequest;

/// SHA-256 of `(domain, strategy, value)`; raw values are never stored.
type CacheKey = [u8; 32];

/// Tokens already issued during this run, keyed by a digest of
/// `(domain, strategy, value)`.
///
/// Shared by every table stream, so a value repeated across pages or across
/// tables in a shared domain costs one service call. Holds at most
/// `capacity` entries and evicts the least recently used one first; an
/// evicted value is simply tokenized again, with the same result.
#[derive(Debug)]
pub struct TokenCache {
    inner: Mutex<Lru>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Default)]
struct Lru {
    /// key -> (token, last use)
    entries: HashMap<CacheKey, (String, u64)>,
    /// last use -> key, oldest first
    recency: BTreeMap<u64, CacheKey>,
    tick: u64,
}

impl Lru {
    fn touch(&mut self, key: &CacheKey) -> Option<String> {
        self.tick += 1;
        let tick = self.tick;
        let (token, used) = self.entries.get_mut(key)?;
        self.recency.remove(used);
        *used = tick;
        self.recency.insert(tick, *key);
        Some(token.clone())
    }

    /// Insert unless present. Returns the number of evicted entries.
    fn insert(&mut self, key: CacheKey, token: &str, capacity: usize) -> u64 {
        if self.entries.contains_key(&key) {
            return 0;
        }
        let mut evicted = 0;
        while self.entries.len() >= capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted += 1;
        }
        self.tick += 1;
        self.entries.insert(key, (token.to_string(), self.tick));
        self.recency.insert(self.tick, key);
        evicted
    }
}

/// Cache counters for the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    #[serde(default)]
    pub evictions: u64,
}

impl TokenCache {
    /// A cache holding at most `capacity` tokens; 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Lru::default()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn key(request: &TokenRequest) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(request.domain.as_key().as_bytes());
        hasher.update([0u8]);
        hasher.update(format!("{:?}", request.strategy).as_bytes());
        hasher.update([0u8]);
        hasher.update(request.value.as_bytes());
        hasher.finalize().into()
    }

    pub fn get(&self, request: &TokenRequest) -> Option<String> {
        let found = if self.capacity == 0 {
            None
        } else {
            let key = Self::key(request);
            self.inner.lock().ok().and_then(|mut lru| lru.touch(&key))
        };
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Record tokens returned by the service for `requests`, pairwise.
    pub fn insert_all(&self, requests: &[TokenRequest], tokens: &[String]) {
        if self.capacity == 0 {
            return;
        }
        let keys: Vec<CacheKey> = requests.iter().map(Self::key).collect();
        if let Ok(mut lru) = self.inner.lock() {
            let mut evicted = 0;
            for (key, token) in keys.into_iter().zip(tokens) {
                evicted += lru.insert(key, token, self.capacity);
            }
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|lru| lru.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
