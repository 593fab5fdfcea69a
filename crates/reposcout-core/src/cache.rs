//! Fixed-capacity LRU cache shared between pipeline workers.
//!
//! [`LruCache`] is the single-threaded structure: a `HashMap` from key to slot
//! plus a doubly-linked recency list threaded through a slot arena. The head of
//! the list is the most recently touched key, the tail the least recently
//! touched one and the only eviction candidate. Slots are reused in place on
//! eviction, so the arena never grows past `capacity`.
//!
//! [`SharedLruCache`] puts the map and the list behind one `RwLock`. A hit
//! reorders the list, so [`SharedLruCache::read`] takes the write guard just
//! like [`SharedLruCache::write`]; only non-promoting inspection (`peek`,
//! `contains`, `len`) shares the read guard. Map and list are therefore never
//! observed out of step.
//!
//! ```rust
//! use reposcout_core::SharedLruCache;
//!
//! # tokio_test_block(async {
//! let cache = SharedLruCache::new(2)?;
//! cache.write("a".to_string(), 1).await;
//! cache.write("b".to_string(), 2).await;
//! cache.read(&"a".to_string()).await; // "a" is now most recent
//! cache.write("c".to_string(), 3).await; // evicts "b"
//! assert!(!cache.contains(&"b".to_string()).await);
//! # Ok::<(), reposcout_core::Error>(())
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use crate::types::RepoSummary;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Cache of transformed search results keyed by topic.
pub type TopicCache = SharedLruCache<String, Vec<RepoSummary>>;

/// Single-threaded LRU map with O(1) lookup, promotion and eviction.
pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    nodes: Vec<Node<K, V>>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty cache holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity(capacity));
        }

        let reserve = capacity.min(1024);
        Ok(Self {
            map: HashMap::with_capacity(reserve),
            nodes: Vec::with_capacity(reserve),
            head: None,
            tail: None,
            capacity,
        })
    }

    /// Maximum number of entries.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up `key` and promote it to most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        Some(&self.nodes[idx].value)
    }

    /// Look up `key` without touching recency order.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map.get(key).map(|&idx| &self.nodes[idx].value)
    }

    /// Whether `key` is present. Does not touch recency order.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Insert or replace `key`, making it the most recently used entry.
    ///
    /// Returns the entry that was evicted to make room, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            self.nodes[idx].value = value;
            self.move_to_front(idx);
            return None;
        }

        if self.map.len() < self.capacity {
            let idx = self.nodes.len();
            self.nodes.push(Node {
                key: key.clone(),
                value,
                prev: None,
                next: None,
            });
            self.map.insert(key, idx);
            self.attach_front(idx);
            return None;
        }

        // Full implies non-empty, so the tail exists. Recycle its slot.
        let idx = self.tail?;
        self.detach(idx);
        let node = &mut self.nodes[idx];
        let evicted_key = std::mem::replace(&mut node.key, key.clone());
        let evicted_value = std::mem::replace(&mut node.value, value);
        self.map.remove(&evicted_key);
        self.map.insert(key, idx);
        self.attach_front(idx);

        Some((evicted_key, evicted_value))
    }

    /// Keys ordered from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            keys.push(self.nodes[idx].key.clone());
            cursor = self.nodes[idx].next;
        }
        keys
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.attach_front(idx);
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);

        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }

        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
    }

    fn attach_front(&mut self, idx: usize) {
        self.nodes[idx].prev = None;
        self.nodes[idx].next = self.head;

        if let Some(head) = self.head {
            self.nodes[head].prev = Some(idx);
        } else {
            self.tail = Some(idx);
        }

        self.head = Some(idx);
    }

    /// Walk the list both ways and cross-check it against the map.
    #[cfg(test)]
    fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.map.len() > self.capacity || self.nodes.len() > self.capacity {
            return Err(format!(
                "size {} / slots {} exceed capacity {}",
                self.map.len(),
                self.nodes.len(),
                self.capacity
            ));
        }

        let mut forward = 0usize;
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            if node.prev != prev {
                return Err(format!("slot {idx} has a broken back link"));
            }
            if self.map.get(&node.key) != Some(&idx) {
                return Err(format!("slot {idx} is linked but not mapped"));
            }
            forward += 1;
            if forward > self.map.len() {
                return Err("recency list is longer than the map".to_string());
            }
            prev = Some(idx);
            cursor = node.next;
        }

        if prev != self.tail {
            return Err("tail does not terminate the recency list".to_string());
        }
        if forward != self.map.len() {
            return Err(format!(
                "list has {forward} nodes but map has {} keys",
                self.map.len()
            ));
        }
        Ok(())
    }
}

/// Hit/miss counters, updated without taking the cache lock.
#[derive(Default)]
struct CacheStats {
    lookups: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    writes: AtomicUsize,
    evictions: AtomicUsize,
}

/// Cache statistics summary
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatsSummary {
    /// Total `read` calls.
    pub lookups: usize,
    /// Reads that found their key.
    pub hits: usize,
    /// Reads that did not.
    pub misses: usize,
    /// Total `write` calls.
    pub writes: usize,
    /// Entries pushed out by capacity pressure.
    pub evictions: usize,
    /// Current entry count.
    pub entries: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// `hits / lookups`, or 0 before the first lookup.
    pub hit_rate: f64,
}

/// Thread-safe LRU cache; see the module docs for the locking discipline.
pub struct SharedLruCache<K, V> {
    inner: RwLock<LruCache<K, V>>,
    stats: CacheStats,
}

impl<K, V> SharedLruCache<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Create a shared cache holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            inner: RwLock::new(LruCache::new(capacity)?),
            stats: CacheStats::default(),
        })
    }

    /// Return a clone of the value under `key`, promoting it on a hit.
    pub async fn read(&self, key: &K) -> Option<V> {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);

        let value = {
            let mut guard = self.inner.write().await;
            guard.get(key).cloned()
        };

        if value.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Insert or replace `key`, evicting the least recently used entry when full.
    pub async fn write(&self, key: K, value: V) {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);

        let evicted = {
            let mut guard = self.inner.write().await;
            guard.put(key, value)
        };

        if let Some((evicted_key, _)) = evicted {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = ?evicted_key, "evicted least recently used entry");
        }
    }

    /// Look up `key` without promoting it.
    pub async fn peek(&self, key: &K) -> Option<V> {
        self.inner.read().await.peek(key).cloned()
    }

    /// Whether `key` is present. Does not promote it.
    pub async fn contains(&self, key: &K) -> bool {
        self.inner.read().await.contains(key)
    }

    /// Current number of entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Keys ordered from most to least recently used.
    pub async fn keys_by_recency(&self) -> Vec<K> {
        self.inner.read().await.keys_by_recency()
    }

    /// Snapshot of the counters plus the current occupancy.
    pub async fn stats(&self) -> CacheStatsSummary {
        let (entries, capacity) = {
            let guard = self.inner.read().await;
            (guard.len(), guard.capacity())
        };

        let lookups = self.stats.lookups.load(Ordering::Relaxed);
        let hits = self.stats.hits.load(Ordering::Relaxed);

        CacheStatsSummary {
            lookups,
            hits,
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            entries,
            capacity,
            #[allow(clippy::cast_precision_loss)]
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }
}
