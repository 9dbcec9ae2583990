//! Byte-budgeted cache with direction-aware eviction
//!
//! Entries are ordered by key (a time). When an insert would exceed the
//! budget, the victim is the entry least useful for the current playhead
//! and direction, not the oldest inserted one:
//!
//! - moving forward: entries behind the playhead go first, farthest behind
//!   first; then entries ahead, farthest ahead first
//! - moving in reverse: mirrored
//!
//! If the new entry would itself be the next victim it is not inserted.
//! Occupancy is tracked in a shared `MemoryPool`, so `usage <= limit` holds
//! after every insert.

use log::{debug, trace};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::playback::CacheDirection;
use crate::core::cache_man::MemoryPool;

/// Byte cost of a cached value
pub trait CacheCost {
    fn cost(&self) -> usize;
}

impl<T: CacheCost> CacheCost for Arc<T> {
    fn cost(&self) -> usize {
        (**self).cost()
    }
}

/// Hit/miss counters
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }
}

/// True if `a` should be evicted before `b`.
pub fn evicts_before<K: Ord>(a: &K, b: &K, anchor: &K, direction: CacheDirection) -> bool {
    match direction {
        CacheDirection::Forward => match (a < anchor, b < anchor) {
            (true, true) => a < b,
            (true, false) => true,
            (false, true) => false,
            (false, false) => a > b,
        },
        CacheDirection::Reverse => match (a > anchor, b > anchor) {
            (true, true) => a > b,
            (true, false) => true,
            (false, true) => false,
            (false, false) => a < b,
        },
    }
}

pub struct DirectionalCache<K, V> {
    name: &'static str,
    entries: BTreeMap<K, V>,
    pool: Arc<MemoryPool>,
    stats: Arc<CacheStats>,
}

impl<K, V> DirectionalCache<K, V>
where
    K: Ord + Copy + fmt::Display,
    V: CacheCost,
{
    pub fn new(name: &'static str, pool: Arc<MemoryPool>) -> Self {
        Self { name, entries: BTreeMap::new(), pool, stats: Arc::new(CacheStats::default()) }
    }

    /// Lookup, counting a hit or miss.
    pub fn get(&self, key: &K) -> Option<&V> {
        let value = self.entries.get(key);
        if value.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        value
    }

    /// Lookup without touching the statistics.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Next entry to go for this playhead and direction.
    pub fn next_victim(&self, anchor: &K, direction: CacheDirection) -> Option<K> {
        let (first, last) = (*self.entries.keys().next()?, *self.entries.keys().next_back()?);
        Some(match direction {
            CacheDirection::Forward if first < *anchor => first,
            CacheDirection::Forward => last,
            CacheDirection::Reverse if last > *anchor => last,
            CacheDirection::Reverse => first,
        })
    }

    /// Keys with their costs, next victim first.
    fn eviction_order(&self, anchor: &K, direction: CacheDirection) -> Vec<(K, usize)> {
        let entry = |(k, v): (&K, &V)| (*k, v.cost());
        match direction {
            CacheDirection::Forward => self
                .entries
                .range(..*anchor)
                .chain(self.entries.range(*anchor..).rev())
                .map(entry)
                .collect(),
            CacheDirection::Reverse => self
                .entries
                .range((Bound::Excluded(*anchor), Bound::Unbounded))
                .rev()
                .chain(self.entries.range(..=*anchor))
                .map(entry)
                .collect(),
        }
    }

    /// Whether an average-sized entry at `key` would be kept right now.
    pub fn would_keep(&self, key: &K, anchor: &K, direction: CacheDirection) -> bool {
        let average = if self.entries.is_empty() { 0 } else { self.pool.usage() / self.entries.len() };
        if !self.pool.would_exceed(average) {
            return true;
        }
        match self.next_victim(anchor, direction) {
            Some(victim) => !evicts_before(key, &victim, anchor, direction),
            None => true,
        }
    }

    /// Insert, evicting as needed. Returns false if the value was not kept.
    pub fn insert(&mut self, key: K, value: V, anchor: &K, direction: CacheDirection) -> bool {
        let cost = value.cost();
        if cost > self.pool.limit() {
            debug!("{} cache: {} ({} bytes) exceeds the whole budget", self.name, key, cost);
            return false;
        }
        // Pick the victims first; a rejected insert leaves the cache untouched
        let replaced = self.entries.get(&key).map_or(0, |v| v.cost());
        let mut excess = (self.pool.usage().saturating_sub(replaced) + cost).saturating_sub(self.pool.limit());
        let mut victims = Vec::new();
        for (victim, size) in self.eviction_order(anchor, direction) {
            if excess == 0 {
                break;
            }
            if victim == key {
                continue;
            }
            if evicts_before(&key, &victim, anchor, direction) {
                trace!("{} cache: {} is the least useful entry, dropped", self.name, key);
                return false;
            }
            excess = excess.saturating_sub(size);
            victims.push(victim);
        }
        self.remove(&key);
        for victim in &victims {
            self.evict(victim);
        }
        self.entries.insert(key, value);
        self.pool.add_memory(cost);
        true
    }

    fn evict(&mut self, key: &K) {
        if let Some(value) = self.entries.remove(key) {
            let size = value.cost();
            self.pool.free_memory(size);
            self.stats.record_eviction();
            debug!("{} cache: evicted {} ({} bytes)", self.name, key, size);
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.pool.free_memory(value.cost());
        Some(value)
    }

    /// New budget; evicts down to it.
    pub fn set_limit(&mut self, limit: usize, anchor: &K, direction: CacheDirection) {
        self.pool.set_limit(limit);
        while self.pool.check_memory_limit() {
            let Some(victim) = self.next_victim(anchor, direction) else { break };
            self.evict(&victim);
        }
    }

    pub fn clear(&mut self) {
        for (_, value) in std::mem::take(&mut self.entries) {
            self.pool.free_memory(value.cost());
        }
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.pool.usage()
    }

    pub fn limit(&self) -> usize {
        self.pool.limit()
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Blob(usize);

    impl CacheCost for Blob {
        fn cost(&self) -> usize {
            self.0
        }
    }

    fn cache(limit: usize) -> DirectionalCache<i64, Blob> {
        DirectionalCache::new("test", Arc::new(MemoryPool::new(limit)))
    }

    #[test]
    fn test_forward_evicts_farthest_behind_first() {
        let mut c = cache(40);
        // Inserted out of time order on purpose
        for key in [12, 3, 20, 7] {
            assert!(c.insert(key, Blob(10), &10, CacheDirection::Forward));
        }
        assert!(c.insert(11, Blob(10), &10, CacheDirection::Forward));
        assert!(!c.contains(&3));
        assert!(c.insert(13, Blob(10), &10, CacheDirection::Forward));
        assert!(!c.contains(&7));
        // Nothing left behind: farthest ahead goes
        assert!(c.insert(10, Blob(10), &10, CacheDirection::Forward));
        assert!(!c.contains(&20));
        assert_eq!(c.keys().copied().collect::<Vec<_>>(), vec![10, 11, 12, 13]);
        assert_eq!(c.stats().evictions(), 3);
    }

    #[test]
    fn test_reverse_is_mirrored() {
        let mut c = cache(30);
        for key in [4, 8, 15] {
            c.insert(key, Blob(10), &8, CacheDirection::Reverse);
        }
        assert!(c.insert(6, Blob(10), &8, CacheDirection::Reverse));
        assert!(!c.contains(&15));
        assert!(c.insert(7, Blob(10), &8, CacheDirection::Reverse));
        assert!(!c.contains(&4));
    }

    #[test]
    fn test_least_useful_new_entry_is_rejected() {
        let mut c = cache(20);
        c.insert(10, Blob(10), &10, CacheDirection::Forward);
        c.insert(11, Blob(10), &10, CacheDirection::Forward);
        // Behind the playhead with a full cache of useful entries
        assert!(!c.insert(2, Blob(10), &10, CacheDirection::Forward));
        assert_eq!(c.len(), 2);
        // Too big for the whole budget
        assert!(!c.insert(12, Blob(21), &10, CacheDirection::Forward));
    }

    #[test]
    fn test_rejected_insert_keeps_existing_entries() {
        let mut c = cache(30);
        for key in [5, 8, 20] {
            c.insert(key, Blob(10), &10, CacheDirection::Forward);
        }
        // 5 would go, then 7 itself is less useful than 8
        assert!(!c.insert(7, Blob(20), &10, CacheDirection::Forward));
        assert_eq!(c.keys().copied().collect::<Vec<_>>(), vec![5, 8, 20]);
        assert_eq!(c.bytes(), 30);
        assert_eq!(c.stats().evictions(), 0);

        // Rejected re-insert of a present key keeps the old value
        assert!(!c.insert(5, Blob(15), &10, CacheDirection::Forward));
        assert!(c.contains(&5));
        assert_eq!(c.bytes(), 30);

        // Replacing a key reuses its own space
        assert!(c.insert(20, Blob(10), &10, CacheDirection::Forward));
        assert_eq!(c.len(), 3);
        assert_eq!(c.stats().evictions(), 0);
    }

    #[test]
    fn test_budget_holds_after_every_insert() {
        let mut c = cache(100);
        let mut anchor = 0i64;
        for i in 0..500i64 {
            let key = (i * 37) % 101 - 20;
            let size = 5 + (i as usize * 13) % 30;
            let direction = if (i / 50) % 2 == 0 { CacheDirection::Forward } else { CacheDirection::Reverse };
            c.insert(key, Blob(size), &anchor, direction);
            assert!(c.bytes() <= 100, "usage {} after insert {}", c.bytes(), i);
            anchor = (anchor + 3) % 80;
        }
    }

    #[test]
    fn test_set_limit_and_clear_release_memory() {
        let mut c = cache(100);
        for key in 0..10 {
            c.insert(key, Blob(10), &5, CacheDirection::Forward);
        }
        c.set_limit(50, &5, CacheDirection::Forward);
        assert!(c.bytes() <= 50);
        assert!(c.contains(&5) && c.contains(&6));
        assert!(!c.contains(&0));

        assert!(c.get(&5).is_some());
        assert!(c.get(&0).is_none());
        assert_eq!(c.stats().hits(), 1);
        assert_eq!(c.stats().misses(), 1);

        c.clear();
        assert_eq!(c.bytes(), 0);
        assert!(c.is_empty());
    }
}
