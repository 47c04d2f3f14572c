//! Bounded LRU cache for materialized nodes and data pages.
//!
//! The cache maps page ids to owned objects. Overflow evicts a batch of the
//! least recently used entries (the purge unit) rather than a single one, so
//! write-back cost is amortized under heavy insert load.
//!
//! # Design
//!
//! - `HashMap<PageId, Slot>` with an intrusive doubly-linked recency list
//! - Two-phase eviction: victims are unlinked while the cache lock is held,
//!   then handed back to the caller, which performs any write-back I/O after
//!   the lock is released
//! - Objects are checked out with `take` and returned with `put`, so a node is
//!   never mutated while it is still reachable by eviction
//!
//! # Invariants
//!
//! - `len() <= capacity()` after every `put` returns
//! - `1 <= purge_unit() <= capacity()`
//! - Evicted batches are sorted by `Cacheable::write_order`

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::config::{ConfigError, check_cache};
use crate::storage::page::PageId;

/// Objects that can live in a `NodeCache`.
pub trait Cacheable {
    /// Whether the object has changes that are not on disk yet.
    fn is_dirty(&self) -> bool;

    /// Sort key used to order write-back of an evicted batch.
    fn write_order(&self) -> u64;
}

struct Slot<V> {
    value: V,
    prev: Option<PageId>,
    next: Option<PageId>,
}

struct LruState<V> {
    map: HashMap<PageId, Slot<V>>,
    /// Most recently used.
    head: Option<PageId>,
    /// Least recently used.
    tail: Option<PageId>,
    capacity: usize,
    purge_unit: usize,
    default_purge_unit: usize,
}

impl<V> LruState<V> {
    fn unlink(&mut self, id: PageId) -> Option<V> {
        let slot = self.map.remove(&id)?;
        match slot.prev {
            Some(prev) => {
                if let Some(p) = self.map.get_mut(&prev) {
                    p.next = slot.next;
                }
            }
            None => self.head = slot.next,
        }
        match slot.next {
            Some(next) => {
                if let Some(n) = self.map.get_mut(&next) {
                    n.prev = slot.prev;
                }
            }
            None => self.tail = slot.prev,
        }
        Some(slot.value)
    }

    fn push_front(&mut self, id: PageId, value: V) {
        let old_head = self.head;
        self.map.insert(
            id,
            Slot {
                value,
                prev: None,
                next: old_head,
            },
        );
        if let Some(h) = old_head
            && let Some(he) = self.map.get_mut(&h)
        {
            he.prev = Some(id);
        }
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
    }

    fn touch(&mut self, id: PageId) {
        if self.head == Some(id) {
            return;
        }
        if let Some(value) = self.unlink(id) {
            self.push_front(id, value);
        }
    }

    fn pop_lru(&mut self, count: usize) -> Vec<V> {
        let mut victims = Vec::with_capacity(count);
        while victims.len() < count {
            let Some(tail) = self.tail else { break };
            if let Some(value) = self.unlink(tail) {
                victims.push(value);
            }
        }
        victims
    }

    fn clear(&mut self) -> Vec<V> {
        self.head = None;
        self.tail = None;
        self.map.drain().map(|(_, slot)| slot.value).collect()
    }
}

/// A fixed-capacity LRU cache keyed by page id.
pub struct NodeCache<V> {
    state: Mutex<LruState<V>>,
}

impl<V: Cacheable> NodeCache<V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// # Errors
    /// Returns an error if `capacity` is zero or `purge_unit` is not in
    /// `1..=capacity`.
    pub fn new(capacity: usize, purge_unit: usize) -> Result<Self, ConfigError> {
        check_cache("node_cache", capacity, purge_unit)?;
        Ok(Self {
            state: Mutex::new(LruState {
                map: HashMap::with_capacity(capacity.min(1024)),
                head: None,
                tail: None,
                capacity,
                purge_unit,
                default_purge_unit: purge_unit,
            }),
        })
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn state(&self) -> MutexGuard<'_, LruState<V>> {
        self.state.lock().expect("lock poisoned")
    }

    /// Check an entry out of the cache.
    ///
    /// The caller owns the object until it hands it back with `put`.
    pub fn take(&self, id: PageId) -> Option<V> {
        self.state().unlink(id)
    }

    /// Whether `id` is currently cached.
    pub fn contains(&self, id: PageId) -> bool {
        self.state().map.contains_key(&id)
    }

    /// Clone of a cached entry, marking it most recently used.
    pub fn get_cloned(&self, id: PageId) -> Option<V>
    where
        V: Clone,
    {
        let mut state = self.state();
        state.touch(id);
        state.map.get(&id).map(|slot| slot.value.clone())
    }

    /// Insert or replace an entry as most recently used.
    ///
    /// If the cache overflows, the `purge_unit` least recently used entries
    /// are removed and returned sorted by write order. The caller must write
    /// back the dirty ones.
    pub fn put(&self, id: PageId, value: V) -> Vec<V> {
        let mut state = self.state();
        state.unlink(id);
        state.push_front(id, value);
        if state.map.len() <= state.capacity {
            return Vec::new();
        }
        let excess = state.map.len() - state.capacity;
        let count = state.purge_unit.max(excess);
        let mut victims = state.pop_lru(count);
        drop(state);

        victims.sort_by_key(Cacheable::write_order);
        tracing::debug!(evicted = victims.len(), "node cache purge");
        victims
    }

    /// Remove every entry, sorted by write order.
    pub fn purge_all(&self) -> Vec<V> {
        let mut victims = self.state().clear();
        victims.sort_by_key(Cacheable::write_order);
        victims
    }

    /// Remove only the dirty entries, sorted by write order.
    ///
    /// Used by flush without clear: the caller writes them and puts them back.
    pub fn take_dirty(&self) -> Vec<(PageId, V)> {
        let mut state = self.state();
        let ids: Vec<PageId> = state
            .map
            .iter()
            .filter(|(_, slot)| slot.value.is_dirty())
            .map(|(id, _)| *id)
            .collect();
        let mut dirty: Vec<(PageId, V)> = ids
            .into_iter()
            .filter_map(|id| state.unlink(id).map(|v| (id, v)))
            .collect();
        drop(state);
        dirty.sort_by_key(|(_, v)| v.write_order());
        dirty
    }

    /// Widen or restore the purge unit for bulk loading.
    ///
    /// When enabled, `percentage` of the capacity is evicted per overflow.
    ///
    /// # Errors
    /// Returns an error if `percentage` is not in `(0, 1]`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn set_bulk_loading(&self, enabled: bool, percentage: f32) -> Result<(), ConfigError> {
        if !(percentage > 0.0 && percentage <= 1.0) {
            return Err(ConfigError::invalid(
                "bulk_loading_percentage",
                format!("{percentage} must be in (0, 1]"),
            ));
        }
        let mut state = self.state();
        state.purge_unit = if enabled {
            ((state.capacity as f32 * percentage) as usize).clamp(1, state.capacity)
        } else {
            state.default_purge_unit
        };
        tracing::info!(enabled, purge_unit = state.purge_unit, "bulk loading toggled");
        Ok(())
    }

    /// Current purge unit.
    pub fn purge_unit(&self) -> usize {
        self.state().purge_unit
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.state().capacity
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.state().map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.state().map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Entry {
        id: PageId,
        dirty: bool,
    }

    impl Cacheable for Entry {
        fn is_dirty(&self) -> bool {
            self.dirty
        }

        fn write_order(&self) -> u64 {
            self.id
        }
    }

    fn entry(id: PageId, dirty: bool) -> Entry {
        Entry { id, dirty }
    }

    #[test]
    fn test_rejects_invalid_purge_unit() {
        assert!(NodeCache::<Entry>::new(4, 0).is_err());
        assert!(NodeCache::<Entry>::new(4, 5).is_err());
        assert!(NodeCache::<Entry>::new(0, 0).is_err());
        assert!(NodeCache::<Entry>::new(4, 4).is_ok());
    }

    #[test]
    fn test_evicts_purge_unit_oldest_sorted() {
        let cache = NodeCache::new(4, 2).expect("cache");
        // Insert in descending id order so LRU order differs from write order.
        for id in [9, 7, 5, 3] {
            assert!(cache.put(id, entry(id, true)).is_empty());
        }
        let victims = cache.put(1, entry(1, false));
        let ids: Vec<PageId> = victims.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![7, 9]);
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(1));
        assert!(!cache.contains(9));
    }

    #[test]
    fn test_take_and_get_refresh_recency() {
        let cache = NodeCache::new(3, 1).expect("cache");
        cache.put(1, entry(1, false));
        cache.put(2, entry(2, false));
        cache.put(3, entry(3, false));

        // Touch 1 so 2 becomes least recently used.
        assert_eq!(cache.get_cloned(1), Some(entry(1, false)));
        let victims = cache.put(4, entry(4, false));
        assert_eq!(victims, vec![entry(2, false)]);

        // A taken entry is no longer cached.
        let taken = cache.take(3).expect("cached");
        assert_eq!(taken.id, 3);
        assert!(!cache.contains(3));
        assert!(cache.take(3).is_none());
    }

    #[test]
    fn test_put_replaces_existing() {
        let cache = NodeCache::new(2, 1).expect("cache");
        cache.put(1, entry(1, false));
        cache.put(1, entry(1, true));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.take(1), Some(entry(1, true)));
    }

    #[test]
    fn test_purge_all_sorted_and_empty() {
        let cache = NodeCache::new(8, 2).expect("cache");
        for id in [4, 2, 8, 6] {
            cache.put(id, entry(id, id % 4 == 0));
        }
        let all: Vec<PageId> = cache.purge_all().iter().map(|e| e.id).collect();
        assert_eq!(all, vec![2, 4, 6, 8]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_take_dirty_leaves_clean_entries() {
        let cache = NodeCache::new(8, 2).expect("cache");
        cache.put(3, entry(3, true));
        cache.put(1, entry(1, false));
        cache.put(2, entry(2, true));

        let dirty: Vec<PageId> = cache.take_dirty().iter().map(|(id, _)| *id).collect();
        assert_eq!(dirty, vec![2, 3]);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(1));
    }

    #[test]
    fn test_bulk_loading_widens_purge_unit() {
        let cache = NodeCache::<Entry>::new(100, 8).expect("cache");
        cache.set_bulk_loading(true, 0.5).expect("valid percentage");
        assert_eq!(cache.purge_unit(), 50);
        cache.set_bulk_loading(false, 1.0).expect("valid percentage");
        assert_eq!(cache.purge_unit(), 8);
    }

    #[test]
    fn test_bulk_loading_rejects_bad_percentage() {
        let cache = NodeCache::<Entry>::new(100, 8).expect("cache");
        assert!(cache.set_bulk_loading(true, 0.0).is_err());
        assert!(cache.set_bulk_loading(true, 1.5).is_err());
        assert!(cache.set_bulk_loading(true, f32::NAN).is_err());
        assert_eq!(cache.purge_unit(), 8);
    }
}
