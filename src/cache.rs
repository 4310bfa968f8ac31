use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, trace};

type Slot<V> = Arc<OnceLock<Arc<V>>>;

struct CacheState<K, V> {
    slots: HashMap<K, Slot<V>>,
    // insertion order, oldest first
    order: VecDeque<K>,
}

/// Bounded memo table for pure computations.
///
/// Each key owns a once-cell, so concurrent first requests for the same key
/// run the builder exactly once while the others block on that cell. Other
/// keys are not held up. When `capacity` is exceeded the oldest key is
/// evicted; callers still holding its value keep their `Arc`.
pub struct KeyedCache<K, V> {
    name: &'static str,
    capacity: usize,
    state: RwLock<CacheState<K, V>>,
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(name: &'static str, capacity: usize) -> KeyedCache<K, V> {
        KeyedCache {
            name,
            capacity: capacity.max(1),
            state: RwLock::new(CacheState {
                slots: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get_or_insert_with<F>(&self, key: K, build: F) -> Arc<V>
    where
        F: FnOnce() -> V,
    {
        let slot = self.slot(&key);
        if let Some(v) = slot.get() {
            trace!(cache = self.name, ?key, "hit");
            return Arc::clone(v);
        }

        Arc::clone(slot.get_or_init(|| {
            trace!(cache = self.name, ?key, "miss, building");
            Arc::new(build())
        }))
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.slots.get(key).and_then(|s| s.get().cloned())
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.slots.clear();
        state.order.clear();
    }

    fn slot(&self, key: &K) -> Slot<V> {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = state.slots.get(key) {
                return Arc::clone(slot);
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        // another thread may have inserted between the two locks
        if let Some(slot) = state.slots.get(key) {
            return Arc::clone(slot);
        }

        while state.order.len() >= self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    debug!(cache = self.name, key = ?oldest, "evicting");
                    state.slots.remove(&oldest);
                }
                None => break,
            }
        }

        let slot: Slot<V> = Arc::new(OnceLock::new());
        state.slots.insert(key.clone(), Arc::clone(&slot));
        state.order.push_back(key.clone());
        slot
    }
}
