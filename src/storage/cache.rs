use std::collections::{HashMap, VecDeque};

/// Bounded in-memory map that evicts the oldest *inserted* key when full.
///
/// Reads do not refresh an entry's position and overwriting an existing key
/// keeps its original slot, so this is FIFO eviction rather than LRU.
#[derive(Debug)]
pub(crate) struct FifoCache<V> {
    max_items: usize,
    order: VecDeque<String>,
    entries: HashMap<String, V>,
}

impl<V: Clone> FifoCache<V> {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items,
            order: VecDeque::with_capacity(max_items.min(1024)),
            entries: HashMap::with_capacity(max_items.min(1024)),
        }
    }

    /// Insert or overwrite. Returns the key evicted to make room, if any.
    pub fn insert(&mut self, key: &str, value: V) -> Option<String> {
        if self.max_items == 0 {
            return None;
        }
        if let Some(slot) = self.entries.get_mut(key) {
            *slot = value;
            return None;
        }

        let evicted = if self.entries.len() >= self.max_items {
            self.order.pop_front().inspect(|oldest| {
                self.entries.remove(oldest);
            })
        } else {
            None
        };

        self.order.push_back(key.to_string());
        self.entries.insert(key.to_string(), value);
        evicted
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
