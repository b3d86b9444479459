//! Fixed-capacity LRU cache
//!
//! The cache maintains:
//! - A `HashMap` from key to slot for O(1) lookups
//! - A doubly-linked list threaded through the slots for O(1) recency updates
//!
//! When the cache is full, the least recently used entry is evicted.

use std::collections::HashMap;

struct Node {
    key: String,
    value: String,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct LruCache {
    map: HashMap<String, usize>,
    nodes: Vec<Node>,
    /// Slots released by removals, reused before growing `nodes`
    free: Vec<usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    capacity: usize,
}

impl LruCache {
    /// A capacity of zero makes every `put` a no-op.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up a key, marking it most recently used.
    pub fn get(&mut self, key: &str) -> Option<String> {
        let slot = *self.map.get(key)?;
        self.touch(slot);
        Some(self.nodes[slot].value.clone())
    }

    /// Insert or update a key, evicting the least recently used entry if full.
    pub fn put(&mut self, key: String, value: String) {
        if self.capacity == 0 {
            return;
        }
        if let Some(&slot) = self.map.get(&key) {
            self.nodes[slot].value = value;
            self.touch(slot);
            return;
        }
        if self.map.len() >= self.capacity {
            self.evict_one();
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.map.insert(key, slot);
        self.push_front(slot);
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let slot = self.map.remove(key)?;
        self.unlink(slot);
        self.free.push(slot);
        Some(std::mem::take(&mut self.nodes[slot].value))
    }

    fn evict_one(&mut self) {
        if let Some(slot) = self.tail {
            let key = std::mem::take(&mut self.nodes[slot].key);
            self.map.remove(&key);
            self.unlink(slot);
            self.free.push(slot);
        }
    }

    fn touch(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn push_front(&mut self, slot: usize) {
        self.nodes[slot].prev = None;
        self.nodes[slot].next = self.head;
        if let Some(old_head) = self.head {
            self.nodes[old_head].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[slot].prev = None;
        self.nodes[slot].next = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        // a becomes most recent
        assert_eq!(cache.get("a"), Some("1".into()));
        cache.put("c".into(), "3".into());

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("1".into()));
        assert_eq!(cache.get("c"), Some("3".into()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_update_and_remove() {
        let mut cache = LruCache::new(2);
        cache.put("a".into(), "1".into());
        cache.put("a".into(), "2".into());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), Some("2".into()));

        assert_eq!(cache.remove("a"), Some("2".into()));
        assert_eq!(cache.remove("a"), None);
        assert!(cache.is_empty());

        // freed slot is reused
        cache.put("b".into(), "3".into());
        cache.put("c".into(), "4".into());
        cache.put("d".into(), "5".into());
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("d"), Some("5".into()));
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let mut cache = LruCache::new(0);
        cache.put("a".into(), "1".into());
        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
    }
}
