//! A Least Recently Used (LRU) cache.
//!
//! `LruCache<K, V, MAX_SIZE>` stores up to `MAX_SIZE` key-value pairs,
//! evicting the least recently used entry when capacity is exceeded. Used
//! for both the metadata block cache ([`crate::gxfs`]) and the file-tree
//! page cache ([`crate::filetree`]).
//!
//! # Example
//! ```
//! use gxvfs::lru::LruCache;
//! let mut cache: LruCache<i32, String, 2> = LruCache::new();
//! cache.put(1, "one".to_string());
//! cache.put(2, "two".to_string());
//! assert_eq!(cache.get(1).map(|v| v.as_str()), Some("one"));
//! cache.put(3, "three".to_string());
//! assert!(cache.get(2).is_none());
//! assert!(cache.get(1).is_some());
//! assert!(cache.get(3).is_some());
//! ```
use std::collections::BTreeMap;

struct Node<K: Clone, V> {
    v: V,
    prev: Option<K>,
    next: Option<K>,
}

/// A Least Recently Used cache with capacity `MAX_SIZE`.
pub struct LruCache<K: Ord + Clone, V, const MAX_SIZE: usize> {
    inner: BTreeMap<K, Node<K, V>>,
    head: Option<K>,
    tail: Option<K>,
}

impl<K: Ord + Clone, V, const MAX_SIZE: usize> Default for LruCache<K, V, MAX_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V, const MAX_SIZE: usize> LruCache<K, V, MAX_SIZE> {
    fn attach(&mut self, k: K) -> &mut Node<K, V> {
        if let Some(tail) = self.tail.take() {
            let last = self.inner.get_mut(&tail).unwrap();
            last.next = Some(k.clone());
        } else {
            self.head = Some(k.clone());
        }
        let ptail = self.tail.clone();
        self.tail = Some(k.clone());

        let node = self.inner.get_mut(&k).unwrap();
        node.prev = ptail;
        node
    }

    fn detach(&mut self, prev: Option<K>, next: Option<K>) {
        if let Some(next) = next.as_ref() {
            self.inner.get_mut(next).unwrap().prev = prev.clone();
        } else {
            self.tail = prev.clone();
        }
        if let Some(prev) = prev {
            self.inner.get_mut(&prev).unwrap().next = next;
        } else {
            self.head = next;
        }
    }

    /// Makes a new, empty `LruCache`. Does not allocate anything on its own.
    pub const fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns a mutable reference to the value for `k`, marking it most
    /// recently used.
    pub fn get(&mut self, k: K) -> Option<&mut V> {
        let node = self.inner.get_mut(&k)?;
        let (prev, next) = (node.prev.take(), node.next.take());
        self.detach(prev, next);
        Some(&mut self.attach(k).v)
    }

    /// Returns the value for `k`, computing and inserting it with `f` if
    /// absent.
    pub fn get_or_insert_with<E>(
        &mut self,
        k: K,
        f: impl FnOnce() -> std::result::Result<V, E>,
    ) -> std::result::Result<&mut V, E> {
        Ok(if let Some(node) = self.inner.get_mut(&k) {
            let (prev, next) = (node.prev.take(), node.next.take());
            self.detach(prev, next);
            &mut self.attach(k).v
        } else {
            &mut self.put_inner(k, f()?).v
        })
    }

    fn put_inner(&mut self, k: K, v: V) -> &mut Node<K, V> {
        if let Some(node) = self.inner.get_mut(&k) {
            node.v = v;
            let (prev, next) = (node.prev.take(), node.next.take());
            self.detach(prev, next);
        } else {
            if MAX_SIZE <= self.inner.len() {
                self.remove(&self.head.clone().unwrap());
            }
            let node = Node {
                v,
                prev: self.tail.clone(),
                next: None,
            };
            self.inner.insert(k.clone(), node);
        }
        self.attach(k)
    }

    /// Inserts a key-value pair, evicting the least recently used entry if
    /// the cache is at capacity.
    pub fn put(&mut self, k: K, v: V) {
        self.put_inner(k, v);
    }

    /// Removes `k`, returning its value if present.
    pub fn remove(&mut self, k: &K) -> Option<V> {
        let mut node = self.inner.remove(k)?;
        self.detach(node.prev.take(), node.next.take());
        Some(node.v)
    }

    /// Removes every entry for which `f(&k, &mut v)` returns `false`.
    pub fn retain(&mut self, mut f: impl FnMut(&K, &mut V) -> bool) {
        let targets: Vec<K> = self
            .inner
            .iter_mut()
            .filter_map(|(k, v)| if !f(k, &mut v.v) { Some(k.clone()) } else { None })
            .collect();
        for target in targets {
            self.remove(&target);
        }
    }

    /// Iterates over the key-value pairs without affecting recency order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.inner.iter_mut().map(|(k, v)| (k, &mut v.v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache: LruCache<i32, &'static str, 2> = LruCache::new();
        cache.put(1, "one");
        cache.put(2, "two");
        assert_eq!(cache.get(1), Some(&mut "one"));
        cache.put(3, "three");
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn retain_drops_matching_entries() {
        let mut cache: LruCache<i32, i32, 8> = LruCache::new();
        for i in 0..5 {
            cache.put(i, i * 10);
        }
        cache.retain(|k, _| *k % 2 == 0);
        assert_eq!(cache.len(), 3);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
    }
}
