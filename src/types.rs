use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, RwLock},
};

use crate::{error::IndexError, utils::HandyRwLock};

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub type ResultPod<T> = Result<Pod<T>, IndexError>;
pub type IndexResult = Result<(), IndexError>;

/// A hash map that can be read and written from multiple threads, used as
/// the frame table of the buffer pool. The inner lock is only held for the
/// duration of a single map operation, never across I/O.
pub struct ConcurrentHashMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ConcurrentHashMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.rl().get(key).cloned()
    }

    /// Return the value for `key`, calling `init` to produce it on a miss.
    ///
    /// `init` runs without the inner lock held, so a concurrent caller may
    /// race it; the first insertion wins and the loser's value is dropped.
    pub fn get_or_insert<F>(&self, key: &K, init: F) -> Result<V, IndexError>
    where
        F: FnOnce(&K) -> Result<V, IndexError>,
    {
        {
            let inner = self.inner.rl();
            if let Some(v) = inner.get(key) {
                return Ok(v.clone());
            }
        }

        let v = init(key)?;

        let mut inner = self.inner.wl();
        Ok(inner.entry(key.clone()).or_insert(v).clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.wl().insert(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.wl().remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.rl().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.rl().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.rl().len()
    }

    pub fn clear(&self) {
        self.inner.wl().clear();
    }
}
