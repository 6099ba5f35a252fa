//! Bounded LRU of extraction results
//!
//! Entries are keyed by `(path, mtime)`: a modified file gets a new key, so a
//! lookup can never return a result for an older version of the file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use indexmap::IndexMap;

type Key = (PathBuf, SystemTime);

/// Least-recently-used entries sit at the front of the map.
#[derive(Debug)]
pub struct LruCache<V> {
    capacity: usize,
    entries: Mutex<IndexMap<Key, Arc<V>>>,
}

impl<V> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(IndexMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<Key, Arc<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, path: &Path, mtime: SystemTime) -> Option<Arc<V>> {
        let mut entries = self.lock();
        let key = (path.to_path_buf(), mtime);
        let value = entries.shift_remove(&key)?;
        entries.insert(key, value.clone());
        Some(value)
    }

    pub fn insert(&self, path: &Path, mtime: SystemTime, value: Arc<V>) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        let key = (path.to_path_buf(), mtime);
        entries.shift_remove(&key);
        while entries.len() >= self.capacity {
            entries.shift_remove_index(0);
        }
        entries.insert(key, value);
    }

    /// Drop every entry for `path`, whatever its mtime.
    pub fn invalidate_path(&self, path: &Path) {
        self.lock().retain(|(p, _), _| p != path);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
