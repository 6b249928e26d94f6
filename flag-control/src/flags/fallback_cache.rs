use dashmap::DashMap;
use std::sync::Arc;

/// Last confirmed activation state per store key.
///
/// Only written after a successful store operation and only read while the store
/// is unreachable. Entries never expire; a fresh process starts empty. Clones share
/// the same entries.
#[derive(Debug, Clone, Default)]
pub struct FallbackCache {
    entries: Arc<DashMap<String, bool>>,
}

impl FallbackCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    pub fn set(&self, key: &str, active: bool) {
        self.entries.insert(key.to_string(), active);
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Snapshot of every entry whose key starts with `prefix`.
    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<(String, bool)> {
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
