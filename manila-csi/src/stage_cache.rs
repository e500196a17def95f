//! Per-volume cache of node staging results.
//!
//! NodeStageVolume computes the downstream volume context and secrets once
//! and stores them here; NodePublishVolume reads them back instead of asking
//! the backend again.  NodeUnstageVolume drops the entry.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::adapters::Secrets;

/// What a node needs to stage and publish one volume downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageCacheEntry {
    pub volume_context: HashMap<String, String>,
    pub stage_secret: Secrets,
    pub publish_secret: Secrets,
}

#[derive(Debug, Default)]
pub struct StageCache {
    entries: RwLock<HashMap<String, StageCacheEntry>>,
}

impl StageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, volume_id: &str) -> Option<StageCacheEntry> {
        self.entries.read().get(volume_id).cloned()
    }

    /// Store `entry` unless one is already cached, and return the cached one.
    pub fn insert_if_absent(&self, volume_id: &str, entry: StageCacheEntry) -> StageCacheEntry {
        self.entries
            .write()
            .entry(volume_id.to_owned())
            .or_insert(entry)
            .clone()
    }

    pub fn remove(&self, volume_id: &str) -> Option<StageCacheEntry> {
        self.entries.write().remove(volume_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(server: &str) -> StageCacheEntry {
        StageCacheEntry {
            volume_context: HashMap::from([("server".to_owned(), server.to_owned())]),
            ..Default::default()
        }
    }

    #[test]
    fn first_insert_wins() {
        let cache = StageCache::new();
        let stored = cache.insert_if_absent("vol-1", entry("10.0.0.1"));
        assert_eq!(stored.volume_context["server"], "10.0.0.1");
        let stored = cache.insert_if_absent("vol-1", entry("10.0.0.2"));
        assert_eq!(stored.volume_context["server"], "10.0.0.1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_invalidates() {
        let cache = StageCache::new();
        cache.insert_if_absent("vol-1", entry("10.0.0.1"));
        assert!(cache.get("vol-1").is_some());
        assert!(cache.remove("vol-1").is_some());
        assert!(cache.get("vol-1").is_none());
        assert!(cache.remove("vol-1").is_none());
        assert!(cache.is_empty());
    }
}
