//! In-memory cache of the synchronized collection
//!
//! Written only by the sync task; read by any number of consumers. Readers
//! copy `Arc` handles out under the read lock, so a snapshot never contains a
//! half-applied upsert and never holds the lock while the caller works.

use informer_core::prelude::*;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Uid-keyed object store
#[derive(Debug, Default)]
pub struct CacheStore {
    objects: RwLock<HashMap<Uid, Arc<RawObject>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the object for `uid`
    pub fn upsert(&self, uid: Uid, object: RawObject) {
        self.objects.write().insert(uid, Arc::new(object));
    }

    /// Remove the object for `uid`, if present
    pub fn evict(&self, uid: &Uid) -> Option<Arc<RawObject>> {
        self.objects.write().remove(uid)
    }

    /// Current values, in no particular order
    pub fn snapshot(&self) -> Vec<Arc<RawObject>> {
        self.objects.read().values().cloned().collect()
    }

    pub fn get(&self, uid: &Uid) -> Option<Arc<RawObject>> {
        self.objects.read().get(uid).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Evict every object whose uid is not in `keep`; returns the number evicted
    pub fn retain_only(&self, keep: &HashSet<Uid>) -> usize {
        let mut objects = self.objects.write();
        let before = objects.len();
        objects.retain(|uid, _| keep.contains(uid));
        before - objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(uid: &str, version: u64) -> RawObject {
        json!({"metadata": {"uid": uid}, "v": version})
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let once = CacheStore::new();
        once.upsert(Uid::new("a"), pod("a", 1));

        let twice = CacheStore::new();
        twice.upsert(Uid::new("a"), pod("a", 1));
        twice.upsert(Uid::new("a"), pod("a", 1));

        assert_eq!(once.len(), 1);
        assert_eq!(twice.len(), 1);
        assert_eq!(once.get(&Uid::new("a")), twice.get(&Uid::new("a")));
    }

    #[test]
    fn test_last_write_wins() {
        let store = CacheStore::new();
        store.upsert(Uid::new("a"), pod("a", 1));
        store.upsert(Uid::new("a"), pod("a", 2));

        assert_eq!(*store.get(&Uid::new("a")).unwrap(), pod("a", 2));
    }

    #[test]
    fn test_evict_missing_is_noop() {
        let store = CacheStore::new();
        store.upsert(Uid::new("a"), pod("a", 1));

        assert!(store.evict(&Uid::new("zzz")).is_none());
        assert_eq!(store.len(), 1);

        assert!(store.evict(&Uid::new("a")).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = CacheStore::new();
        store.upsert(Uid::new("a"), pod("a", 1));
        let snapshot = store.snapshot();

        store.upsert(Uid::new("b"), pod("b", 1));
        store.evict(&Uid::new("a"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(*snapshot[0], pod("a", 1));
    }

    #[test]
    fn test_retain_only() {
        let store = CacheStore::new();
        for uid in ["a", "b", "c"] {
            store.upsert(Uid::new(uid), pod(uid, 1));
        }
        let keep: HashSet<Uid> = [Uid::new("a"), Uid::new("c")].into_iter().collect();

        assert_eq!(store.retain_only(&keep), 1);
        assert!(store.get(&Uid::new("b")).is_none());
        assert_eq!(store.len(), 2);
    }
}
