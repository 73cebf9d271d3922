// ── Reactive snapshot cache ──
//
// Concurrent storage keyed by device with push-based change notification
// via a `watch` channel. Readers never block the fetch cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{DeviceId, DeviceSnapshot};

/// Last successful snapshot per device.
///
/// Only the fetch cycle writes; everyone else reads `get`/`snapshot` or
/// subscribes. Every mutation rebuilds the id-ordered snapshot vector
/// subscribers receive.
pub struct SnapshotCache {
    by_id: DashMap<DeviceId, Arc<DeviceSnapshot>>,
    snapshot: watch::Sender<Arc<Vec<Arc<DeviceSnapshot>>>>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_id: DashMap::new(),
            snapshot,
        }
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<DeviceSnapshot>> {
        self.by_id.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// Insert or replace one snapshot. Returns `true` if the device was new.
    pub fn put(&self, snapshot: Arc<DeviceSnapshot>) -> bool {
        let is_new = self.by_id.insert(snapshot.id, snapshot).is_none();
        self.rebuild_snapshot();
        is_new
    }

    /// Make the cache hold exactly `snapshots`: upsert all, prune the rest.
    pub(crate) fn replace_all(&self, snapshots: &BTreeMap<DeviceId, Arc<DeviceSnapshot>>) {
        for (id, snap) in snapshots {
            self.by_id.insert(*id, Arc::clone(snap));
        }
        self.by_id.retain(|id, _| snapshots.contains_key(id));
        self.rebuild_snapshot();
    }

    /// All snapshots ordered by device id (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<DeviceSnapshot>>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<DeviceSnapshot>>>> {
        self.snapshot.subscribe()
    }

    /// Owned copy keyed by id, as persisted.
    pub fn to_map(&self) -> BTreeMap<DeviceId, Arc<DeviceSnapshot>> {
        self.snapshot()
            .iter()
            .map(|snap| (snap.id, Arc::clone(snap)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<DeviceSnapshot>> =
            self.by_id.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by_key(|snap| snap.id);
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::model::Attributes;

    fn snap(id: i64, name: &str) -> Arc<DeviceSnapshot> {
        Arc::new(DeviceSnapshot {
            id: DeviceId(id),
            name: name.into(),
            status: None,
            position: None,
            geofence: None,
            attributes: Attributes::new(),
            captured_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        })
    }

    #[test]
    fn put_returns_true_for_new_device() {
        let cache = SnapshotCache::new();
        assert!(cache.put(snap(1, "a")));
        assert!(!cache.put(snap(1, "b")));
        assert_eq!(cache.get(DeviceId(1)).unwrap().name, "b");
    }

    #[test]
    fn replace_all_prunes_missing_devices() {
        let cache = SnapshotCache::new();
        cache.put(snap(1, "a"));
        cache.put(snap(2, "b"));

        let next: BTreeMap<_, _> = [(DeviceId(2), snap(2, "b2")), (DeviceId(3), snap(3, "c"))]
            .into_iter()
            .collect();
        cache.replace_all(&next);

        assert!(cache.get(DeviceId(1)).is_none());
        assert_eq!(cache.get(DeviceId(2)).unwrap().name, "b2");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let cache = SnapshotCache::new();
        cache.put(snap(9, "z"));
        cache.put(snap(3, "c"));
        cache.put(snap(5, "e"));
        let ids: Vec<i64> = cache.snapshot().iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![3, 5, 9]);
    }

    #[test]
    fn subscribers_see_updates() {
        let cache = SnapshotCache::new();
        let mut rx = cache.subscribe();
        cache.put(snap(1, "a"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);
    }
}
