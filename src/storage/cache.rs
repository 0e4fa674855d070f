//! Short-lived cache of whole-window snapshots.
//!
//! Entries are keyed by the exact window requested and never outlive the TTL,
//! so a cached read is at most `ttl` older than a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::LogSnapshot;
use crate::logs::TimeWindow;

struct Entry {
    fetched_at: Instant,
    snapshot: Arc<LogSnapshot>,
}

#[derive(Clone)]
pub struct SnapshotCache {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<TimeWindow, Entry>>>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn get(&self, window: &TimeWindow) -> Option<Arc<LogSnapshot>> {
        if !self.is_enabled() {
            return None;
        }
        let mut entries = self.entries.lock();
        match entries.get(window) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => Some(entry.snapshot.clone()),
            Some(_) => {
                entries.remove(window);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, window: TimeWindow, snapshot: Arc<LogSnapshot>) {
        if !self.is_enabled() {
            return;
        }
        let ttl = self.ttl;
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.fetched_at.elapsed() < ttl);
        entries.insert(
            window,
            Entry {
                fetched_at: Instant::now(),
                snapshot,
            },
        );
    }

    pub fn invalidate(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 4, 13, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 4, 14, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = SnapshotCache::new(Duration::from_secs(60));
        let snap = Arc::new(LogSnapshot::empty(window()));
        cache.insert(window(), snap.clone());
        let hit = cache.get(&window()).expect("cached snapshot");
        assert!(Arc::ptr_eq(&hit, &snap));
    }

    #[test]
    fn test_expired_entries_are_not_served() {
        let cache = SnapshotCache::new(Duration::from_millis(20));
        cache.insert(window(), Arc::new(LogSnapshot::empty(window())));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&window()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = SnapshotCache::new(Duration::ZERO);
        cache.insert(window(), Arc::new(LogSnapshot::empty(window())));
        assert!(cache.get(&window()).is_none());
        assert_eq!(cache.len(), 0);
    }
}
