//! Bounded in-memory history store.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::models::HistoryRecord;

struct Inner {
    records: VecDeque<HistoryRecord>,
    max_points: usize,
}

impl Inner {
    fn trim(&mut self) {
        while self.records.len() > self.max_points {
            self.records.pop_front();
        }
    }
}

/// Thread-safe bounded FIFO of history records.
///
/// Clones share the same buffer. Appends go to the tail and evict from the
/// head; readers only ever see copies.
#[derive(Clone)]
pub struct LatencyHistoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl LatencyHistoryStore {
    /// Create an empty store holding at most `max_points` records.
    pub fn new(max_points: usize) -> Self {
        let max_points = max_points.max(1);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                records: VecDeque::with_capacity(max_points),
                max_points,
            })),
        }
    }

    /// Append a record, evicting the oldest while over capacity.
    pub fn append(&self, record: HistoryRecord) {
        let mut inner = self.inner.lock();
        if let Some(last) = inner.records.back() {
            if record.timestamp < last.timestamp {
                tracing::warn!(
                    "History record at {} is older than the tail ({}), appending anyway",
                    record.timestamp,
                    last.timestamp
                );
            }
        }
        inner.records.push_back(record);
        inner.trim();
    }

    /// Copy of all records, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryRecord> {
        self.inner.lock().records.iter().cloned().collect()
    }

    /// The newest record.
    pub fn latest(&self) -> Option<HistoryRecord> {
        self.inner.lock().records.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().max_points
    }

    /// Change the capacity, dropping the oldest records if it shrank.
    pub fn resize(&self, max_points: usize) {
        let mut inner = self.inner.lock();
        inner.max_points = max_points.max(1);
        inner.trim();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::collections::BTreeMap;

    fn record(seq: i64) -> HistoryRecord {
        let mut values = BTreeMap::new();
        values.insert("X".to_string(), Some(seq as u64));
        HistoryRecord {
            timestamp: Utc::now() + ChronoDuration::seconds(seq),
            values,
        }
    }

    #[test]
    fn test_store_keeps_last_n() {
        for (n, m) in [(1usize, 5i64), (3, 10), (10, 11), (30, 100)] {
            let store = LatencyHistoryStore::new(n);
            let appended: Vec<HistoryRecord> = (0..m).map(record).collect();
            for r in &appended {
                store.append(r.clone());
            }

            let snapshot = store.snapshot();
            assert_eq!(snapshot.len(), n);
            assert_eq!(snapshot, appended[appended.len() - n..].to_vec());
        }
    }

    #[test]
    fn test_store_under_capacity() {
        let store = LatencyHistoryStore::new(10);
        assert!(store.is_empty());
        store.append(record(0));
        store.append(record(1));
        assert_eq!(store.len(), 2);
        assert_eq!(store.latest().unwrap().values["X"], Some(1));
    }

    #[test]
    fn test_snapshot_is_independent() {
        let store = LatencyHistoryStore::new(5);
        store.append(record(0));
        let snapshot = store.snapshot();
        store.append(record(1));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_resize_trims_head() {
        let store = LatencyHistoryStore::new(5);
        for i in 0..5 {
            store.append(record(i));
        }
        store.resize(2);
        assert_eq!(store.capacity(), 2);
        let values: Vec<Option<u64>> = store.snapshot().iter().map(|r| r.values["X"]).collect();
        assert_eq!(values, vec![Some(3), Some(4)]);

        store.resize(0);
        assert_eq!(store.capacity(), 1);
    }

    #[test]
    fn test_concurrent_reader_sees_whole_records() {
        let store = LatencyHistoryStore::new(50);
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    store.append(record(i));
                }
            })
        };
        for _ in 0..100 {
            let snapshot = store.snapshot();
            assert!(snapshot.len() <= 50);
            assert!(snapshot.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        }
        writer.join().unwrap();
        assert_eq!(store.len(), 50);
    }
}
