//! The bounded in memory store for observability event records

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use gantry::models::EventRecord;

/// A bounded ring of event records
///
/// Overflow drops the oldest record and counts it as lost. Collecting
/// atomically snapshots and clears the ring so the bound always holds.
pub struct EventStore {
    /// The stored event records oldest first
    records: Mutex<VecDeque<EventRecord>>,
    /// The most records the store retains at once
    capacity: usize,
    /// How many records were dropped due to overflow
    lost: AtomicU64,
    /// Whether event tracking is enabled at all
    tracking: AtomicBool,
}

impl EventStore {
    /// Create a new event store
    ///
    /// # Arguments
    ///
    /// * `capacity` - The most records to retain at once
    /// * `tracking` - Whether event tracking starts enabled
    #[must_use]
    pub fn new(capacity: usize, tracking: bool) -> Self {
        EventStore {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            lost: AtomicU64::new(0),
            tracking: AtomicBool::new(tracking),
        }
    }

    /// Check if event tracking is enabled
    #[must_use]
    pub fn is_event_tracking_enabled(&self) -> bool {
        self.tracking.load(Ordering::Relaxed)
    }

    /// Enable or disable event tracking
    ///
    /// # Arguments
    ///
    /// * `enabled` - Whether tracking should be enabled
    pub fn set_event_tracking_enabled(&self, enabled: bool) {
        self.tracking.store(enabled, Ordering::Relaxed);
    }

    /// Store an event record dropping the oldest on overflow
    ///
    /// # Arguments
    ///
    /// * `record` - The event record to store
    pub fn store(&self, record: EventRecord) {
        let mut records = self.records.lock();
        // drop the oldest record if we are at capacity
        if records.len() >= self.capacity {
            records.pop_front();
            self.lost.fetch_add(1, Ordering::Relaxed);
        }
        records.push_back(record);
    }

    /// Atomically snapshot and clear the stored records
    #[must_use]
    pub fn collect_events(&self) -> Vec<EventRecord> {
        let mut records = self.records.lock();
        records.drain(..).collect()
    }

    /// Count the records currently stored
    #[must_use]
    pub fn count_stored_events(&self) -> usize {
        self.records.lock().len()
    }

    /// How many records were dropped due to overflow so far
    #[must_use]
    pub fn lost_events(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry::models::events::{EventChangeDetail, EventChangeType, EventRecordType};

    /// Build a throwaway event record for tests
    fn generate_record(id: usize) -> EventRecord {
        EventRecord::new(
            EventRecordType::App,
            format!("app-{id}"),
            "",
            "",
            EventChangeType::Add,
            EventChangeDetail::AppNew,
            None,
            "New",
        )
    }

    #[test]
    fn stores_and_collects() {
        let store = EventStore::new(10, true);
        store.store(generate_record(1));
        store.store(generate_record(2));
        assert_eq!(store.count_stored_events(), 2);
        let collected = store.collect_events();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].object_id, "app-1");
        // the collect cleared the ring
        assert_eq!(store.count_stored_events(), 0);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let store = EventStore::new(3, true);
        for id in 0..5 {
            store.store(generate_record(id));
        }
        // the bound held the whole time
        assert_eq!(store.count_stored_events(), 3);
        assert_eq!(store.lost_events(), 2);
        // the oldest two records are the ones that were lost
        let collected = store.collect_events();
        assert_eq!(collected[0].object_id, "app-2");
        // the lost counter never goes down
        store.store(generate_record(9));
        assert_eq!(store.lost_events(), 2);
    }

    #[test]
    fn tracking_flag_flips() {
        let store = EventStore::new(3, false);
        assert!(!store.is_event_tracking_enabled());
        store.set_event_tracking_enabled(true);
        assert!(store.is_event_tracking_enabled());
    }
}
