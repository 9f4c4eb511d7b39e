//! Periodically drains the event store to a registered sink

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{event, Level};

use super::store::EventStore;
use crate::libs::plugins::PluginRegistry;

/// Drains the event store on an interval and ships batches to the sink
///
/// The store is drained on every tick even when no sink is registered so the
/// store bound is preserved. Start and stop are idempotent.
pub struct EventPublisher {
    /// The store to drain
    store: Arc<EventStore>,
    /// The registry holding the optional sink
    registry: Arc<PluginRegistry>,
    /// How long to wait between drains
    push_interval: Duration,
    /// The sender half of the control channel while running
    stop: Mutex<Option<kanal::AsyncSender<()>>>,
}

impl EventPublisher {
    /// Create a new event publisher
    ///
    /// # Arguments
    ///
    /// * `store` - The store to drain
    /// * `registry` - The registry holding the optional sink
    /// * `push_interval` - How long to wait between drains
    #[must_use]
    pub fn new(store: Arc<EventStore>, registry: Arc<PluginRegistry>, push_interval: Duration) -> Self {
        EventPublisher {
            store,
            registry,
            push_interval,
            stop: Mutex::new(None),
        }
    }

    /// Start the drain loop if it is not already running
    pub fn start(&self) {
        let mut stop = self.stop.lock();
        // starting twice is a no op
        if stop.is_some() {
            return;
        }
        event!(Level::INFO, msg = "Starting event publisher");
        let (stop_tx, stop_rx) = kanal::bounded_async::<()>(1);
        *stop = Some(stop_tx);
        let store = self.store.clone();
        let registry = self.registry.clone();
        let interval = self.push_interval;
        // the drain loop owns the receive half and exits when it closes
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        // drain the store even with no sink so the bound holds
                        let records = store.collect_events();
                        if records.is_empty() {
                            continue;
                        }
                        if let Some(sink) = registry.sink() {
                            event!(Level::DEBUG, records = records.len(), msg = "Sending events to sink");
                            sink.send_events(records);
                        }
                    }
                    _ = stop_rx.recv() => break,
                }
            }
        });
    }

    /// Stop the drain loop if it is running
    pub fn stop(&self) {
        // dropping the sender closes the control channel
        if self.stop.lock().take().is_some() {
            event!(Level::INFO, msg = "Stopping event publisher");
        }
    }
}

impl Drop for EventPublisher {
    /// Stop the drain loop when the publisher is dropped
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::plugins::EventSink;
    use gantry::models::events::{EventChangeDetail, EventChangeType, EventRecordType};
    use gantry::models::EventRecord;
    use parking_lot::Mutex as SyncMutex;

    /// A sink capturing every batch it is handed
    #[derive(Default)]
    struct MockSink {
        batches: SyncMutex<Vec<EventRecord>>,
    }

    impl EventSink for MockSink {
        fn send_events(&self, records: Vec<EventRecord>) {
            self.batches.lock().extend(records);
        }
    }

    /// Wait until a condition holds or a timeout passes
    async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn drains_without_a_sink() {
        let store = Arc::new(EventStore::new(1000, true));
        let registry = Arc::new(PluginRegistry::new());
        let publisher =
            EventPublisher::new(store.clone(), registry, Duration::from_millis(1));
        publisher.start();
        // store a pile of records with nobody listening
        for _ in 0..100 {
            store.store(EventRecord::new_request("ask", "app", "message", None, ""));
        }
        // the publisher must erase the store even with no sink registered
        assert!(
            wait_for(|| store.count_stored_events() == 0, Duration::from_millis(50)).await,
            "store was not drained"
        );
        publisher.stop();
    }

    #[tokio::test]
    async fn sink_observes_identical_record() {
        let store = Arc::new(EventStore::new(1000, true));
        let registry = Arc::new(PluginRegistry::new());
        let sink = Arc::new(MockSink::default());
        registry.register_sink(sink.clone());
        let publisher =
            EventPublisher::new(store.clone(), registry, Duration::from_millis(1));
        publisher.start();
        let mut record = EventRecord::new(
            EventRecordType::Request,
            "ask",
            "m",
            "app",
            EventChangeType::None,
            EventChangeDetail::DetailsNone,
            None,
            "",
        );
        record.timestamp_nano = 123_456;
        store.store(record.clone());
        assert!(
            wait_for(|| !sink.batches.lock().is_empty(), Duration::from_secs(1)).await,
            "event was not received in time"
        );
        let seen = sink.batches.lock();
        assert_eq!(seen[0].object_id, "ask");
        assert_eq!(seen[0].reference_id, "app");
        assert_eq!(seen[0].message, "m");
        assert_eq!(seen[0].timestamp_nano, 123_456);
        assert_eq!(seen[0], record);
        publisher.stop();
    }

    #[tokio::test]
    async fn start_stop_is_idempotent() {
        let store = Arc::new(EventStore::new(10, true));
        let registry = Arc::new(PluginRegistry::new());
        let publisher = EventPublisher::new(store, registry, Duration::from_millis(1));
        publisher.start();
        publisher.start();
        publisher.stop();
        publisher.stop();
        publisher.start();
        publisher.stop();
    }
}
