//! The optional plugins the scheduler core can call out to
//!
//! Plugins are capability interfaces with a registry of optionally present
//! implementations. Absence is a first class state: every caller has to
//! handle a plugin not being registered.

use parking_lot::RwLock;
use std::sync::Arc;

use gantry::models::EventRecord;
use gantry::Error;

/// The arguments passed to a predicates check
#[derive(Debug, Clone)]
pub struct PredicatesArgs {
    /// The allocation key being placed
    pub allocation_key: String,
    /// The node the allocation would land on
    pub node_id: String,
}

/// A plugin vetoing node placements before an allocation is proposed
pub trait PredicatesPlugin: Send + Sync {
    /// Check whether an allocation may land on a node
    ///
    /// An error vetoes the node but never fails the scheduling pass.
    ///
    /// # Arguments
    ///
    /// * `args` - The allocation and node to check
    fn predicates(&self, args: &PredicatesArgs) -> Result<(), Error>;
}

/// A sink receiving batches of drained event records
pub trait EventSink: Send + Sync {
    /// Hand a batch of event records to this sink
    ///
    /// # Arguments
    ///
    /// * `records` - The drained event records
    fn send_events(&self, records: Vec<EventRecord>);
}

/// The registry of optionally present plugin implementations
#[derive(Default)]
pub struct PluginRegistry {
    /// The predicates plugin if one is registered
    predicates: RwLock<Option<Arc<dyn PredicatesPlugin>>>,
    /// The event sink if one is registered
    sink: RwLock<Option<Arc<dyn EventSink>>>,
}

impl PluginRegistry {
    /// Create a new empty plugin registry
    #[must_use]
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    /// Register a predicates plugin replacing any prior one
    ///
    /// # Arguments
    ///
    /// * `plugin` - The predicates plugin to register
    pub fn register_predicates(&self, plugin: Arc<dyn PredicatesPlugin>) {
        *self.predicates.write() = Some(plugin);
    }

    /// Get the registered predicates plugin if any
    #[must_use]
    pub fn predicates(&self) -> Option<Arc<dyn PredicatesPlugin>> {
        self.predicates.read().clone()
    }

    /// Register an event sink replacing any prior one
    ///
    /// # Arguments
    ///
    /// * `sink` - The event sink to register
    pub fn register_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Get the registered event sink if any
    #[must_use]
    pub fn sink(&self) -> Option<Arc<dyn EventSink>> {
        self.sink.read().clone()
    }

    /// Drop all registered plugins
    pub fn clear(&self) {
        *self.predicates.write() = None;
        *self.sink.write() = None;
    }
}
