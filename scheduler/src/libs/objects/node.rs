//! A schedulable node within a partition
//!
//! A node tracks four resource views next to its total capacity: occupied
//! (held by workloads outside the scheduler), allocated (confirmed
//! placements), allocating (proposed but unconfirmed), and preempting
//! (marked for release). Available capacity is always derived, never stored.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{event, Level};

use gantry::models::dao::NodeDAOInfo;
use gantry::models::{abs_used_capacity, NodeInfo, Resource};

use super::allocation::{Allocation, Ask};
use crate::libs::events::NodeEvents;
use crate::libs::plugins::{PluginRegistry, PredicatesArgs};

/// The mutable state of a scheduling node
struct NodeState {
    /// The total capacity of this node
    total: Resource,
    /// The resources held by workloads outside the scheduler
    occupied: Resource,
    /// The confirmed allocations on this node
    allocated: Resource,
    /// The proposed but unconfirmed allocations on this node
    allocating: Resource,
    /// The resources marked for preemption on this node
    preempting: Resource,
    /// Whether this node accepts new allocations
    schedulable: bool,
    /// The allocations confirmed on this node by key
    allocations: HashMap<String, Arc<Allocation>>,
    /// The asks holding a reservation on this node by key
    reservations: HashMap<String, Arc<Ask>>,
}

/// A schedulable node within a partition
pub struct SchedulingNode {
    /// The id of this node within its partition
    pub node_id: String,
    /// The fully qualified partition this node belongs to
    pub partition: String,
    /// The attributes carried by this node
    pub attributes: HashMap<String, String>,
    /// The mutable resource state of this node
    state: RwLock<NodeState>,
    /// The event source for node records
    events: NodeEvents,
}

impl SchedulingNode {
    /// Create a new scheduling node from its wire form
    ///
    /// # Arguments
    ///
    /// * `info` - The wire node info to build from
    /// * `partition` - The fully qualified partition this node belongs to
    /// * `events` - The event source for node records
    #[must_use]
    pub fn new(info: &NodeInfo, partition: &str, events: NodeEvents) -> Self {
        let node = SchedulingNode {
            node_id: info.node_id.clone(),
            partition: partition.to_owned(),
            attributes: info.attributes.clone(),
            state: RwLock::new(NodeState {
                total: info.schedulable_resource.clone(),
                occupied: info.occupied_resource.clone(),
                allocated: Resource::new(),
                allocating: Resource::new(),
                preempting: Resource::new(),
                schedulable: true,
                allocations: HashMap::default(),
                reservations: HashMap::default(),
            }),
            events,
        };
        node.events
            .send_node_added(&node.node_id, &info.schedulable_resource, "Active");
        node
    }

    /// Check whether this node accepts new allocations
    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        self.state.read().schedulable
    }

    /// Set whether this node accepts new allocations
    ///
    /// # Arguments
    ///
    /// * `schedulable` - Whether the node should accept new allocations
    pub fn set_schedulable(&self, schedulable: bool) {
        let mut state = self.state.write();
        if state.schedulable != schedulable {
            state.schedulable = schedulable;
            drop(state);
            self.events
                .send_schedulable_changed(&self.node_id, schedulable, "");
        }
    }

    /// Get the total capacity of this node
    #[must_use]
    pub fn total(&self) -> Resource {
        self.state.read().total.clone()
    }

    /// Get the confirmed allocated resources on this node
    #[must_use]
    pub fn allocated(&self) -> Resource {
        self.state.read().allocated.clone()
    }

    /// Get the proposed but unconfirmed resources on this node
    #[must_use]
    pub fn allocating(&self) -> Resource {
        self.state.read().allocating.clone()
    }

    /// Get the resources marked for preemption on this node
    #[must_use]
    pub fn preempting(&self) -> Resource {
        self.state.read().preempting.clone()
    }

    /// Get the available resources on this node
    ///
    /// Available is total minus occupied, allocated, and allocating.
    #[must_use]
    pub fn available(&self) -> Resource {
        let state = self.state.read();
        available_from(&state)
    }

    /// Update the total capacity of this node
    ///
    /// # Arguments
    ///
    /// * `total` - The new total capacity
    pub fn update_capacity(&self, total: &Resource) {
        let mut state = self.state.write();
        if state.total != *total {
            state.total = total.clone();
            drop(state);
            self.events.send_capacity_changed(&self.node_id, total, "");
        }
    }

    /// Update the occupied resources on this node
    ///
    /// # Arguments
    ///
    /// * `occupied` - The new occupied resources
    pub fn update_occupied(&self, occupied: &Resource) {
        let mut state = self.state.write();
        if state.occupied != *occupied {
            state.occupied = occupied.clone();
            drop(state);
            self.events.send_occupied_changed(&self.node_id, occupied, "");
        }
    }

    /// Check the preconditions for placing an allocation on this node
    ///
    /// An unschedulable node fails the check. A registered predicates plugin
    /// may veto the node; a veto skips this node but never fails the pass.
    ///
    /// # Arguments
    ///
    /// * `allocation_key` - The ask being placed
    /// * `registry` - The plugin registry holding the optional predicates
    #[must_use]
    pub fn check_allocate_conditions(&self, allocation_key: &str, registry: &PluginRegistry) -> bool {
        if !self.is_schedulable() {
            event!(Level::DEBUG, node = %self.node_id, msg = "node is unschedulable");
            return false;
        }
        // a predicates veto skips this node and moves to the next candidate
        if let Some(plugin) = registry.predicates() {
            let args = PredicatesArgs {
                allocation_key: allocation_key.to_owned(),
                node_id: self.node_id.clone(),
            };
            if let Err(error) = plugin.predicates(&args) {
                event!(
                    Level::DEBUG,
                    node = %self.node_id,
                    allocation_key,
                    error = %error,
                    msg = "predicates vetoed node"
                );
                return false;
            }
        }
        true
    }

    /// Check a proposed allocation and claim its resources if it fits
    ///
    /// The check and the claim happen in a single lock region. During a
    /// preemption phase resources marked for preemption count as available.
    ///
    /// # Arguments
    ///
    /// * `delta` - The resources the proposed allocation needs
    /// * `preemption_phase` - Whether preempting resources count as available
    #[must_use]
    pub fn check_and_allocate(&self, delta: &Resource, preemption_phase: bool) -> bool {
        let mut state = self.state.write();
        let mut available = state.total.clone();
        available -= &state.occupied;
        available -= &state.allocated;
        if preemption_phase {
            available += &state.preempting;
        }
        let new_allocating = &state.allocating + delta;
        if new_allocating.fits_in(&available) {
            state.allocating = new_allocating;
            return true;
        }
        false
    }

    /// Roll back a proposed allocation that was never confirmed
    ///
    /// # Arguments
    ///
    /// * `delta` - The resources the proposal claimed
    pub fn release_allocating(&self, delta: &Resource) {
        let mut state = self.state.write();
        state.allocating -= delta;
    }

    /// Confirm a proposed allocation reported back by the resource manager
    ///
    /// The allocating resources move to allocated and the allocation is
    /// recorded on the node.
    ///
    /// # Arguments
    ///
    /// * `alloc` - The allocation to confirm
    pub fn confirm_allocation(&self, alloc: &Arc<Allocation>) {
        let mut state = self.state.write();
        state.allocating -= &alloc.resource;
        state.allocated += &alloc.resource;
        state
            .allocations
            .insert(alloc.allocation_key.clone(), alloc.clone());
        drop(state);
        self.events.send_allocation_added(
            &self.node_id,
            &alloc.allocation_key,
            &alloc.resource,
            "",
        );
    }

    /// Record an allocation this node already holds
    ///
    /// Used when a resource manager reports an allocation the scheduler
    /// never proposed, for example while recovering running workloads. The
    /// resources land directly in allocated without an allocating phase.
    ///
    /// # Arguments
    ///
    /// * `alloc` - The allocation to record
    pub fn restore_allocation(&self, alloc: &Arc<Allocation>) {
        let mut state = self.state.write();
        state.allocated += &alloc.resource;
        state
            .allocations
            .insert(alloc.allocation_key.clone(), alloc.clone());
        drop(state);
        self.events.send_allocation_added(
            &self.node_id,
            &alloc.allocation_key,
            &alloc.resource,
            "",
        );
    }

    /// Release an allocation from this node
    ///
    /// A preempted allocation releases its preempting marker together with
    /// its allocated resources. A proposed but unconfirmed allocation only
    /// rolls back its allocating resources.
    ///
    /// # Arguments
    ///
    /// * `alloc` - The allocation to release
    pub fn release_allocation(&self, alloc: &Arc<Allocation>) {
        let mut state = self.state.write();
        if alloc.is_confirmed() {
            state.allocated -= &alloc.resource;
            // a preempted release also clears its preempting marker
            if alloc.is_preempted() {
                state.preempting -= &alloc.resource;
            }
            state.allocations.remove(&alloc.allocation_key);
            drop(state);
            self.events.send_allocation_removed(
                &self.node_id,
                &alloc.allocation_key,
                &alloc.resource,
                "",
            );
        } else {
            state.allocating -= &alloc.resource;
        }
    }

    /// Mark resources on this node for preemption
    ///
    /// # Arguments
    ///
    /// * `delta` - The resources to mark for preemption
    pub fn mark_preempting(&self, delta: &Resource) {
        let mut state = self.state.write();
        state.preempting += delta;
    }

    /// Get an allocation confirmed on this node by key
    ///
    /// # Arguments
    ///
    /// * `allocation_key` - The key of the allocation to get
    #[must_use]
    pub fn get_allocation(&self, allocation_key: &str) -> Option<Arc<Allocation>> {
        self.state.read().allocations.get(allocation_key).cloned()
    }

    /// Reserve this node for an ask
    ///
    /// # Arguments
    ///
    /// * `ask` - The ask holding the reservation
    pub fn reserve(&self, ask: &Arc<Ask>) {
        let mut state = self.state.write();
        state
            .reservations
            .insert(ask.allocation_key.clone(), ask.clone());
        drop(state);
        self.events
            .send_reserved(&self.node_id, &ask.allocation_key, &ask.resource, "");
    }

    /// Drop a reservation held by an ask
    ///
    /// # Arguments
    ///
    /// * `allocation_key` - The key of the ask to unreserve
    pub fn unreserve(&self, allocation_key: &str) {
        let mut state = self.state.write();
        if let Some(ask) = state.reservations.remove(allocation_key) {
            drop(state);
            self.events
                .send_unreserved(&self.node_id, allocation_key, &ask.resource, "");
        }
    }

    /// Check whether this node holds any reservations
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        !self.state.read().reservations.is_empty()
    }

    /// Check whether an ask holds a reservation on this node
    ///
    /// # Arguments
    ///
    /// * `allocation_key` - The key of the ask to look for
    #[must_use]
    pub fn has_reservation(&self, allocation_key: &str) -> bool {
        self.state.read().reservations.contains_key(allocation_key)
    }

    /// The available quantity summed over a set of resource types
    ///
    /// Used to order candidate nodes for an ask. With no types given the
    /// whole available vector is summed.
    ///
    /// # Arguments
    ///
    /// * `shape` - The resource shape whose types matter
    #[must_use]
    pub fn available_for(&self, shape: &Resource) -> u64 {
        let available = self.available();
        if shape.is_empty() {
            return available.total();
        }
        available.sum_of(shape.iter().map(|(name, _)| name))
    }

    /// Build the DAO projection of this node
    #[must_use]
    pub fn dao(&self) -> NodeDAOInfo {
        let state = self.state.read();
        let mut allocations: Vec<_> = state.allocations.values().map(|alloc| alloc.dao()).collect();
        allocations.sort_by(|a, b| a.allocation_key.cmp(&b.allocation_key));
        let mut reservations: Vec<_> = state.reservations.keys().cloned().collect();
        reservations.sort();
        NodeDAOInfo {
            node_id: self.node_id.clone(),
            partition: self.partition.clone(),
            attributes: self.attributes.clone(),
            capacity: state.total.clone(),
            occupied: state.occupied.clone(),
            allocated: state.allocated.clone(),
            allocating: state.allocating.clone(),
            preempting: state.preempting.clone(),
            available: available_from(&state),
            utilized: abs_used_capacity(&state.total, &state.allocated),
            allocations,
            schedulable: state.schedulable,
            is_reserved: !state.reservations.is_empty(),
            reservations,
        }
    }
}

/// Derive the available resources from a node state
///
/// # Arguments
///
/// * `state` - The node state to derive from
fn available_from(state: &NodeState) -> Resource {
    let mut available = state.total.clone();
    available -= &state.occupied;
    available -= &state.allocated;
    available -= &state.allocating;
    available
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::events::EventStore;
    use gantry::models::messages;

    /// Build a node with the given total memory for tests
    fn generate_node(id: &str, memory: u64) -> SchedulingNode {
        let store = Arc::new(EventStore::new(100, false));
        let info = NodeInfo {
            node_id: id.to_owned(),
            schedulable_resource: Resource::from_pairs([("memory", memory)]),
            ..Default::default()
        };
        SchedulingNode::new(&info, "[test]rm.default", NodeEvents::new(&store))
    }

    /// Build a throwaway ask for tests
    fn generate_ask(key: &str, memory: u64) -> Arc<Ask> {
        Arc::new(Ask::from_wire(&messages::Allocation {
            allocation_key: key.to_owned(),
            application_id: "app-1".to_owned(),
            resource_per_alloc: Resource::from_pairs([("memory", memory)]),
            ..Default::default()
        }))
    }

    #[test]
    fn accounting_identity_holds() {
        let node = generate_node("node-1", 10);
        let delta = Resource::from_pairs([("memory", 6)]);
        assert!(node.check_and_allocate(&delta, false));
        // available + allocated + allocating + occupied == total
        let mut sum = node.available();
        sum += &node.allocated();
        sum += &node.allocating();
        assert_eq!(sum.get("memory"), 10);
        // confirm the allocation and re-check
        let ask = generate_ask("ask-1", 6);
        let alloc = Arc::new(Allocation::from_ask(&ask, "node-1"));
        alloc.confirm();
        node.confirm_allocation(&alloc);
        assert_eq!(node.allocating().get("memory"), 0);
        assert_eq!(node.allocated().get("memory"), 6);
        assert_eq!(node.available().get("memory"), 4);
    }

    #[test]
    fn check_and_allocate_rejects_overcommit() {
        let node = generate_node("node-1", 10);
        assert!(node.check_and_allocate(&Resource::from_pairs([("memory", 8)]), false));
        // the second proposal does not fit next to the first
        assert!(!node.check_and_allocate(&Resource::from_pairs([("memory", 5)]), false));
        // and nothing changed on the failed check
        assert_eq!(node.allocating().get("memory"), 8);
    }

    #[test]
    fn preemption_phase_counts_preempting() {
        let node = generate_node("node-1", 10);
        let ask = generate_ask("ask-1", 8);
        assert!(node.check_and_allocate(&ask.resource, false));
        let alloc = Arc::new(Allocation::from_ask(&ask, "node-1"));
        alloc.confirm();
        node.confirm_allocation(&alloc);
        // mark the confirmed allocation for preemption
        node.mark_preempting(&alloc.resource);
        alloc.mark_preempted();
        let delta = Resource::from_pairs([("memory", 5)]);
        // without the preemption phase the node is full
        assert!(!node.check_and_allocate(&delta, false));
        assert!(node.check_and_allocate(&delta, true));
        // releasing the preempted allocation clears both counters
        node.release_allocation(&alloc);
        assert_eq!(node.allocated().get("memory"), 0);
        assert_eq!(node.preempting().get("memory"), 0);
    }

    #[test]
    fn unschedulable_fails_conditions() {
        let node = generate_node("node-1", 10);
        let registry = PluginRegistry::new();
        assert!(node.check_allocate_conditions("ask-1", &registry));
        node.set_schedulable(false);
        assert!(!node.check_allocate_conditions("ask-1", &registry));
    }

    #[test]
    fn predicates_veto_skips_node() {
        struct Veto;
        impl crate::libs::plugins::PredicatesPlugin for Veto {
            fn predicates(&self, args: &PredicatesArgs) -> Result<(), gantry::Error> {
                if args.node_id == "node-1" {
                    return Err(gantry::Error::new("veto"));
                }
                Ok(())
            }
        }
        let node = generate_node("node-1", 10);
        let registry = PluginRegistry::new();
        registry.register_predicates(Arc::new(Veto));
        assert!(!node.check_allocate_conditions("ask-1", &registry));
    }

    #[test]
    fn reservations_round_trip() {
        let node = generate_node("node-1", 10);
        let ask = generate_ask("ask-1", 4);
        node.reserve(&ask);
        assert!(node.is_reserved());
        node.unreserve("ask-1");
        assert!(!node.is_reserved());
    }

    #[test]
    fn dao_reports_derived_available() {
        let node = generate_node("node-1", 10);
        assert!(node.check_and_allocate(&Resource::from_pairs([("memory", 3)]), false));
        let dao = node.dao();
        assert_eq!(dao.capacity.get("memory"), 10);
        assert_eq!(dao.allocating.get("memory"), 3);
        assert_eq!(dao.available.get("memory"), 7);
        // the DAO is a pure function of the node state
        assert_eq!(dao, node.dao());
    }
}
