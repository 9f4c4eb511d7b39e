//! Asks and allocations
//!
//! An ask is a request by an application for one allocation of a given
//! resource shape. An allocation is a placed ask: proposed by a scheduling
//! pass, confirmed once its node reports it, and eventually released.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use gantry::models::dao::{AllocationAskDAOInfo, AllocationDAOInfo};
use gantry::models::{messages, Resource};

/// A request by an application for one allocation
#[derive(Debug)]
pub struct Ask {
    /// The application this ask belongs to
    pub application_id: String,
    /// The key identifying this ask within its application
    pub allocation_key: String,
    /// The resources asked for per allocation
    pub resource: Resource,
    /// The scheduling priority of this ask
    pub priority: i32,
    /// The node this ask requires if any
    pub required_node: Option<String>,
    /// Whether this ask is for a placeholder
    pub placeholder: bool,
    /// The task group this ask belongs to if any
    pub task_group: Option<String>,
    /// Tags this ask requires on its placement
    pub required_tags: HashMap<String, String>,
    /// Whether this ask originated the application
    pub originator: bool,
    /// When this ask was created
    pub create_time: DateTime<Utc>,
    /// Whether a scheduling attempt was made for this ask
    scheduling_attempted: AtomicBool,
}

impl Ask {
    /// Create an ask from its wire form
    ///
    /// A node id on an inbound ask pins the ask to that node.
    ///
    /// # Arguments
    ///
    /// * `alloc` - The wire allocation carrying the ask
    #[must_use]
    pub fn from_wire(alloc: &messages::Allocation) -> Self {
        Ask {
            application_id: alloc.application_id.clone(),
            allocation_key: alloc.allocation_key.clone(),
            resource: alloc.resource_per_alloc.clone(),
            priority: alloc.priority,
            required_node: if alloc.node_id.is_empty() {
                None
            } else {
                Some(alloc.node_id.clone())
            },
            placeholder: alloc.placeholder,
            task_group: if alloc.task_group_name.is_empty() {
                None
            } else {
                Some(alloc.task_group_name.clone())
            },
            required_tags: alloc.allocation_tags.clone(),
            originator: alloc.originator,
            create_time: Utc::now(),
            scheduling_attempted: AtomicBool::new(false),
        }
    }

    /// Check whether a scheduling attempt was already made for this ask
    #[must_use]
    pub fn is_scheduling_attempted(&self) -> bool {
        self.scheduling_attempted.load(Ordering::Relaxed)
    }

    /// Mark that a scheduling attempt was made for this ask
    pub fn set_scheduling_attempted(&self) {
        self.scheduling_attempted.store(true, Ordering::Relaxed);
    }

    /// Build the DAO projection of this ask
    #[must_use]
    pub fn dao(&self) -> AllocationAskDAOInfo {
        AllocationAskDAOInfo {
            allocation_key: self.allocation_key.clone(),
            application_id: self.application_id.clone(),
            resource_per_alloc: self.resource.clone(),
            priority: self.priority,
            required_node: self.required_node.clone().unwrap_or_default(),
            placeholder: self.placeholder,
            task_group_name: self.task_group.clone().unwrap_or_default(),
            scheduling_attempted: self.is_scheduling_attempted(),
        }
    }
}

/// A placed ask on its way through the allocation lifecycle
#[derive(Debug)]
pub struct Allocation {
    /// The application this allocation belongs to
    pub application_id: String,
    /// The key identifying this allocation within its application
    pub allocation_key: String,
    /// The resources consumed by this allocation
    pub resource: Resource,
    /// The node holding this allocation
    pub node_id: String,
    /// The scheduling priority of this allocation
    pub priority: i32,
    /// Whether this allocation is a placeholder
    pub placeholder: bool,
    /// The task group this allocation belongs to if any
    pub task_group: Option<String>,
    /// When the replaced placeholder was created if this replaced one
    pub placeholder_create_time: Option<DateTime<Utc>>,
    /// Whether this allocation may be preempted
    pub preemptable: bool,
    /// When this allocation was created
    pub create_time: DateTime<Utc>,
    /// Whether this allocation was preempted
    preempted: AtomicBool,
    /// Whether this allocation was confirmed by its node
    confirmed: AtomicBool,
}

impl Allocation {
    /// Create a newly proposed allocation from a placed ask
    ///
    /// # Arguments
    ///
    /// * `ask` - The ask this allocation places
    /// * `node_id` - The node the allocation landed on
    #[must_use]
    pub fn from_ask(ask: &Ask, node_id: &str) -> Self {
        Allocation {
            application_id: ask.application_id.clone(),
            allocation_key: ask.allocation_key.clone(),
            resource: ask.resource.clone(),
            node_id: node_id.to_owned(),
            priority: ask.priority,
            placeholder: ask.placeholder,
            task_group: ask.task_group.clone(),
            placeholder_create_time: None,
            preemptable: true,
            create_time: Utc::now(),
            preempted: AtomicBool::new(false),
            confirmed: AtomicBool::new(false),
        }
    }

    /// Check whether this allocation was confirmed by its node
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed.load(Ordering::Relaxed)
    }

    /// Mark this allocation as confirmed by its node
    pub fn confirm(&self) {
        self.confirmed.store(true, Ordering::Relaxed);
    }

    /// Check whether this allocation was preempted
    #[must_use]
    pub fn is_preempted(&self) -> bool {
        self.preempted.load(Ordering::Relaxed)
    }

    /// Mark this allocation as preempted
    pub fn mark_preempted(&self) {
        self.preempted.store(true, Ordering::Relaxed);
    }

    /// Build the wire form of this allocation
    ///
    /// # Arguments
    ///
    /// * `partition_name` - The fully qualified partition this allocation is in
    #[must_use]
    pub fn to_wire(&self, partition_name: &str) -> messages::Allocation {
        messages::Allocation {
            allocation_key: self.allocation_key.clone(),
            application_id: self.application_id.clone(),
            partition_name: partition_name.to_owned(),
            node_id: self.node_id.clone(),
            resource_per_alloc: self.resource.clone(),
            priority: self.priority,
            placeholder: self.placeholder,
            task_group_name: self.task_group.clone().unwrap_or_default(),
            originator: false,
            allocation_tags: HashMap::default(),
        }
    }

    /// Build the DAO projection of this allocation
    #[must_use]
    pub fn dao(&self) -> AllocationDAOInfo {
        AllocationDAOInfo {
            allocation_key: self.allocation_key.clone(),
            application_id: self.application_id.clone(),
            node_id: self.node_id.clone(),
            resource_per_alloc: self.resource.clone(),
            priority: self.priority,
            placeholder: self.placeholder,
            task_group_name: self.task_group.clone().unwrap_or_default(),
            allocation_time: self.create_time.timestamp_nanos_opt().unwrap_or_default(),
            placeholder_used: self.placeholder_create_time.is_some(),
            preempted: self.is_preempted(),
            confirmed: self.is_confirmed(),
        }
    }
}
