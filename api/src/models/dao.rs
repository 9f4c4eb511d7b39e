//! Data access object projections for external inspection
//!
//! DAOs are pure data snapshots of an entity's observable state. They hold
//! no locks and no references back into the scheduler, and are the only read
//! path exposed to inspection surfaces.

use std::collections::HashMap;

use super::resources::Resource;

/// A state transition retained in an application's state log
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StateDAOInfo {
    /// When the transition happened in nanoseconds since the epoch
    pub time: i64,
    /// The state the application entered
    pub application_state: String,
}

/// A snapshot of one allocation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AllocationDAOInfo {
    /// The key identifying this allocation within its application
    pub allocation_key: String,
    /// The application this allocation belongs to
    pub application_id: String,
    /// The node holding this allocation
    pub node_id: String,
    /// The resources consumed by this allocation
    pub resource_per_alloc: Resource,
    /// The scheduling priority of this allocation
    pub priority: i32,
    /// Whether this allocation is a placeholder
    pub placeholder: bool,
    /// The task group this allocation belongs to if any
    pub task_group_name: String,
    /// When this allocation was created in nanoseconds since the epoch
    pub allocation_time: i64,
    /// Whether this allocation replaced a placeholder
    pub placeholder_used: bool,
    /// Whether this allocation was preempted
    pub preempted: bool,
    /// Whether this allocation has been confirmed by its node
    pub confirmed: bool,
}

/// A snapshot of one pending allocation ask
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AllocationAskDAOInfo {
    /// The key identifying this ask within its application
    pub allocation_key: String,
    /// The application this ask belongs to
    pub application_id: String,
    /// The resources asked for per allocation
    pub resource_per_alloc: Resource,
    /// The scheduling priority of this ask
    pub priority: i32,
    /// The node this ask requires if any
    pub required_node: String,
    /// Whether this ask is for a placeholder
    pub placeholder: bool,
    /// The task group this ask belongs to if any
    pub task_group_name: String,
    /// Whether a scheduling attempt was made for this ask
    pub scheduling_attempted: bool,
}

/// A snapshot of the placeholder usage for one task group
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlaceholderDAOInfo {
    /// The task group these placeholders belong to
    pub task_group_name: String,
    /// How many placeholders were requested
    pub count: u64,
    /// The smallest resource shape seen for this task group
    pub min_resource: Resource,
    /// How many placeholders were replaced by real allocations
    pub replaced: u64,
    /// How many placeholders timed out
    pub timed_out: u64,
}

/// A snapshot of one application
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApplicationDAOInfo {
    /// The id of this application
    pub application_id: String,
    /// The partition this application runs in
    pub partition: String,
    /// The queue this application was placed in
    pub queue_name: String,
    /// When this application was submitted in nanoseconds since the epoch
    pub submission_time: i64,
    /// The current state of this application
    pub state: String,
    /// The user this application was submitted by
    pub user: String,
    /// The groups of the submitting user
    pub groups: Vec<String>,
    /// The resources currently allocated to this application
    pub used_resource: Resource,
    /// The resources still pending for this application
    pub pending_resource: Resource,
    /// The highest priority over the pending asks
    pub max_request_priority: i32,
    /// The pending asks of this application
    pub requests: Vec<AllocationAskDAOInfo>,
    /// The allocations of this application
    pub allocations: Vec<AllocationDAOInfo>,
    /// The placeholder usage of this application
    pub placeholder_data: Vec<PlaceholderDAOInfo>,
    /// Whether this application holds reservations
    pub has_reserved: bool,
    /// The ask keys this application has reserved
    pub reservations: Vec<String>,
    /// The recorded state transitions of this application
    pub state_log: Vec<StateDAOInfo>,
    /// Why this application was rejected if it was
    pub rejected_message: String,
}

/// A snapshot of one node
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeDAOInfo {
    /// The id of this node within its partition
    pub node_id: String,
    /// The partition this node belongs to
    pub partition: String,
    /// The attributes carried by this node
    pub attributes: HashMap<String, String>,
    /// The total capacity of this node
    pub capacity: Resource,
    /// The resources held by workloads outside the scheduler
    pub occupied: Resource,
    /// The confirmed allocations on this node
    pub allocated: Resource,
    /// The proposed but unconfirmed allocations on this node
    pub allocating: Resource,
    /// The resources marked for preemption on this node
    pub preempting: Resource,
    /// The resources still available on this node
    pub available: Resource,
    /// The used percentage per capacity type
    pub utilized: Resource,
    /// The allocations held by this node
    pub allocations: Vec<AllocationDAOInfo>,
    /// Whether this node accepts new allocations
    pub schedulable: bool,
    /// Whether this node holds reservations
    pub is_reserved: bool,
    /// The ask keys reserved on this node
    pub reservations: Vec<String>,
}

/// A snapshot of one queue, optionally with its children
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueueDAOInfo {
    /// The fully qualified path of this queue
    pub queue_name: String,
    /// The state of this queue
    pub status: String,
    /// Whether this queue is a leaf
    pub is_leaf: bool,
    /// Whether this queue came from configuration
    pub is_managed: bool,
    /// The resources pending below this queue
    pub pending_resource: Resource,
    /// The resources allocated below this queue
    pub allocated_resource: Resource,
    /// The resources marked for preemption below this queue
    pub preempting_resource: Resource,
    /// The configured maximum resources if any
    pub max_resource: Option<Resource>,
    /// The configured guaranteed resources
    pub guaranteed_resource: Resource,
    /// The remaining headroom considering all ancestors
    pub head_room: Option<Resource>,
    /// The used percentage per max capacity type
    pub abs_used_capacity: Resource,
    /// The properties set on this queue
    pub properties: HashMap<String, String>,
    /// The maximum number of running applications if set
    pub max_running_apps: Option<u64>,
    /// The number of running applications
    pub running_apps: u64,
    /// The names of the children of this queue
    pub child_names: Vec<String>,
    /// The children of this queue when recursion was asked for
    pub children: Vec<QueueDAOInfo>,
}

/// A snapshot of one partition
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PartitionDAOInfo {
    /// The fully qualified name of this partition
    pub name: String,
    /// The resource manager this partition is bound to
    pub rm_id: String,
    /// The number of nodes in this partition
    pub node_count: usize,
    /// The number of applications in this partition
    pub application_count: usize,
    /// The total capacity over all nodes
    pub total_capacity: Resource,
    /// The queue tree rooted at this partition
    pub root: QueueDAOInfo,
}

/// A snapshot of one level of a user or group tracker tree
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueueTrackerDAOInfo {
    /// The queue path of this tracker level
    pub queue_path: String,
    /// The resources tracked at this level
    pub resource_usage: Resource,
    /// The applications running below this level
    pub running_applications: Vec<String>,
    /// The configured maximum resources if any
    pub max_resources: Option<Resource>,
    /// The configured maximum running applications if any
    pub max_running_apps: Option<u64>,
    /// The children of this tracker level
    pub children: Vec<QueueTrackerDAOInfo>,
}

/// A snapshot of one user tracker
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserResourceUsageDAOInfo {
    /// The user being tracked
    pub user_name: String,
    /// The group linked to each of the user's applications
    pub groups: HashMap<String, String>,
    /// The tracker tree for this user
    pub queues: QueueTrackerDAOInfo,
}

/// A snapshot of one group tracker
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupResourceUsageDAOInfo {
    /// The group being tracked
    pub group_name: String,
    /// The applications linked to this group
    pub applications: Vec<String>,
    /// The tracker tree for this group
    pub queues: QueueTrackerDAOInfo,
}
