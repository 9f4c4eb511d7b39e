//! The wire messages exchanged between resource managers and the scheduler
//!
//! Field names on the wire are fixed by the protocol and must not change, so
//! every struct pins its serialized names explicitly.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::resources::Resource;
use crate::errors::InvalidEnum;

/// The partition every request lands on when none is given
pub const DEFAULT_PARTITION: &str = "default";

/// The node attribute carrying the partition a node belongs to
pub const NODE_PARTITION_ATTRIBUTE: &str = "si.io/node-partition";

/// The application tag that marks a forced creation during recovery
pub const CREATION_FORCE_TAG: &str = "yunikorn.apache.org/creation.force";

/// The reserved recovery queue name
pub const RECOVERY_QUEUE: &str = "@recovery@";

/// The fully qualified reserved recovery queue
pub const RECOVERY_QUEUE_FULL: &str = "root.@recovery@";

/// Normalize a partition name to its fully qualified form
///
/// The fully qualified form is `[cluster]rm.partition`. An empty partition
/// name maps to the default partition.
///
/// # Arguments
///
/// * `partition` - The partition name from the request
/// * `rm_id` - The resource manager this request came from
/// * `cluster_id` - The cluster this scheduler serves
#[must_use]
pub fn normalize_partition_name(partition: &str, rm_id: &str, cluster_id: &str) -> String {
    // empty partition names land on the default partition
    let partition = if partition.is_empty() {
        DEFAULT_PARTITION
    } else {
        partition
    };
    // already normalized names pass through untouched
    if partition.starts_with('[') {
        return partition.to_owned();
    }
    format!("[{cluster_id}]{rm_id}.{partition}")
}

/// Strip the cluster id prefix from a fully qualified partition name
///
/// # Arguments
///
/// * `partition` - The fully qualified partition name
#[must_use]
pub fn partition_name_without_cluster_id(partition: &str) -> &str {
    if partition.starts_with('[') {
        if let Some(idx) = partition.find(']') {
            return &partition[idx + 1..];
        }
    }
    partition
}

/// A request to register a resource manager with the scheduler
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RegisterResourceManagerRequest {
    /// The stable id of the registering resource manager
    #[serde(rename = "RmID")]
    pub rm_id: String,
    /// The version of the resource manager shim
    #[serde(rename = "Version", default)]
    pub version: String,
    /// The policy group to load configuration for
    #[serde(rename = "PolicyGroup", default)]
    pub policy_group: String,
    /// Build info published by the resource manager
    #[serde(rename = "BuildInfo", default)]
    pub build_info: HashMap<String, String>,
    /// The scheduler configuration as a YAML document
    #[serde(rename = "Config", default)]
    pub config: String,
    /// Extra key/value configuration outside the main document
    #[serde(rename = "ExtraConfig", default)]
    pub extra_config: HashMap<String, String>,
}

/// The response to a resource manager registration
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RegisterResourceManagerResponse {}

/// A request to update the scheduler configuration on the fly
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateConfigurationRequest {
    /// The resource manager requesting the update
    #[serde(rename = "RmID")]
    pub rm_id: String,
    /// The policy group to load configuration for
    #[serde(rename = "PolicyGroup", default)]
    pub policy_group: String,
    /// The scheduler configuration as a YAML document
    #[serde(rename = "Config", default)]
    pub config: String,
    /// Extra key/value configuration outside the main document
    #[serde(rename = "ExtraConfig", default)]
    pub extra_config: HashMap<String, String>,
}

/// An allocation or allocation request travelling over the wire
///
/// With no node id set this is an ask waiting for placement. With a node id
/// it describes a placed allocation, either proposed by the scheduler or
/// reported back by the resource manager.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Allocation {
    /// The key identifying this allocation within its application
    #[serde(rename = "AllocationKey")]
    pub allocation_key: String,
    /// The application this allocation belongs to
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
    /// The partition this allocation belongs to
    #[serde(rename = "PartitionName", default)]
    pub partition_name: String,
    /// The node holding this allocation if it was placed
    #[serde(rename = "NodeID", default)]
    pub node_id: String,
    /// The resources consumed by one instance of this allocation
    #[serde(rename = "ResourcePerAlloc", default)]
    pub resource_per_alloc: Resource,
    /// The scheduling priority of this allocation
    #[serde(rename = "Priority", default)]
    pub priority: i32,
    /// Whether this allocation is a placeholder
    #[serde(rename = "Placeholder", default)]
    pub placeholder: bool,
    /// The task group this allocation belongs to if any
    #[serde(rename = "TaskGroupName", default)]
    pub task_group_name: String,
    /// Whether this allocation originated the application
    #[serde(rename = "Originator", default)]
    pub originator: bool,
    /// Tags carried by this allocation
    #[serde(rename = "AllocationTags", default)]
    pub allocation_tags: HashMap<String, String>,
}

/// Why an allocation was terminated
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TerminationType {
    /// The termination reason was not known
    #[default]
    Unknown,
    /// The resource manager stopped the allocation
    StoppedByRm,
    /// The allocation timed out
    Timeout,
    /// The scheduler preempted the allocation
    PreemptedByScheduler,
    /// A placeholder was replaced by its real allocation
    PlaceholderReplaced,
}

impl TerminationType {
    /// Cast our termination type to a str
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            TerminationType::Unknown => "UNKNOWN_TERMINATION_TYPE",
            TerminationType::StoppedByRm => "STOPPED_BY_RM",
            TerminationType::Timeout => "TIMEOUT",
            TerminationType::PreemptedByScheduler => "PREEMPTED_BY_SCHEDULER",
            TerminationType::PlaceholderReplaced => "PLACEHOLDER_REPLACED",
        }
    }
}

impl fmt::Display for TerminationType {
    /// Cleanly print a termination type
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TerminationType {
    type Err = InvalidEnum;

    /// Convert this str to a [`TerminationType`]
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "UNKNOWN_TERMINATION_TYPE" => Ok(TerminationType::Unknown),
            "STOPPED_BY_RM" => Ok(TerminationType::StoppedByRm),
            "TIMEOUT" => Ok(TerminationType::Timeout),
            "PREEMPTED_BY_SCHEDULER" => Ok(TerminationType::PreemptedByScheduler),
            "PLACEHOLDER_REPLACED" => Ok(TerminationType::PlaceholderReplaced),
            _ => Err(InvalidEnum(format!("Unknown TerminationType: {raw}"))),
        }
    }
}

/// A release of one or more allocations
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AllocationRelease {
    /// The partition the released allocation lives in
    #[serde(rename = "PartitionName", default)]
    pub partition_name: String,
    /// The application the released allocation belongs to
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
    /// The allocation to release or empty for all of the application
    #[serde(rename = "AllocationKey", default)]
    pub allocation_key: String,
    /// Why this allocation was released
    #[serde(rename = "TerminationType", default)]
    pub termination_type: TerminationType,
    /// A human readable release message
    #[serde(rename = "Message", default)]
    pub message: String,
}

/// The releases carried by an allocation request
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AllocationReleases {
    /// The allocations to release
    #[serde(rename = "AllocationsToRelease", default)]
    pub allocations_to_release: Vec<AllocationRelease>,
}

/// A request carrying new asks and releases for allocations
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AllocationRequest {
    /// The new allocation asks to queue for scheduling
    #[serde(rename = "Allocations", default)]
    pub allocations: Vec<Allocation>,
    /// The allocations to release
    #[serde(rename = "Releases", default)]
    pub releases: AllocationReleases,
    /// The resource manager sending this request
    #[serde(rename = "RmID")]
    pub rm_id: String,
}

/// A request to add a new application
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AddApplicationRequest {
    /// The id of the application to add
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
    /// The queue the application asks to run in
    #[serde(rename = "QueueName", default)]
    pub queue_name: String,
    /// The partition the application belongs to
    #[serde(rename = "PartitionName", default)]
    pub partition_name: String,
    /// The user submitting this application
    #[serde(rename = "User", default)]
    pub user: String,
    /// The groups of the submitting user
    #[serde(rename = "Groups", default)]
    pub groups: Vec<String>,
    /// Tags carried by this application
    #[serde(rename = "Tags", default)]
    pub tags: HashMap<String, String>,
}

/// A request to remove an application
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RemoveApplicationRequest {
    /// The id of the application to remove
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
    /// The partition the application belongs to
    #[serde(rename = "PartitionName", default)]
    pub partition_name: String,
}

/// A request adding and removing applications
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ApplicationRequest {
    /// The applications to add
    #[serde(rename = "New", default)]
    pub new: Vec<AddApplicationRequest>,
    /// The applications to remove
    #[serde(rename = "Remove", default)]
    pub remove: Vec<RemoveApplicationRequest>,
    /// The resource manager sending this request
    #[serde(rename = "RmID")]
    pub rm_id: String,
}

/// The action a node update asks the scheduler to take
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeAction {
    /// Add this node to the partition
    #[default]
    Create,
    /// Update the capacity or occupied resources of this node
    Update,
    /// Stop scheduling new allocations onto this node
    Drain,
    /// Remove this node from the partition
    Decomission,
}

impl NodeAction {
    /// Cast our node action to a str
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            NodeAction::Create => "CREATE",
            NodeAction::Update => "UPDATE",
            NodeAction::Drain => "DRAIN",
            NodeAction::Decomission => "DECOMISSION",
        }
    }
}

impl fmt::Display for NodeAction {
    /// Cleanly print a node action
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeAction {
    type Err = InvalidEnum;

    /// Convert this str to a [`NodeAction`]
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "CREATE" => Ok(NodeAction::Create),
            "UPDATE" => Ok(NodeAction::Update),
            "DRAIN" => Ok(NodeAction::Drain),
            "DECOMISSION" => Ok(NodeAction::Decomission),
            _ => Err(InvalidEnum(format!("Unknown NodeAction: {raw}"))),
        }
    }
}

/// A single node in a node request
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NodeInfo {
    /// The id of this node within its partition
    #[serde(rename = "NodeID")]
    pub node_id: String,
    /// The action the scheduler should take for this node
    #[serde(rename = "Action", default)]
    pub action: NodeAction,
    /// Attributes carried by this node including its partition
    #[serde(rename = "Attributes", default)]
    pub attributes: HashMap<String, String>,
    /// The total schedulable resources on this node
    #[serde(rename = "SchedulableResource", default)]
    pub schedulable_resource: Resource,
    /// The resources held by workloads outside the scheduler
    #[serde(rename = "OccupiedResource", default)]
    pub occupied_resource: Resource,
    /// The allocations this node currently holds
    #[serde(rename = "ExistingAllocations", default)]
    pub existing_allocations: Vec<Allocation>,
}

impl NodeInfo {
    /// Get the partition attribute from this node
    #[must_use]
    pub fn partition(&self) -> &str {
        self.attributes
            .get(NODE_PARTITION_ATTRIBUTE)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// A request adding, updating, and removing nodes
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NodeRequest {
    /// The nodes to act on
    #[serde(rename = "Nodes", default)]
    pub nodes: Vec<NodeInfo>,
    /// The resource manager sending this request
    #[serde(rename = "RmID")]
    pub rm_id: String,
}

/// An allocation ask the scheduler could not place
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RejectedAllocation {
    /// The key of the rejected ask
    #[serde(rename = "AllocationKey")]
    pub allocation_key: String,
    /// The application the rejected ask belongs to
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
    /// Why the ask was rejected
    #[serde(rename = "Reason", default)]
    pub reason: String,
}

/// The allocation decisions pushed back to a resource manager
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AllocationResponse {
    /// Newly proposed allocations
    #[serde(rename = "New", default)]
    pub new: Vec<Allocation>,
    /// Released allocations
    #[serde(rename = "Released", default)]
    pub released: Vec<AllocationRelease>,
    /// Rejected allocation asks
    #[serde(rename = "RejectedAllocations", default)]
    pub rejected_allocations: Vec<RejectedAllocation>,
}

/// An application the scheduler accepted
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AcceptedApplication {
    /// The id of the accepted application
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
}

/// An application the scheduler rejected
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RejectedApplication {
    /// The id of the rejected application
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
    /// Why the application was rejected
    #[serde(rename = "Reason", default)]
    pub reason: String,
}

/// An application state change pushed to the resource manager
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdatedApplication {
    /// The id of the updated application
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
    /// The new state of the application
    #[serde(rename = "State", default)]
    pub state: String,
    /// A human readable update message
    #[serde(rename = "Message", default)]
    pub message: String,
}

/// The application decisions pushed back to a resource manager
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ApplicationResponse {
    /// Accepted applications
    #[serde(rename = "Accepted", default)]
    pub accepted: Vec<AcceptedApplication>,
    /// Rejected applications
    #[serde(rename = "Rejected", default)]
    pub rejected: Vec<RejectedApplication>,
    /// Updated applications
    #[serde(rename = "Updated", default)]
    pub updated: Vec<UpdatedApplication>,
}

/// A node the scheduler accepted
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AcceptedNode {
    /// The id of the accepted node
    #[serde(rename = "NodeID")]
    pub node_id: String,
}

/// A node the scheduler rejected
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RejectedNode {
    /// The id of the rejected node
    #[serde(rename = "NodeID")]
    pub node_id: String,
    /// Why the node was rejected
    #[serde(rename = "Reason", default)]
    pub reason: String,
}

/// The node decisions pushed back to a resource manager
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NodeResponse {
    /// Accepted nodes
    #[serde(rename = "Accepted", default)]
    pub accepted: Vec<AcceptedNode>,
    /// Rejected nodes
    #[serde(rename = "Rejected", default)]
    pub rejected: Vec<RejectedNode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_cluster_and_rm() {
        let name = normalize_partition_name("batch", "rm:1", "mycluster");
        assert_eq!(name, "[mycluster]rm:1.batch");
    }

    #[test]
    fn normalize_empty_is_default() {
        let name = normalize_partition_name("", "rm:1", "mycluster");
        assert_eq!(name, "[mycluster]rm:1.default");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_partition_name("batch", "rm:1", "mycluster");
        let twice = normalize_partition_name(&once, "rm:1", "mycluster");
        assert_eq!(once, twice);
    }

    #[test]
    fn strip_cluster_id() {
        assert_eq!(
            partition_name_without_cluster_id("[mycluster]rm:1.default"),
            "rm:1.default"
        );
        assert_eq!(partition_name_without_cluster_id("plain"), "plain");
    }

    #[test]
    fn node_partition_attribute() {
        let mut node = NodeInfo::default();
        assert_eq!(node.partition(), "");
        node.attributes
            .insert(NODE_PARTITION_ATTRIBUTE.to_owned(), "p1".to_owned());
        assert_eq!(node.partition(), "p1");
    }

    #[test]
    fn termination_type_round_trips() {
        for kind in [
            TerminationType::Unknown,
            TerminationType::StoppedByRm,
            TerminationType::Timeout,
            TerminationType::PreemptedByScheduler,
            TerminationType::PlaceholderReplaced,
        ] {
            assert_eq!(TerminationType::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(TerminationType::from_str("nope").is_err());
    }
}
