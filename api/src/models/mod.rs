//! Wrappers for all objects within Gantry

pub mod dao;
pub mod events;
pub mod messages;
pub mod resources;
pub mod security;

pub use dao::{
    AllocationAskDAOInfo, AllocationDAOInfo, ApplicationDAOInfo, GroupResourceUsageDAOInfo,
    NodeDAOInfo, PartitionDAOInfo, PlaceholderDAOInfo, QueueDAOInfo, QueueTrackerDAOInfo,
    StateDAOInfo, UserResourceUsageDAOInfo,
};
pub use events::{EventChangeDetail, EventChangeType, EventRecord, EventRecordType};
pub use messages::{
    normalize_partition_name, partition_name_without_cluster_id, AcceptedApplication,
    AcceptedNode, AddApplicationRequest, Allocation, AllocationRelease, AllocationReleases,
    AllocationRequest, AllocationResponse, ApplicationRequest, ApplicationResponse, NodeAction,
    NodeInfo, NodeRequest, NodeResponse, RegisterResourceManagerRequest,
    RegisterResourceManagerResponse, RejectedAllocation, RejectedApplication, RejectedNode,
    RemoveApplicationRequest, TerminationType, UpdateConfigurationRequest, UpdatedApplication,
    CREATION_FORCE_TAG, DEFAULT_PARTITION, NODE_PARTITION_ATTRIBUTE, RECOVERY_QUEUE,
    RECOVERY_QUEUE_FULL,
};
pub use resources::{abs_used_capacity, component_wise_min, Resource};
pub use security::{Acl, UserGroup};
