//! Allocation free emit helpers for the scheduler event sources
//!
//! Every helper checks the tracking flag before building a record so a
//! disabled event system costs nothing but the flag read.

use std::sync::Arc;

use gantry::models::events::{EventChangeDetail, EventChangeType, EventRecordType};
use gantry::models::{EventRecord, Resource, TerminationType};

use super::store::EventStore;

/// Map a termination type onto its removal change detail
///
/// # Arguments
///
/// * `termination` - The termination type to map
#[must_use]
pub fn termination_change_detail(termination: TerminationType) -> EventChangeDetail {
    match termination {
        TerminationType::Unknown => EventChangeDetail::AllocNodeRemoved,
        TerminationType::StoppedByRm => EventChangeDetail::AllocCancel,
        TerminationType::Timeout => EventChangeDetail::AllocTimeout,
        TerminationType::PreemptedByScheduler => EventChangeDetail::AllocPreempt,
        TerminationType::PlaceholderReplaced => EventChangeDetail::AllocReplaced,
    }
}

/// The event source for applications
#[derive(Clone)]
pub struct ApplicationEvents {
    /// The store records are emitted into
    store: Arc<EventStore>,
}

impl ApplicationEvents {
    /// Create a new application event source
    ///
    /// # Arguments
    ///
    /// * `store` - The store records are emitted into
    #[must_use]
    pub fn new(store: &Arc<EventStore>) -> Self {
        ApplicationEvents {
            store: store.clone(),
        }
    }

    /// Emit a new application record
    pub fn send_new_application(&self, app_id: &str, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::App,
            app_id,
            "",
            "",
            EventChangeType::Add,
            EventChangeDetail::AppNew,
            None,
            state,
        ));
    }

    /// Emit an application removal record
    pub fn send_remove_application(&self, app_id: &str, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::App,
            app_id,
            "",
            "",
            EventChangeType::Remove,
            EventChangeDetail::DetailsNone,
            None,
            state,
        ));
    }

    /// Emit a new ask record for an application
    pub fn send_new_ask(&self, app_id: &str, allocation_key: &str, asked: &Resource, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::App,
            app_id,
            "",
            allocation_key,
            EventChangeType::Add,
            EventChangeDetail::AppRequest,
            Some(asked.clone()),
            state,
        ));
    }

    /// Emit an ask removal record for an application
    pub fn send_remove_ask(
        &self,
        app_id: &str,
        allocation_key: &str,
        asked: &Resource,
        detail: EventChangeDetail,
        state: &str,
    ) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::App,
            app_id,
            "",
            allocation_key,
            EventChangeType::Remove,
            detail,
            Some(asked.clone()),
            state,
        ));
    }

    /// Emit a new allocation record for an application
    pub fn send_new_allocation(
        &self,
        app_id: &str,
        allocation_key: &str,
        allocated: &Resource,
        state: &str,
    ) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::App,
            app_id,
            "",
            allocation_key,
            EventChangeType::Add,
            EventChangeDetail::AppAlloc,
            Some(allocated.clone()),
            state,
        ));
    }

    /// Emit an allocation removal record mapped from its termination type
    pub fn send_remove_allocation(
        &self,
        app_id: &str,
        allocation_key: &str,
        allocated: &Resource,
        termination: TerminationType,
        state: &str,
    ) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::App,
            app_id,
            "",
            allocation_key,
            EventChangeType::Remove,
            termination_change_detail(termination),
            Some(allocated.clone()),
            state,
        ));
    }

    /// Emit an application state change record
    pub fn send_state_change(&self, app_id: &str, detail: EventChangeDetail, message: &str, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::App,
            app_id,
            message,
            "",
            EventChangeType::Set,
            detail,
            None,
            state,
        ));
    }

    /// Emit a record for an application parked by a queue limit
    pub fn send_app_not_runnable_in_queue(&self, app_id: &str, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::App,
            app_id,
            "",
            "",
            EventChangeType::None,
            EventChangeDetail::AppCannotRunQueue,
            None,
            state,
        ));
    }

    /// Emit a record for a parked application becoming runnable
    pub fn send_app_runnable_in_queue(&self, app_id: &str, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::App,
            app_id,
            "",
            "",
            EventChangeType::None,
            EventChangeDetail::AppRunnableQueue,
            None,
            state,
        ));
    }

    /// Emit a record for an application blocked by a user or group quota
    pub fn send_app_not_runnable_quota(&self, app_id: &str, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::App,
            app_id,
            "",
            "",
            EventChangeType::None,
            EventChangeDetail::AppCannotRunQuota,
            None,
            state,
        ));
    }

    /// Emit a record for an application becoming runnable under its quota
    pub fn send_app_runnable_quota(&self, app_id: &str, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::App,
            app_id,
            "",
            "",
            EventChangeType::None,
            EventChangeDetail::AppRunnableQuota,
            None,
            state,
        ));
    }
}

/// The event source for nodes
#[derive(Clone)]
pub struct NodeEvents {
    /// The store records are emitted into
    store: Arc<EventStore>,
}

impl NodeEvents {
    /// Create a new node event source
    ///
    /// # Arguments
    ///
    /// * `store` - The store records are emitted into
    #[must_use]
    pub fn new(store: &Arc<EventStore>) -> Self {
        NodeEvents {
            store: store.clone(),
        }
    }

    /// Emit a node added record
    pub fn send_node_added(&self, node_id: &str, capacity: &Resource, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Node,
            node_id,
            "Node added to the scheduler",
            "",
            EventChangeType::Add,
            EventChangeDetail::DetailsNone,
            Some(capacity.clone()),
            state,
        ));
    }

    /// Emit a node removed record
    pub fn send_node_removed(&self, node_id: &str, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Node,
            node_id,
            "Node removed from the scheduler",
            "",
            EventChangeType::Remove,
            EventChangeDetail::NodeDecomission,
            None,
            state,
        ));
    }

    /// Emit a record for an allocation landing on a node
    pub fn send_allocation_added(&self, node_id: &str, allocation_key: &str, allocated: &Resource, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Node,
            node_id,
            "",
            allocation_key,
            EventChangeType::Add,
            EventChangeDetail::NodeAlloc,
            Some(allocated.clone()),
            state,
        ));
    }

    /// Emit a record for an allocation leaving a node
    pub fn send_allocation_removed(&self, node_id: &str, allocation_key: &str, allocated: &Resource, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Node,
            node_id,
            "",
            allocation_key,
            EventChangeType::Remove,
            EventChangeDetail::NodeAlloc,
            Some(allocated.clone()),
            state,
        ));
    }

    /// Emit a record for a node schedulable flag change
    pub fn send_schedulable_changed(&self, node_id: &str, schedulable: bool, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        let message = if schedulable {
            "schedulable: true"
        } else {
            "schedulable: false"
        };
        self.store.store(EventRecord::new(
            EventRecordType::Node,
            node_id,
            message,
            "",
            EventChangeType::Set,
            EventChangeDetail::NodeSchedulable,
            None,
            state,
        ));
    }

    /// Emit a record for a node capacity change
    pub fn send_capacity_changed(&self, node_id: &str, total: &Resource, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Node,
            node_id,
            "",
            "",
            EventChangeType::Set,
            EventChangeDetail::NodeCapacity,
            Some(total.clone()),
            state,
        ));
    }

    /// Emit a record for a node occupied resource change
    pub fn send_occupied_changed(&self, node_id: &str, occupied: &Resource, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Node,
            node_id,
            "",
            "",
            EventChangeType::Set,
            EventChangeDetail::NodeOccupied,
            Some(occupied.clone()),
            state,
        ));
    }

    /// Emit a record for an ask reserving a node
    pub fn send_reserved(&self, node_id: &str, allocation_key: &str, reserved: &Resource, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Node,
            node_id,
            "",
            allocation_key,
            EventChangeType::Add,
            EventChangeDetail::NodeReservation,
            Some(reserved.clone()),
            state,
        ));
    }

    /// Emit a record for an ask releasing a node reservation
    pub fn send_unreserved(&self, node_id: &str, allocation_key: &str, reserved: &Resource, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Node,
            node_id,
            "",
            allocation_key,
            EventChangeType::Remove,
            EventChangeDetail::NodeReservation,
            Some(reserved.clone()),
            state,
        ));
    }
}

/// The event source for queues
#[derive(Clone)]
pub struct QueueEvents {
    /// The store records are emitted into
    store: Arc<EventStore>,
}

impl QueueEvents {
    /// Create a new queue event source
    ///
    /// # Arguments
    ///
    /// * `store` - The store records are emitted into
    #[must_use]
    pub fn new(store: &Arc<EventStore>) -> Self {
        QueueEvents {
            store: store.clone(),
        }
    }

    /// Emit a new queue record
    pub fn send_new_queue(&self, path: &str, dynamic: bool, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        let detail = if dynamic {
            EventChangeDetail::QueueDynamic
        } else {
            EventChangeDetail::DetailsNone
        };
        self.store.store(EventRecord::new(
            EventRecordType::Queue,
            path,
            "",
            "",
            EventChangeType::Add,
            detail,
            None,
            state,
        ));
    }

    /// Emit a queue removal record
    pub fn send_remove_queue(&self, path: &str, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Queue,
            path,
            "",
            "",
            EventChangeType::Remove,
            EventChangeDetail::DetailsNone,
            None,
            state,
        ));
    }

    /// Emit a queue state transition record
    pub fn send_state_change(&self, path: &str, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Queue,
            path,
            "",
            "",
            EventChangeType::Set,
            EventChangeDetail::QueueState,
            None,
            state,
        ));
    }

    /// Emit a queue max resource change record
    pub fn send_max_changed(&self, path: &str, max: &Resource, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Queue,
            path,
            "",
            "",
            EventChangeType::Set,
            EventChangeDetail::QueueMax,
            Some(max.clone()),
            state,
        ));
    }

    /// Emit a queue guaranteed resource change record
    pub fn send_guaranteed_changed(&self, path: &str, guaranteed: &Resource, state: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::Queue,
            path,
            "",
            "",
            EventChangeType::Set,
            EventChangeDetail::QueueGuaranteed,
            Some(guaranteed.clone()),
            state,
        ));
    }
}

/// The event source for user and group trackers
#[derive(Clone)]
pub struct UserGroupEvents {
    /// The store records are emitted into
    store: Arc<EventStore>,
}

impl UserGroupEvents {
    /// Create a new user/group event source
    ///
    /// # Arguments
    ///
    /// * `store` - The store records are emitted into
    #[must_use]
    pub fn new(store: &Arc<EventStore>) -> Self {
        UserGroupEvents {
            store: store.clone(),
        }
    }

    /// Emit a tracked usage increase record
    pub fn send_usage_increased(&self, name: &str, queue_path: &str, usage: &Resource) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::UserGroup,
            name,
            "",
            queue_path,
            EventChangeType::Add,
            EventChangeDetail::UserGroupUsageInc,
            Some(usage.clone()),
            "",
        ));
    }

    /// Emit a tracked usage decrease record
    pub fn send_usage_decreased(&self, name: &str, queue_path: &str, usage: &Resource) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::UserGroup,
            name,
            "",
            queue_path,
            EventChangeType::Remove,
            EventChangeDetail::UserGroupUsageDec,
            Some(usage.clone()),
            "",
        ));
    }

    /// Emit a limit set record
    pub fn send_limit_set(&self, name: &str, queue_path: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::UserGroup,
            name,
            "",
            queue_path,
            EventChangeType::Set,
            EventChangeDetail::UserGroupLimitSet,
            None,
            "",
        ));
    }

    /// Emit a limit removed record
    pub fn send_limit_removed(&self, name: &str, queue_path: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::UserGroup,
            name,
            "",
            queue_path,
            EventChangeType::Remove,
            EventChangeDetail::UserGroupLimitRemove,
            None,
            "",
        ));
    }

    /// Emit an application to group link record
    pub fn send_app_linked(&self, group: &str, app_id: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::UserGroup,
            group,
            "",
            app_id,
            EventChangeType::Add,
            EventChangeDetail::UserGroupAppLink,
            None,
            "",
        ));
    }

    /// Emit an application to group unlink record
    pub fn send_app_unlinked(&self, group: &str, app_id: &str) {
        if !self.store.is_event_tracking_enabled() {
            return;
        }
        self.store.store(EventRecord::new(
            EventRecordType::UserGroup,
            group,
            "",
            app_id,
            EventChangeType::Remove,
            EventChangeDetail::UserGroupAppUnlink,
            None,
            "",
        ));
    }
}
