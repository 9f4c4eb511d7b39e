//! The observability event records exported by the scheduler
//!
//! Event records are immutable once published. They describe a change to a
//! request, application, node, queue, or user/group tracker together with a
//! semantic reason and an optional resource snapshot.

use chrono::Utc;
use std::fmt;

use super::resources::Resource;

/// The kind of object an event record describes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRecordType {
    /// An allocation request
    Request,
    /// An application
    App,
    /// A node
    Node,
    /// A queue
    Queue,
    /// A user or group tracker
    UserGroup,
}

impl EventRecordType {
    /// Cast our record type to a str
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            EventRecordType::Request => "REQUEST",
            EventRecordType::App => "APP",
            EventRecordType::Node => "NODE",
            EventRecordType::Queue => "QUEUE",
            EventRecordType::UserGroup => "USERGROUP",
        }
    }
}

impl fmt::Display for EventRecordType {
    /// Cleanly print an event record type
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the object described by an event record changed
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventChangeType {
    /// No state change happened
    #[default]
    None,
    /// A value was set on the object
    Set,
    /// Something was added to the object
    Add,
    /// Something was removed from the object
    Remove,
}

/// The semantic reason behind an event record
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventChangeDetail {
    /// No extra detail
    #[default]
    DetailsNone,
    /// An allocation was cancelled by the resource manager
    AllocCancel,
    /// An allocation was preempted by the scheduler
    AllocPreempt,
    /// An allocation timed out
    AllocTimeout,
    /// A placeholder allocation was replaced
    AllocReplaced,
    /// An allocation was lost with its node
    AllocNodeRemoved,
    /// An application received an allocation
    AppAlloc,
    /// An application received a new request
    AppRequest,
    /// An application request was rejected
    AppRequestRejected,
    /// An application was rejected
    AppReject,
    /// An application entered the new state
    AppNew,
    /// An application was accepted
    AppAccepted,
    /// An application is starting
    AppStarting,
    /// An application is running
    AppRunning,
    /// An application is completing
    AppCompleting,
    /// An application completed
    AppCompleted,
    /// An application is failing
    AppFailing,
    /// An application failed
    AppFailed,
    /// An application expired
    AppExpired,
    /// An application cannot run due to a queue limit
    AppCannotRunQueue,
    /// An application became runnable in its queue
    AppRunnableQueue,
    /// An application cannot run due to a user or group quota
    AppCannotRunQuota,
    /// An application became runnable under its quota
    AppRunnableQuota,
    /// A node allocation changed
    NodeAlloc,
    /// A node capacity changed
    NodeCapacity,
    /// A node occupied resource changed
    NodeOccupied,
    /// A node schedulable flag changed
    NodeSchedulable,
    /// A node was decomissioned
    NodeDecomission,
    /// A node reservation changed
    NodeReservation,
    /// A queue max resource changed
    QueueMax,
    /// A queue guaranteed resource changed
    QueueGuaranteed,
    /// A dynamic queue was created
    QueueDynamic,
    /// A queue state changed
    QueueState,
    /// A user or group limit was set
    UserGroupLimitSet,
    /// A user or group limit was removed
    UserGroupLimitRemove,
    /// An application was linked to a group
    UserGroupAppLink,
    /// An application was unlinked from a group
    UserGroupAppUnlink,
    /// Tracked usage increased
    UserGroupUsageInc,
    /// Tracked usage decreased
    UserGroupUsageDec,
}

/// An immutable observability event record
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// The kind of object this record describes
    #[serde(rename = "Type")]
    pub event_type: EventRecordType,
    /// The id of the object this record describes
    #[serde(rename = "ObjectID")]
    pub object_id: String,
    /// The id of a related object if any
    #[serde(rename = "ReferenceID", default)]
    pub reference_id: String,
    /// A human readable message
    #[serde(rename = "Message", default)]
    pub message: String,
    /// When this record was created in nanoseconds since the epoch
    #[serde(rename = "TimestampNano")]
    pub timestamp_nano: i64,
    /// How the object changed
    #[serde(rename = "EventChangeType", default)]
    pub change_type: EventChangeType,
    /// The semantic reason behind the change
    #[serde(rename = "EventChangeDetail", default)]
    pub change_detail: EventChangeDetail,
    /// A resource snapshot tied to the change if any
    #[serde(rename = "Resource", default)]
    pub resource: Option<Resource>,
    /// The state of the object after the change
    #[serde(rename = "State", default)]
    pub state: String,
}

/// Get the current time in nanoseconds since the epoch
fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

impl EventRecord {
    /// Create a new event record
    ///
    /// # Arguments
    ///
    /// * `event_type` - The kind of object this record describes
    /// * `object_id` - The id of the object this record describes
    /// * `message` - A human readable message
    /// * `reference_id` - The id of a related object if any
    /// * `change_type` - How the object changed
    /// * `change_detail` - The semantic reason behind the change
    /// * `resource` - A resource snapshot tied to the change if any
    /// * `state` - The state of the object after the change
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new<O: Into<String>, M: Into<String>, R: Into<String>, S: Into<String>>(
        event_type: EventRecordType,
        object_id: O,
        message: M,
        reference_id: R,
        change_type: EventChangeType,
        change_detail: EventChangeDetail,
        resource: Option<Resource>,
        state: S,
    ) -> Self {
        EventRecord {
            event_type,
            object_id: object_id.into(),
            reference_id: reference_id.into(),
            message: message.into(),
            timestamp_nano: now_nanos(),
            change_type,
            change_detail,
            resource,
            state: state.into(),
        }
    }

    /// Create a new request event record
    ///
    /// # Arguments
    ///
    /// * `object_id` - The allocation key this record describes
    /// * `reference_id` - The application the request belongs to
    /// * `message` - A human readable message
    /// * `resource` - A resource snapshot tied to the change if any
    /// * `state` - The state of the request after the change
    #[must_use]
    pub fn new_request<O: Into<String>, R: Into<String>, M: Into<String>, S: Into<String>>(
        object_id: O,
        reference_id: R,
        message: M,
        resource: Option<Resource>,
        state: S,
    ) -> Self {
        EventRecord::new(
            EventRecordType::Request,
            object_id,
            message,
            reference_id,
            EventChangeType::None,
            EventChangeDetail::DetailsNone,
            resource,
            state,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_carries_all_fields() {
        let resource = Resource::from_pairs([("memory", 8)]);
        let record = EventRecord::new(
            EventRecordType::App,
            "app-1",
            "allocated",
            "alloc-1",
            EventChangeType::Add,
            EventChangeDetail::AppAlloc,
            Some(resource.clone()),
            "Running",
        );
        assert_eq!(record.event_type, EventRecordType::App);
        assert_eq!(record.object_id, "app-1");
        assert_eq!(record.reference_id, "alloc-1");
        assert_eq!(record.change_type, EventChangeType::Add);
        assert_eq!(record.change_detail, EventChangeDetail::AppAlloc);
        assert_eq!(record.resource, Some(resource));
        assert_eq!(record.state, "Running");
        assert!(record.timestamp_nano > 0);
    }

    #[test]
    fn request_record_defaults() {
        let record = EventRecord::new_request("ask", "app", "m", None, "");
        assert_eq!(record.event_type, EventRecordType::Request);
        assert_eq!(record.change_type, EventChangeType::None);
        assert_eq!(record.change_detail, EventChangeDetail::DetailsNone);
    }
}
