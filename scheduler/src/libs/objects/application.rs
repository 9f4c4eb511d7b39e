//! An application submitted to a partition
//!
//! An application owns its pending asks and its allocations by key and walks
//! a state machine from New to one of the terminal states. Every transition
//! is appended to the state log and emitted as an observability event.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{event, Level};

use gantry::models::dao::{ApplicationDAOInfo, PlaceholderDAOInfo, StateDAOInfo};
use gantry::models::events::EventChangeDetail;
use gantry::models::{
    component_wise_min, partition_name_without_cluster_id, Resource, TerminationType, UserGroup,
    CREATION_FORCE_TAG,
};
use gantry::Error;

use super::allocation::{Allocation, Ask};
use crate::libs::events::ApplicationEvents;

/// The states an application moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationState {
    /// The application was submitted but not yet admitted
    New,
    /// The application was admitted to its queue
    Accepted,
    /// The application received its first allocation
    Starting,
    /// The application has confirmed allocations
    Running,
    /// The application is releasing its last allocations
    Completing,
    /// The application finished cleanly
    Completed,
    /// The application is failing
    Failing,
    /// The application failed
    Failed,
    /// The application was rejected
    Rejected,
    /// The application expired without running
    Expired,
}

impl ApplicationState {
    /// Cast our state to a str
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ApplicationState::New => "New",
            ApplicationState::Accepted => "Accepted",
            ApplicationState::Starting => "Starting",
            ApplicationState::Running => "Running",
            ApplicationState::Completing => "Completing",
            ApplicationState::Completed => "Completed",
            ApplicationState::Failing => "Failing",
            ApplicationState::Failed => "Failed",
            ApplicationState::Rejected => "Rejected",
            ApplicationState::Expired => "Expired",
        }
    }

    /// Check whether this state is terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplicationState::Completed
                | ApplicationState::Failed
                | ApplicationState::Rejected
                | ApplicationState::Expired
        )
    }

    /// The event detail emitted when this state is entered
    fn change_detail(&self) -> EventChangeDetail {
        match self {
            ApplicationState::New => EventChangeDetail::AppNew,
            ApplicationState::Accepted => EventChangeDetail::AppAccepted,
            ApplicationState::Starting => EventChangeDetail::AppStarting,
            ApplicationState::Running => EventChangeDetail::AppRunning,
            ApplicationState::Completing => EventChangeDetail::AppCompleting,
            ApplicationState::Completed => EventChangeDetail::AppCompleted,
            ApplicationState::Failing => EventChangeDetail::AppFailing,
            ApplicationState::Failed => EventChangeDetail::AppFailed,
            ApplicationState::Rejected => EventChangeDetail::AppReject,
            ApplicationState::Expired => EventChangeDetail::AppExpired,
        }
    }

    /// Check whether this state may transition to another
    ///
    /// # Arguments
    ///
    /// * `target` - The state to transition to
    fn can_transition(&self, target: ApplicationState) -> bool {
        use ApplicationState as S;
        matches!(
            (self, target),
            (S::New, S::Accepted | S::Rejected | S::Failing | S::Expired)
                | (S::Accepted, S::Starting | S::Completing | S::Failing | S::Expired)
                | (S::Starting, S::Running | S::Completing | S::Failing)
                | (S::Running, S::Completing | S::Failing)
                | (S::Completing, S::Completed | S::Running | S::Failing)
                | (S::Failing, S::Failed)
        )
    }
}

/// The placeholder accounting for one task group
#[derive(Debug, Clone, Default)]
pub struct PlaceholderData {
    /// The task group these placeholders belong to
    pub task_group: String,
    /// How many placeholders were requested
    pub count: u64,
    /// The smallest resource shape seen for this task group
    pub min_resource: Resource,
    /// How many placeholders were replaced by real allocations
    pub replaced: u64,
    /// How many placeholders timed out
    pub timed_out: u64,
}

/// One entry in an application's state log
#[derive(Debug, Clone)]
pub struct StateLogEntry {
    /// When the transition happened
    pub time: DateTime<Utc>,
    /// The state the application entered
    pub state: ApplicationState,
}

/// The mutable state of an application
struct AppState {
    /// The current state of this application
    state: ApplicationState,
    /// The queue this application was placed in
    queue_path: String,
    /// The pending asks of this application by key
    asks: HashMap<String, Arc<Ask>>,
    /// The resources pending over all asks
    pending: Resource,
    /// The allocations of this application by key
    allocations: HashMap<String, Arc<Allocation>>,
    /// The resources allocated over all allocations
    allocated: Resource,
    /// The placeholder accounting per task group
    placeholders: HashMap<String, PlaceholderData>,
    /// The ask keys this application holds reservations for
    reservations: HashSet<String>,
    /// The highest priority over the pending asks
    max_ask_priority: i32,
    /// The recorded state transitions
    state_log: Vec<StateLogEntry>,
    /// Why this application was rejected if it was
    rejected_message: String,
    /// Whether the queue limits allow this application to run
    queue_runnable: bool,
    /// Whether the user and group quotas allow this application to run
    quota_runnable: bool,
}

/// An application submitted to a partition
pub struct Application {
    /// The id of this application
    pub application_id: String,
    /// The fully qualified partition this application runs in
    pub partition: String,
    /// The user this application was submitted by
    pub user: UserGroup,
    /// When this application was submitted
    pub submission_time: DateTime<Utc>,
    /// Tags carried by this application
    pub tags: HashMap<String, String>,
    /// The mutable state of this application
    state: RwLock<AppState>,
    /// The event source for application records
    events: ApplicationEvents,
}

impl Application {
    /// Create a new application
    ///
    /// # Arguments
    ///
    /// * `application_id` - The id of the application
    /// * `partition` - The fully qualified partition it runs in
    /// * `queue_path` - The queue path it asked for
    /// * `user` - The submitting user and groups
    /// * `tags` - The tags carried by the application
    /// * `events` - The event source for application records
    #[must_use]
    pub fn new(
        application_id: &str,
        partition: &str,
        queue_path: &str,
        user: UserGroup,
        tags: HashMap<String, String>,
        events: ApplicationEvents,
    ) -> Self {
        let app = Application {
            application_id: application_id.to_owned(),
            partition: partition.to_owned(),
            user,
            submission_time: Utc::now(),
            tags,
            state: RwLock::new(AppState {
                state: ApplicationState::New,
                queue_path: queue_path.to_lowercase(),
                asks: HashMap::default(),
                pending: Resource::new(),
                allocations: HashMap::default(),
                allocated: Resource::new(),
                placeholders: HashMap::default(),
                reservations: HashSet::default(),
                max_ask_priority: 0,
                state_log: vec![StateLogEntry {
                    time: Utc::now(),
                    state: ApplicationState::New,
                }],
                rejected_message: String::new(),
                queue_runnable: true,
                quota_runnable: true,
            }),
            events,
        };
        app.events.send_new_application(application_id, "New");
        app
    }

    /// Check whether this application was force created for recovery
    #[must_use]
    pub fn is_create_forced(&self) -> bool {
        self.tags
            .get(CREATION_FORCE_TAG)
            .map(|value| value == "true")
            .unwrap_or_default()
    }

    /// Get the current state of this application
    #[must_use]
    pub fn current_state(&self) -> ApplicationState {
        self.state.read().state
    }

    /// Get the queue path this application was placed in
    #[must_use]
    pub fn queue_path(&self) -> String {
        self.state.read().queue_path.clone()
    }

    /// Set the queue path after placement resolved it
    ///
    /// # Arguments
    ///
    /// * `queue_path` - The queue path to place the application in
    pub fn set_queue_path(&self, queue_path: &str) {
        self.state.write().queue_path = queue_path.to_lowercase();
    }

    /// Check whether this application may receive allocations
    ///
    /// Both the queue limits and the user and group quotas have to allow it.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        let state = self.state.read();
        state.queue_runnable && state.quota_runnable
    }

    /// Park or unpark this application for its queue limits
    ///
    /// # Arguments
    ///
    /// * `runnable` - Whether the queue limits allow the application to run
    pub fn set_queue_runnable(&self, runnable: bool) {
        let mut state = self.state.write();
        if state.queue_runnable == runnable {
            return;
        }
        state.queue_runnable = runnable;
        let current = state.state;
        drop(state);
        if runnable {
            self.events
                .send_app_runnable_in_queue(&self.application_id, current.as_str());
        } else {
            self.events
                .send_app_not_runnable_in_queue(&self.application_id, current.as_str());
        }
    }

    /// Park or unpark this application for its user and group quotas
    ///
    /// # Arguments
    ///
    /// * `runnable` - Whether the quotas allow the application to run
    pub fn set_quota_runnable(&self, runnable: bool) {
        let mut state = self.state.write();
        if state.quota_runnable == runnable {
            return;
        }
        state.quota_runnable = runnable;
        let current = state.state;
        drop(state);
        if runnable {
            self.events
                .send_app_runnable_quota(&self.application_id, current.as_str());
        } else {
            self.events
                .send_app_not_runnable_quota(&self.application_id, current.as_str());
        }
    }

    /// Drive the application state machine to a new state
    ///
    /// Invalid transitions are logged and dropped rather than applied.
    ///
    /// # Arguments
    ///
    /// * `target` - The state to transition to
    /// * `message` - The message recorded with the transition
    pub fn transition(&self, target: ApplicationState, message: &str) {
        let mut state = self.state.write();
        if state.state == target {
            return;
        }
        if !state.state.can_transition(target) {
            event!(
                Level::WARN,
                application = %self.application_id,
                from = state.state.as_str(),
                to = target.as_str(),
                msg = "invalid application state transition"
            );
            return;
        }
        state.state = target;
        state.state_log.push(StateLogEntry {
            time: Utc::now(),
            state: target,
        });
        if target == ApplicationState::Rejected {
            state.rejected_message = message.to_owned();
        }
        drop(state);
        self.events.send_state_change(
            &self.application_id,
            target.change_detail(),
            message,
            target.as_str(),
        );
    }

    /// Add a pending ask to this application
    ///
    /// # Arguments
    ///
    /// * `ask` - The ask to add
    pub fn add_ask(&self, ask: Arc<Ask>) -> Result<(), Error> {
        let mut state = self.state.write();
        // stopped applications no longer take work
        if state.state.is_terminal() {
            return Err(Error::new(format!(
                "application {} is {} and cannot accept new requests",
                self.application_id,
                state.state.as_str()
            )));
        }
        if state.asks.contains_key(&ask.allocation_key) {
            return Err(Error::new(format!(
                "ask {} already exists on application {}",
                ask.allocation_key, self.application_id
            )));
        }
        state.pending += &ask.resource;
        state.max_ask_priority = state.max_ask_priority.max(ask.priority);
        // track placeholder shapes per task group
        if ask.placeholder {
            if let Some(task_group) = &ask.task_group {
                let data = state
                    .placeholders
                    .entry(task_group.clone())
                    .or_insert_with(|| PlaceholderData {
                        task_group: task_group.clone(),
                        min_resource: ask.resource.clone(),
                        ..Default::default()
                    });
                data.count += 1;
                data.min_resource = component_wise_min(Some(&data.min_resource), Some(&ask.resource))
                    .unwrap_or_default();
            }
        }
        let current = state.state.as_str().to_owned();
        state.asks.insert(ask.allocation_key.clone(), ask.clone());
        drop(state);
        self.events
            .send_new_ask(&self.application_id, &ask.allocation_key, &ask.resource, &current);
        Ok(())
    }

    /// Remove a pending ask from this application
    ///
    /// # Arguments
    ///
    /// * `allocation_key` - The key of the ask to remove
    /// * `detail` - The event detail explaining the removal
    pub fn remove_ask(&self, allocation_key: &str, detail: EventChangeDetail) -> Option<Arc<Ask>> {
        let mut state = self.state.write();
        let ask = state.asks.remove(allocation_key)?;
        state.pending -= &ask.resource;
        // recompute the max priority over the remaining asks
        state.max_ask_priority = state.asks.values().map(|a| a.priority).max().unwrap_or(0);
        let current = state.state.as_str().to_owned();
        drop(state);
        self.events
            .send_remove_ask(&self.application_id, allocation_key, &ask.resource, detail, &current);
        Some(ask)
    }

    /// Get a pending ask by key
    ///
    /// # Arguments
    ///
    /// * `allocation_key` - The key of the ask to get
    #[must_use]
    pub fn get_ask(&self, allocation_key: &str) -> Option<Arc<Ask>> {
        self.state.read().asks.get(allocation_key).cloned()
    }

    /// Get the pending asks ordered for scheduling
    ///
    /// Asks are ordered by priority descending then submission time, stable
    /// on the allocation key.
    #[must_use]
    pub fn sorted_asks(&self) -> Vec<Arc<Ask>> {
        let state = self.state.read();
        let mut asks: Vec<_> = state.asks.values().cloned().collect();
        asks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.create_time.cmp(&b.create_time))
                .then_with(|| a.allocation_key.cmp(&b.allocation_key))
        });
        asks
    }

    /// Attach a proposed allocation to this application
    ///
    /// The first allocation moves the application into Starting.
    ///
    /// # Arguments
    ///
    /// * `alloc` - The proposed allocation to attach
    pub fn add_allocation(&self, alloc: Arc<Allocation>) {
        let mut state = self.state.write();
        state.allocated += &alloc.resource;
        state
            .allocations
            .insert(alloc.allocation_key.clone(), alloc.clone());
        let current = state.state;
        drop(state);
        // the first allocation starts the application
        match current {
            ApplicationState::New | ApplicationState::Accepted => {
                self.transition(ApplicationState::Starting, "first allocation proposed");
            }
            ApplicationState::Completing => {
                self.transition(ApplicationState::Running, "allocation proposed while completing");
            }
            _ => {}
        }
        self.events.send_new_allocation(
            &self.application_id,
            &alloc.allocation_key,
            &alloc.resource,
            self.current_state().as_str(),
        );
    }

    /// Confirm a proposed allocation reported back by its node
    ///
    /// # Arguments
    ///
    /// * `allocation_key` - The key of the allocation to confirm
    pub fn confirm_allocation(&self, allocation_key: &str) -> Option<Arc<Allocation>> {
        let state = self.state.read();
        let alloc = state.allocations.get(allocation_key)?.clone();
        drop(state);
        if !alloc.is_confirmed() {
            alloc.confirm();
            if self.current_state() == ApplicationState::Starting {
                self.transition(ApplicationState::Running, "allocation confirmed");
            }
        }
        Some(alloc)
    }

    /// Remove an allocation from this application
    ///
    /// Removing the last allocation of an application with no pending asks
    /// moves it into Completing.
    ///
    /// # Arguments
    ///
    /// * `allocation_key` - The key of the allocation to remove
    /// * `termination` - Why the allocation was removed
    pub fn remove_allocation(
        &self,
        allocation_key: &str,
        termination: TerminationType,
    ) -> Option<Arc<Allocation>> {
        let mut state = self.state.write();
        let alloc = state.allocations.remove(allocation_key)?;
        state.allocated -= &alloc.resource;
        // track placeholder replacements and timeouts per task group
        if alloc.placeholder {
            if let Some(task_group) = &alloc.task_group {
                if let Some(data) = state.placeholders.get_mut(task_group) {
                    match termination {
                        TerminationType::PlaceholderReplaced => data.replaced += 1,
                        TerminationType::Timeout => data.timed_out += 1,
                        _ => {}
                    }
                }
            }
        }
        let empty = state.allocations.is_empty() && state.asks.is_empty();
        let current = state.state;
        drop(state);
        self.events.send_remove_allocation(
            &self.application_id,
            allocation_key,
            &alloc.resource,
            termination,
            current.as_str(),
        );
        if empty && matches!(current, ApplicationState::Starting | ApplicationState::Running) {
            self.transition(ApplicationState::Completing, "last allocation removed");
            self.transition(ApplicationState::Completed, "no remaining work");
        }
        Some(alloc)
    }

    /// Get all allocations of this application
    #[must_use]
    pub fn allocations(&self) -> Vec<Arc<Allocation>> {
        self.state.read().allocations.values().cloned().collect()
    }

    /// Get an allocation by key
    ///
    /// # Arguments
    ///
    /// * `allocation_key` - The key of the allocation to get
    #[must_use]
    pub fn get_allocation(&self, allocation_key: &str) -> Option<Arc<Allocation>> {
        self.state.read().allocations.get(allocation_key).cloned()
    }

    /// Get the resources pending over all asks
    #[must_use]
    pub fn pending(&self) -> Resource {
        self.state.read().pending.clone()
    }

    /// Get the resources allocated over all allocations
    #[must_use]
    pub fn allocated(&self) -> Resource {
        self.state.read().allocated.clone()
    }

    /// Check whether this application has pending asks
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.state.read().asks.is_empty()
    }

    /// Get the highest priority over the pending asks
    #[must_use]
    pub fn max_ask_priority(&self) -> i32 {
        self.state.read().max_ask_priority
    }

    /// Emit the removal record for this application
    pub fn emit_removed(&self) {
        self.events
            .send_remove_application(&self.application_id, self.current_state().as_str());
    }

    /// Track a reservation held by one of this application's asks
    ///
    /// # Arguments
    ///
    /// * `allocation_key` - The key of the reserving ask
    pub fn reserve(&self, allocation_key: &str) {
        self.state.write().reservations.insert(allocation_key.to_owned());
    }

    /// Drop a tracked reservation
    ///
    /// # Arguments
    ///
    /// * `allocation_key` - The key of the reserving ask
    pub fn unreserve(&self, allocation_key: &str) {
        self.state.write().reservations.remove(allocation_key);
    }

    /// Build the DAO projection of this application
    #[must_use]
    pub fn dao(&self) -> ApplicationDAOInfo {
        let state = self.state.read();
        let mut requests: Vec<_> = state.asks.values().map(|ask| ask.dao()).collect();
        requests.sort_by(|a, b| a.allocation_key.cmp(&b.allocation_key));
        let mut allocations: Vec<_> = state.allocations.values().map(|alloc| alloc.dao()).collect();
        allocations.sort_by(|a, b| a.allocation_key.cmp(&b.allocation_key));
        let mut placeholder_data: Vec<_> = state
            .placeholders
            .values()
            .map(|data| PlaceholderDAOInfo {
                task_group_name: data.task_group.clone(),
                count: data.count,
                min_resource: data.min_resource.clone(),
                replaced: data.replaced,
                timed_out: data.timed_out,
            })
            .collect();
        placeholder_data.sort_by(|a, b| a.task_group_name.cmp(&b.task_group_name));
        let mut reservations: Vec<_> = state.reservations.iter().cloned().collect();
        reservations.sort();
        ApplicationDAOInfo {
            application_id: self.application_id.clone(),
            partition: partition_name_without_cluster_id(&self.partition).to_owned(),
            queue_name: state.queue_path.clone(),
            submission_time: self
                .submission_time
                .timestamp_nanos_opt()
                .unwrap_or_default(),
            state: state.state.as_str().to_owned(),
            user: self.user.user.clone(),
            groups: self.user.groups.clone(),
            used_resource: state.allocated.clone(),
            pending_resource: state.pending.clone(),
            max_request_priority: state.max_ask_priority,
            requests,
            allocations,
            placeholder_data,
            has_reserved: !state.reservations.is_empty(),
            reservations,
            state_log: state
                .state_log
                .iter()
                .map(|entry| StateDAOInfo {
                    time: entry.time.timestamp_nanos_opt().unwrap_or_default(),
                    application_state: entry.state.as_str().to_owned(),
                })
                .collect(),
            rejected_message: state.rejected_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::events::EventStore;
    use gantry::models::messages;

    /// Build a throwaway application for tests
    fn generate_app(id: &str) -> Application {
        let store = Arc::new(EventStore::new(100, false));
        Application::new(
            id,
            "[test]rm.default",
            "root.batch",
            UserGroup::new("alice", vec!["devs".to_owned()]),
            HashMap::default(),
            ApplicationEvents::new(&store),
        )
    }

    /// Build a throwaway ask for tests
    fn generate_ask(app: &str, key: &str, memory: u64, priority: i32) -> Arc<Ask> {
        Arc::new(Ask::from_wire(&messages::Allocation {
            allocation_key: key.to_owned(),
            application_id: app.to_owned(),
            resource_per_alloc: Resource::from_pairs([("memory", memory)]),
            priority,
            ..Default::default()
        }))
    }

    #[test]
    fn state_machine_happy_path() {
        let app = generate_app("app-1");
        assert_eq!(app.current_state(), ApplicationState::New);
        app.transition(ApplicationState::Accepted, "");
        app.add_ask(generate_ask("app-1", "ask-1", 4, 0)).unwrap();
        let ask = app.get_ask("ask-1").unwrap();
        let alloc = Arc::new(Allocation::from_ask(&ask, "node-1"));
        app.remove_ask("ask-1", EventChangeDetail::DetailsNone);
        app.add_allocation(alloc);
        assert_eq!(app.current_state(), ApplicationState::Starting);
        app.confirm_allocation("ask-1").unwrap();
        assert_eq!(app.current_state(), ApplicationState::Running);
        app.remove_allocation("ask-1", TerminationType::StoppedByRm);
        assert_eq!(app.current_state(), ApplicationState::Completed);
    }

    #[test]
    fn invalid_transition_is_dropped() {
        let app = generate_app("app-1");
        // New cannot jump straight to Running
        app.transition(ApplicationState::Running, "");
        assert_eq!(app.current_state(), ApplicationState::New);
        // terminal states stay terminal
        app.transition(ApplicationState::Rejected, "bad queue");
        app.transition(ApplicationState::Accepted, "");
        assert_eq!(app.current_state(), ApplicationState::Rejected);
    }

    #[test]
    fn pending_tracks_asks() {
        let app = generate_app("app-1");
        app.add_ask(generate_ask("app-1", "ask-1", 4, 1)).unwrap();
        app.add_ask(generate_ask("app-1", "ask-2", 3, 5)).unwrap();
        assert_eq!(app.pending().get("memory"), 7);
        // duplicate keys are rejected
        assert!(app.add_ask(generate_ask("app-1", "ask-1", 1, 0)).is_err());
        app.remove_ask("ask-2", EventChangeDetail::DetailsNone);
        assert_eq!(app.pending().get("memory"), 4);
    }

    #[test]
    fn asks_sort_by_priority_then_fifo() {
        let app = generate_app("app-1");
        app.add_ask(generate_ask("app-1", "ask-low", 1, 1)).unwrap();
        app.add_ask(generate_ask("app-1", "ask-high", 1, 9)).unwrap();
        app.add_ask(generate_ask("app-1", "ask-mid", 1, 5)).unwrap();
        let order: Vec<_> = app
            .sorted_asks()
            .iter()
            .map(|ask| ask.allocation_key.clone())
            .collect();
        assert_eq!(order, vec!["ask-high", "ask-mid", "ask-low"]);
    }

    #[test]
    fn forced_creation_tag() {
        let store = Arc::new(EventStore::new(10, false));
        let mut tags = HashMap::default();
        tags.insert(CREATION_FORCE_TAG.to_owned(), "true".to_owned());
        let app = Application::new(
            "app-1",
            "[test]rm.default",
            "",
            UserGroup::default(),
            tags,
            ApplicationEvents::new(&store),
        );
        assert!(app.is_create_forced());
        assert!(!generate_app("app-2").is_create_forced());
    }

    #[test]
    fn placeholder_accounting() {
        let app = generate_app("app-1");
        let mut wire = messages::Allocation {
            allocation_key: "ph-1".to_owned(),
            application_id: "app-1".to_owned(),
            resource_per_alloc: Resource::from_pairs([("memory", 4)]),
            placeholder: true,
            task_group_name: "workers".to_owned(),
            ..Default::default()
        };
        app.add_ask(Arc::new(Ask::from_wire(&wire))).unwrap();
        wire.allocation_key = "ph-2".to_owned();
        wire.resource_per_alloc = Resource::from_pairs([("memory", 2)]);
        app.add_ask(Arc::new(Ask::from_wire(&wire))).unwrap();
        let dao = app.dao();
        assert_eq!(dao.placeholder_data.len(), 1);
        assert_eq!(dao.placeholder_data[0].count, 2);
        assert_eq!(dao.placeholder_data[0].min_resource.get("memory"), 2);
    }

    #[test]
    fn state_log_records_transitions() {
        let app = generate_app("app-1");
        app.transition(ApplicationState::Accepted, "");
        app.transition(ApplicationState::Starting, "");
        let dao = app.dao();
        let states: Vec<_> = dao
            .state_log
            .iter()
            .map(|entry| entry.application_state.clone())
            .collect();
        assert_eq!(states, vec!["New", "Accepted", "Starting"]);
    }

    #[test]
    fn runnable_flags_are_independent() {
        let store = Arc::new(EventStore::new(100, true));
        let app = Application::new(
            "app-1",
            "[test]rm.default",
            "root.batch",
            UserGroup::new("alice", Vec::default()),
            HashMap::default(),
            ApplicationEvents::new(&store),
        );
        assert!(app.is_runnable());
        // parking on quota alone parks the application
        app.set_quota_runnable(false);
        assert!(!app.is_runnable());
        app.set_queue_runnable(false);
        // lifting the quota limit leaves the queue limit in place
        app.set_quota_runnable(true);
        assert!(!app.is_runnable());
        app.set_queue_runnable(true);
        assert!(app.is_runnable());
        // each flip emitted its own record
        let details: Vec<_> = store
            .collect_events()
            .iter()
            .map(|record| record.change_detail)
            .collect();
        assert!(details.contains(&EventChangeDetail::AppCannotRunQuota));
        assert!(details.contains(&EventChangeDetail::AppRunnableQuota));
        assert!(details.contains(&EventChangeDetail::AppCannotRunQueue));
        assert!(details.contains(&EventChangeDetail::AppRunnableQueue));
    }
}
