//! A queue in the hierarchical scheduling tree
//!
//! Queues form an ordered tree rooted at `root`. Only leaves hold
//! applications. Pending, allocated, and preempting resources roll up the
//! tree so every parent always equals the sum of its children. Paths are
//! dot separated and compared lowercase.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tracing::{event, Level};

use gantry::conf::{ChildTemplate, QueueConfig, SortPolicy};
use gantry::models::dao::QueueDAOInfo;
use gantry::models::{abs_used_capacity, component_wise_min, Acl, Resource, UserGroup};
use gantry::Error;

use super::application::Application;
use crate::libs::events::QueueEvents;

/// The states a queue moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// The queue accepts applications and allocations
    Active,
    /// The queue is emptying out and takes no new work
    Draining,
    /// The queue is stopped and will be removed
    Stopped,
}

impl QueueState {
    /// Cast our state to a str
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            QueueState::Active => "Active",
            QueueState::Draining => "Draining",
            QueueState::Stopped => "Stopped",
        }
    }

    /// Check whether this state may transition to another
    ///
    /// # Arguments
    ///
    /// * `target` - The state to transition to
    fn can_transition(&self, target: QueueState) -> bool {
        matches!(
            (self, target),
            (QueueState::Active, QueueState::Draining)
                | (QueueState::Draining, QueueState::Active | QueueState::Stopped)
        )
    }
}

/// The mutable state of a scheduling queue
struct QueueInner {
    /// The state of this queue
    state: QueueState,
    /// The children of this queue by lowercase name
    children: BTreeMap<String, Arc<SchedulingQueue>>,
    /// The applications on this queue, leaves only
    apps: HashMap<String, Arc<Application>>,
    /// The resources pending below this queue
    pending: Resource,
    /// The resources allocated below this queue
    allocated: Resource,
    /// The resources marked for preemption below this queue
    preempting: Resource,
    /// The guaranteed resources for this queue
    guaranteed: Resource,
    /// The maximum resources for this queue if set
    max: Option<Resource>,
    /// The properties set on this queue
    properties: HashMap<String, String>,
    /// The ACL controlling who may submit to this queue
    submit_acl: Acl,
    /// The ACL controlling who may administer this queue
    admin_acl: Acl,
    /// The maximum number of running applications if set
    max_running_apps: Option<u64>,
    /// The number of running applications below this queue
    running_apps: u64,
    /// How this queue orders children and applications
    sort_policy: SortPolicy,
    /// The template stamped onto dynamically created children
    child_template: Option<ChildTemplate>,
    /// When this queue first went from idle to having pending work
    pending_since: Option<DateTime<Utc>>,
}

/// A queue in the hierarchical scheduling tree
pub struct SchedulingQueue {
    /// The lowercase name of this queue, the last path segment
    pub name: String,
    /// The fully qualified lowercase path of this queue
    pub path: String,
    /// Whether this queue came from configuration
    pub managed: bool,
    /// The parent of this queue, unset for root
    parent: Weak<SchedulingQueue>,
    /// The mutable state of this queue
    state: RwLock<QueueInner>,
    /// The event source for queue records
    events: QueueEvents,
}

impl SchedulingQueue {
    /// Create the root queue of a partition
    ///
    /// The root submit ACL defaults to everyone so access control lives on
    /// the child queues unless configured otherwise.
    ///
    /// # Arguments
    ///
    /// * `events` - The event source for queue records
    #[must_use]
    pub fn new_root(events: QueueEvents) -> Arc<Self> {
        let root = Arc::new(SchedulingQueue {
            name: "root".to_owned(),
            path: "root".to_owned(),
            managed: true,
            parent: Weak::new(),
            state: RwLock::new(QueueInner {
                state: QueueState::Active,
                children: BTreeMap::default(),
                apps: HashMap::default(),
                pending: Resource::new(),
                allocated: Resource::new(),
                preempting: Resource::new(),
                guaranteed: Resource::new(),
                max: None,
                properties: HashMap::default(),
                submit_acl: Acl::allow_all(),
                admin_acl: Acl::allow_all(),
                max_running_apps: None,
                running_apps: 0,
                sort_policy: SortPolicy::default(),
                child_template: None,
                pending_since: None,
            }),
            events,
        });
        root.events.send_new_queue(&root.path, false, "Active");
        root
    }

    /// Create a child under a parent queue
    ///
    /// # Arguments
    ///
    /// * `parent` - The parent to hang the child under
    /// * `name` - The name of the child queue
    /// * `managed` - Whether the child came from configuration
    pub fn new_child(
        parent: &Arc<SchedulingQueue>,
        name: &str,
        managed: bool,
    ) -> Result<Arc<Self>, Error> {
        let name = name.to_lowercase();
        let mut parent_state = parent.state.write();
        // queues holding applications cannot become parents
        if !parent_state.apps.is_empty() {
            return Err(Error::new(format!(
                "queue {} holds applications and cannot get child {name}",
                parent.path
            )));
        }
        if parent_state.children.contains_key(&name) {
            return Err(Error::new(format!(
                "queue {name} already exists under {}",
                parent.path
            )));
        }
        // dynamic children start from the parent's child template
        let template = parent_state.child_template.clone();
        let child = Arc::new(SchedulingQueue {
            name: name.clone(),
            path: format!("{}.{name}", parent.path),
            managed,
            parent: Arc::downgrade(parent),
            state: RwLock::new(QueueInner {
                state: parent_state.state,
                children: BTreeMap::default(),
                apps: HashMap::default(),
                pending: Resource::new(),
                allocated: Resource::new(),
                preempting: Resource::new(),
                guaranteed: Resource::new(),
                max: None,
                properties: HashMap::default(),
                submit_acl: Acl::default(),
                admin_acl: Acl::default(),
                max_running_apps: None,
                running_apps: 0,
                sort_policy: parent_state.sort_policy,
                child_template: None,
                pending_since: None,
            }),
            events: parent.events.clone(),
        });
        parent_state.children.insert(name, child.clone());
        drop(parent_state);
        // stamp the template onto dynamically created children
        if !managed {
            if let Some(template) = template {
                child.apply_template(&template);
            }
        }
        child
            .events
            .send_new_queue(&child.path, !managed, child.current_state().as_str());
        Ok(child)
    }

    /// Apply a queue configuration to this queue
    ///
    /// # Arguments
    ///
    /// * `config` - The queue configuration to apply
    pub fn apply_config(&self, config: &QueueConfig) {
        let mut state = self.state.write();
        // root keeps its allow all default when no ACL is configured
        if !config.submit_acl.is_empty() || self.parent.upgrade().is_some() {
            state.submit_acl = Acl::parse(&config.submit_acl);
        }
        if !config.admin_acl.is_empty() || self.parent.upgrade().is_some() {
            state.admin_acl = Acl::parse(&config.admin_acl);
        }
        state.properties = config.properties.clone();
        state.max_running_apps = config.max_applications;
        state.sort_policy = config.sort_policy;
        state.child_template = config.child_template.clone();
        let guaranteed = config.resources.guaranteed_resource();
        let max = config.resources.max_resource();
        let guaranteed_changed = state.guaranteed != guaranteed;
        let max_changed = state.max != max;
        state.guaranteed = guaranteed.clone();
        state.max = max.clone();
        let current = state.state.as_str().to_owned();
        drop(state);
        if guaranteed_changed {
            self.events
                .send_guaranteed_changed(&self.path, &guaranteed, &current);
        }
        if max_changed {
            self.events
                .send_max_changed(&self.path, &max.unwrap_or_default(), &current);
        }
    }

    /// Apply a dynamic child template to this queue
    ///
    /// # Arguments
    ///
    /// * `template` - The template to apply
    fn apply_template(&self, template: &ChildTemplate) {
        let mut state = self.state.write();
        state.properties = template.properties.clone();
        state.max_running_apps = template.max_applications;
        state.guaranteed = template.resources.guaranteed_resource();
        state.max = template.resources.max_resource();
    }

    /// Get the current state of this queue
    #[must_use]
    pub fn current_state(&self) -> QueueState {
        self.state.read().state
    }

    /// Drive the queue state machine to a new state
    ///
    /// A more restrictive state propagates down so a parent is always at
    /// least as permissive as any descendant. Invalid transitions are logged
    /// and dropped.
    ///
    /// # Arguments
    ///
    /// * `target` - The state to transition to
    pub fn set_state(&self, target: QueueState) {
        let mut state = self.state.write();
        if state.state == target {
            return;
        }
        if !state.state.can_transition(target) {
            event!(
                Level::WARN,
                queue = %self.path,
                from = state.state.as_str(),
                to = target.as_str(),
                msg = "invalid queue state transition"
            );
            return;
        }
        state.state = target;
        let children: Vec<_> = state.children.values().cloned().collect();
        drop(state);
        self.events.send_state_change(&self.path, target.as_str());
        // restrictive states flow down the tree
        if target != QueueState::Active {
            for child in children {
                child.set_state(target);
            }
        }
    }

    /// Check whether this queue is a leaf
    ///
    /// A queue with children is never a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.state.read().children.is_empty()
    }

    /// Get a child of this queue by name
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the child, compared lowercase
    #[must_use]
    pub fn get_child(&self, name: &str) -> Option<Arc<SchedulingQueue>> {
        self.state.read().children.get(&name.to_lowercase()).cloned()
    }

    /// Get all children of this queue
    #[must_use]
    pub fn children(&self) -> Vec<Arc<SchedulingQueue>> {
        self.state.read().children.values().cloned().collect()
    }

    /// Remove a child of this queue by name
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the child to remove
    pub fn remove_child(&self, name: &str) {
        let mut state = self.state.write();
        if let Some(child) = state.children.remove(&name.to_lowercase()) {
            drop(state);
            child
                .events
                .send_remove_queue(&child.path, child.current_state().as_str());
        }
    }

    /// Check whether a dynamic queue is eligible for garbage collection
    #[must_use]
    pub fn is_gc_eligible(&self) -> bool {
        if self.managed {
            return false;
        }
        let state = self.state.read();
        state.children.is_empty()
            && state.apps.is_empty()
            && state.pending.is_zero()
            && state.allocated.is_zero()
    }

    /// Check whether a user may submit to this queue
    ///
    /// Access is granted by this queue or any queue above it.
    ///
    /// # Arguments
    ///
    /// * `user` - The user and groups to check
    #[must_use]
    pub fn check_submit_access(&self, user: &UserGroup) -> bool {
        if self.state.read().submit_acl.allow_access(user) {
            return true;
        }
        match self.parent.upgrade() {
            Some(parent) => parent.check_submit_access(user),
            None => false,
        }
    }

    /// Check whether a user may administer this queue
    ///
    /// # Arguments
    ///
    /// * `user` - The user and groups to check
    #[must_use]
    pub fn check_admin_access(&self, user: &UserGroup) -> bool {
        if self.state.read().admin_acl.allow_access(user) {
            return true;
        }
        match self.parent.upgrade() {
            Some(parent) => parent.check_admin_access(user),
            None => false,
        }
    }

    /// Attach an application to this leaf queue
    ///
    /// # Arguments
    ///
    /// * `app` - The application to attach
    pub fn add_application(&self, app: Arc<Application>) -> Result<(), Error> {
        let mut state = self.state.write();
        // only leaves hold applications
        if !state.children.is_empty() {
            return Err(Error::new(format!("queue {} is not a leaf", self.path)));
        }
        // stopped and draining queues reject new applications
        if state.state != QueueState::Active {
            return Err(Error::new(format!(
                "queue {} is {} and rejects new applications",
                self.path,
                state.state.as_str()
            )));
        }
        state.apps.insert(app.application_id.clone(), app);
        Ok(())
    }

    /// Detach an application from this queue
    ///
    /// # Arguments
    ///
    /// * `application_id` - The id of the application to detach
    pub fn remove_application(&self, application_id: &str) -> Option<Arc<Application>> {
        self.state.write().apps.remove(application_id)
    }

    /// Get the applications on this queue ordered for scheduling
    ///
    /// Applications are ordered by their highest pending priority, then by
    /// the queue sort policy, stable on submission time and id.
    #[must_use]
    pub fn sorted_applications(&self) -> Vec<Arc<Application>> {
        let state = self.state.read();
        let policy = state.sort_policy;
        let guaranteed = state.guaranteed.clone();
        let mut apps: Vec<_> = state.apps.values().cloned().collect();
        drop(state);
        apps.sort_by(|a, b| {
            b.max_ask_priority()
                .cmp(&a.max_ask_priority())
                .then_with(|| match policy {
                    SortPolicy::Fair => a
                        .allocated()
                        .fair_share_ratio(&guaranteed)
                        .partial_cmp(&b.allocated().fair_share_ratio(&guaranteed))
                        .unwrap_or(std::cmp::Ordering::Equal),
                    SortPolicy::Fifo => std::cmp::Ordering::Equal,
                    SortPolicy::StateAware => {
                        // started applications go before new ones
                        let a_started = !a.allocations().is_empty();
                        let b_started = !b.allocations().is_empty();
                        b_started.cmp(&a_started)
                    }
                })
                .then_with(|| a.submission_time.cmp(&b.submission_time))
                .then_with(|| a.application_id.cmp(&b.application_id))
        });
        apps
    }

    /// Get the children of this queue ordered for scheduling
    ///
    /// Fair ordering sorts by used over guaranteed share ascending, FIFO by
    /// first pending ask time. Ties resolve on the queue path.
    #[must_use]
    pub fn sorted_children(&self) -> Vec<Arc<SchedulingQueue>> {
        let state = self.state.read();
        let policy = state.sort_policy;
        let mut children: Vec<_> = state.children.values().cloned().collect();
        drop(state);
        children.sort_by(|a, b| {
            let ordering = match policy {
                SortPolicy::Fair | SortPolicy::StateAware => {
                    let a_state = a.state.read();
                    let b_state = b.state.read();
                    let a_ratio = a_state.allocated.fair_share_ratio(&a_state.guaranteed);
                    let b_ratio = b_state.allocated.fair_share_ratio(&b_state.guaranteed);
                    a_ratio
                        .partial_cmp(&b_ratio)
                        .unwrap_or(std::cmp::Ordering::Equal)
                }
                SortPolicy::Fifo => {
                    let a_since = a.state.read().pending_since;
                    let b_since = b.state.read().pending_since;
                    // queues with no pending work sort last
                    match (a_since, b_since) {
                        (Some(a_time), Some(b_time)) => a_time.cmp(&b_time),
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    }
                }
            };
            ordering.then_with(|| a.path.cmp(&b.path))
        });
        children
    }

    /// Add pending resources to this queue and every ancestor
    ///
    /// # Arguments
    ///
    /// * `delta` - The pending resources to add
    pub fn inc_pending(self: &Arc<Self>, delta: &Resource) {
        let mut current = Some(self.clone());
        while let Some(queue) = current {
            let mut state = queue.state.write();
            state.pending += delta;
            if state.pending_since.is_none() && !state.pending.is_zero() {
                state.pending_since = Some(Utc::now());
            }
            drop(state);
            current = queue.parent.upgrade();
        }
    }

    /// Remove pending resources from this queue and every ancestor
    ///
    /// # Arguments
    ///
    /// * `delta` - The pending resources to remove
    pub fn dec_pending(self: &Arc<Self>, delta: &Resource) {
        let mut current = Some(self.clone());
        while let Some(queue) = current {
            let mut state = queue.state.write();
            state.pending -= delta;
            if state.pending.is_zero() {
                state.pending_since = None;
            }
            drop(state);
            current = queue.parent.upgrade();
        }
    }

    /// Add allocated resources to this queue and every ancestor
    ///
    /// # Arguments
    ///
    /// * `delta` - The allocated resources to add
    pub fn inc_allocated(self: &Arc<Self>, delta: &Resource) {
        let mut current = Some(self.clone());
        while let Some(queue) = current {
            queue.state.write().allocated += delta;
            current = queue.parent.upgrade();
        }
    }

    /// Remove allocated resources from this queue and every ancestor
    ///
    /// # Arguments
    ///
    /// * `delta` - The allocated resources to remove
    pub fn dec_allocated(self: &Arc<Self>, delta: &Resource) {
        let mut current = Some(self.clone());
        while let Some(queue) = current {
            queue.state.write().allocated -= delta;
            current = queue.parent.upgrade();
        }
    }

    /// Add preempting resources to this queue and every ancestor
    ///
    /// # Arguments
    ///
    /// * `delta` - The preempting resources to add
    pub fn inc_preempting(self: &Arc<Self>, delta: &Resource) {
        let mut current = Some(self.clone());
        while let Some(queue) = current {
            queue.state.write().preempting += delta;
            current = queue.parent.upgrade();
        }
    }

    /// Remove preempting resources from this queue and every ancestor
    ///
    /// # Arguments
    ///
    /// * `delta` - The preempting resources to remove
    pub fn dec_preempting(self: &Arc<Self>, delta: &Resource) {
        let mut current = Some(self.clone());
        while let Some(queue) = current {
            queue.state.write().preempting -= delta;
            current = queue.parent.upgrade();
        }
    }

    /// The remaining headroom of this queue considering every ancestor
    ///
    /// Headroom is the componentwise minimum of max minus allocated at every
    /// level that defines a max. Types a max leaves out stay unbounded. No
    /// level defining a max means unlimited headroom.
    #[must_use]
    pub fn headroom(&self) -> Option<Resource> {
        let parent_headroom = match self.parent.upgrade() {
            Some(parent) => parent.headroom(),
            None => None,
        };
        let state = self.state.read();
        let own = state
            .max
            .as_ref()
            .map(|max| max.sub_only_existing(&state.allocated));
        drop(state);
        component_wise_min(own.as_ref(), parent_headroom.as_ref())
    }

    /// Check whether one more application may run below every ancestor
    #[must_use]
    pub fn can_run_more_apps(self: &Arc<Self>) -> bool {
        let mut current = Some(self.clone());
        while let Some(queue) = current {
            let state = queue.state.read();
            if let Some(max) = state.max_running_apps {
                if state.running_apps >= max {
                    return false;
                }
            }
            drop(state);
            current = queue.parent.upgrade();
        }
        true
    }

    /// Count a running application on this queue and every ancestor
    pub fn increment_running_apps(self: &Arc<Self>) {
        let mut current = Some(self.clone());
        while let Some(queue) = current {
            queue.state.write().running_apps += 1;
            current = queue.parent.upgrade();
        }
    }

    /// Remove a running application from this queue and every ancestor
    pub fn decrement_running_apps(self: &Arc<Self>) {
        let mut current = Some(self.clone());
        while let Some(queue) = current {
            let mut state = queue.state.write();
            state.running_apps = state.running_apps.saturating_sub(1);
            drop(state);
            current = queue.parent.upgrade();
        }
    }

    /// Get the allocated resources below this queue
    #[must_use]
    pub fn allocated(&self) -> Resource {
        self.state.read().allocated.clone()
    }

    /// Get the pending resources below this queue
    #[must_use]
    pub fn pending(&self) -> Resource {
        self.state.read().pending.clone()
    }

    /// Get the configured max resources of this queue if any
    #[must_use]
    pub fn max_resource(&self) -> Option<Resource> {
        self.state.read().max.clone()
    }

    /// Build the DAO projection of this queue
    ///
    /// # Arguments
    ///
    /// * `include_children` - Whether to recurse into the children
    #[must_use]
    pub fn dao(&self, include_children: bool) -> QueueDAOInfo {
        let head_room = self.headroom();
        let state = self.state.read();
        let children: Vec<_> = state.children.values().cloned().collect();
        let dao = QueueDAOInfo {
            queue_name: self.path.clone(),
            status: state.state.as_str().to_owned(),
            is_leaf: state.children.is_empty(),
            is_managed: self.managed,
            pending_resource: state.pending.clone(),
            allocated_resource: state.allocated.clone(),
            preempting_resource: state.preempting.clone(),
            max_resource: state.max.clone(),
            guaranteed_resource: state.guaranteed.clone(),
            head_room,
            abs_used_capacity: state
                .max
                .as_ref()
                .map(|max| abs_used_capacity(max, &state.allocated))
                .unwrap_or_default(),
            properties: state.properties.clone(),
            max_running_apps: state.max_running_apps,
            running_apps: state.running_apps,
            child_names: children.iter().map(|child| child.path.clone()).collect(),
            children: Vec::default(),
        };
        drop(state);
        if include_children {
            let mut dao = dao;
            dao.children = children.iter().map(|child| child.dao(true)).collect();
            dao
        } else {
            dao
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::events::{ApplicationEvents, EventStore};

    /// Build a root queue for tests
    fn generate_root() -> Arc<SchedulingQueue> {
        let store = Arc::new(EventStore::new(100, false));
        SchedulingQueue::new_root(QueueEvents::new(&store))
    }

    /// Build a queue config with a max memory limit
    fn generate_config(name: &str, max_memory: u64) -> QueueConfig {
        let mut config = QueueConfig {
            name: name.to_owned(),
            ..Default::default()
        };
        if max_memory > 0 {
            config.resources.max.insert("memory".to_owned(), max_memory);
        }
        config
    }

    /// Build a throwaway application for tests
    fn generate_app(id: &str, queue: &str) -> Arc<Application> {
        let store = Arc::new(EventStore::new(100, false));
        Arc::new(Application::new(
            id,
            "[test]rm.default",
            queue,
            UserGroup::new("alice", Vec::default()),
            HashMap::default(),
            ApplicationEvents::new(&store),
        ))
    }

    #[test]
    fn allocated_rolls_up_the_tree() {
        let root = generate_root();
        let parent = SchedulingQueue::new_child(&root, "parent", true).unwrap();
        let leaf = SchedulingQueue::new_child(&parent, "leaf", true).unwrap();
        let other = SchedulingQueue::new_child(&parent, "other", true).unwrap();
        let delta = Resource::from_pairs([("memory", 4)]);
        leaf.inc_allocated(&delta);
        other.inc_allocated(&delta);
        // every parent equals the sum of its children
        assert_eq!(parent.allocated().get("memory"), 8);
        assert_eq!(root.allocated().get("memory"), 8);
        leaf.dec_allocated(&delta);
        assert_eq!(parent.allocated().get("memory"), 4);
        assert_eq!(root.allocated().get("memory"), 4);
    }

    #[test]
    fn headroom_respects_ancestors() {
        let root = generate_root();
        let parent = SchedulingQueue::new_child(&root, "parent", true).unwrap();
        parent.apply_config(&generate_config("parent", 10));
        let leaf = SchedulingQueue::new_child(&parent, "leaf", true).unwrap();
        leaf.apply_config(&generate_config("leaf", 20));
        // the parent cap is tighter than the leaf cap
        assert_eq!(leaf.headroom().unwrap().get("memory"), 10);
        leaf.inc_allocated(&Resource::from_pairs([("memory", 6)]));
        assert_eq!(leaf.headroom().unwrap().get("memory"), 4);
        // root has no max so headroom is bounded only below it
        assert_eq!(root.headroom(), None);
    }

    #[test]
    fn headroom_missing_max_inherits_parent() {
        let root = generate_root();
        let parent = SchedulingQueue::new_child(&root, "parent", true).unwrap();
        parent.apply_config(&generate_config("parent", 10));
        let leaf = SchedulingQueue::new_child(&parent, "leaf", true).unwrap();
        // the leaf has no max of its own
        assert_eq!(leaf.headroom().unwrap().get("memory"), 10);
    }

    #[test]
    fn only_leaves_hold_applications() {
        let root = generate_root();
        let parent = SchedulingQueue::new_child(&root, "parent", true).unwrap();
        let _leaf = SchedulingQueue::new_child(&parent, "leaf", true).unwrap();
        let app = generate_app("app-1", "root.parent");
        assert!(parent.add_application(app).is_err());
        // and a queue with applications cannot get children
        let leaf = parent.get_child("leaf").unwrap();
        leaf.add_application(generate_app("app-2", "root.parent.leaf"))
            .unwrap();
        assert!(SchedulingQueue::new_child(&leaf, "sub", true).is_err());
    }

    #[test]
    fn state_machine_and_propagation() {
        let root = generate_root();
        let child = SchedulingQueue::new_child(&root, "child", true).unwrap();
        // draining propagates down and can come back
        root.set_state(QueueState::Draining);
        assert_eq!(child.current_state(), QueueState::Draining);
        // stopped is reached through draining and rejects applications
        root.set_state(QueueState::Stopped);
        assert_eq!(child.current_state(), QueueState::Stopped);
        assert!(child.add_application(generate_app("app-1", "root.child")).is_err());
        // stopped is terminal
        root.set_state(QueueState::Active);
        assert_eq!(root.current_state(), QueueState::Stopped);
    }

    #[test]
    fn active_cannot_jump_to_stopped() {
        let root = generate_root();
        root.set_state(QueueState::Stopped);
        assert_eq!(root.current_state(), QueueState::Active);
    }

    #[test]
    fn max_running_apps_walks_ancestors() {
        let root = generate_root();
        let parent = SchedulingQueue::new_child(&root, "parent", true).unwrap();
        let mut config = generate_config("parent", 0);
        config.max_applications = Some(1);
        parent.apply_config(&config);
        let leaf = SchedulingQueue::new_child(&parent, "leaf", true).unwrap();
        assert!(leaf.can_run_more_apps());
        leaf.increment_running_apps();
        // the parent limit blocks the second application
        assert!(!leaf.can_run_more_apps());
        leaf.decrement_running_apps();
        assert!(leaf.can_run_more_apps());
    }

    #[test]
    fn dynamic_children_use_the_template()  {
        let root = generate_root();
        let parent = SchedulingQueue::new_child(&root, "parent", true).unwrap();
        let mut config = generate_config("parent", 0);
        config.child_template = Some(ChildTemplate {
            max_applications: Some(3),
            ..Default::default()
        });
        parent.apply_config(&config);
        let dynamic = SchedulingQueue::new_child(&parent, "auto", false).unwrap();
        assert!(!dynamic.managed);
        assert_eq!(dynamic.state.read().max_running_apps, Some(3));
        // empty dynamic queues are eligible for collection
        assert!(dynamic.is_gc_eligible());
        dynamic.inc_allocated(&Resource::from_pairs([("memory", 1)]));
        assert!(!dynamic.is_gc_eligible());
    }

    #[test]
    fn submit_access_walks_up() {
        let root = generate_root();
        let child = SchedulingQueue::new_child(&root, "child", true).unwrap();
        // the root allow all default covers the child
        assert!(child.check_submit_access(&UserGroup::new("alice", Vec::default())));
        // an explicit root ACL locks it down
        let mut config = generate_config("root", 0);
        config.submit_acl = "bob ".to_owned();
        root.apply_config(&config);
        assert!(!child.check_submit_access(&UserGroup::new("alice", Vec::default())));
        assert!(child.check_submit_access(&UserGroup::new("bob", Vec::default())));
    }

    #[test]
    fn fifo_children_order_by_first_pending() {
        let root = generate_root();
        let mut config = generate_config("root", 0);
        config.sort_policy = SortPolicy::Fifo;
        root.apply_config(&config);
        let first = SchedulingQueue::new_child(&root, "bbb", true).unwrap();
        let second = SchedulingQueue::new_child(&root, "aaa", true).unwrap();
        // no pending work ties break on the path
        let order: Vec<_> = root.sorted_children().iter().map(|q| q.name.clone()).collect();
        assert_eq!(order, vec!["aaa", "bbb"]);
        // pending work beats idle queues regardless of name
        first.inc_pending(&Resource::from_pairs([("memory", 1)]));
        let order: Vec<_> = root.sorted_children().iter().map(|q| q.name.clone()).collect();
        assert_eq!(order, vec!["bbb", "aaa"]);
        let _ = second;
    }

    #[test]
    fn dao_recursion_and_determinism() {
        let root = generate_root();
        let child = SchedulingQueue::new_child(&root, "child", true).unwrap();
        child.apply_config(&generate_config("child", 10));
        child.inc_allocated(&Resource::from_pairs([("memory", 5)]));
        let dao = root.dao(true);
        assert_eq!(dao.children.len(), 1);
        assert_eq!(dao.children[0].queue_name, "root.child");
        assert_eq!(dao.children[0].abs_used_capacity.get("memory"), 50);
        // the snapshot is a pure function of the state
        assert_eq!(dao, root.dao(true));
        // allocated fits in max when a max is set
        let child_dao = &dao.children[0];
        assert!(child_dao
            .allocated_resource
            .fits_in(child_dao.max_resource.as_ref().unwrap()));
    }
}
