//! The scheduling context for one partition
//!
//! A partition composes its queue tree, node map, application map, placement
//! pipeline, and usage trackers, and runs the scheduling pass that turns
//! pending asks into proposed allocations.

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{event, instrument, Level};

use gantry::conf::{NodeSortPolicy, PartitionConfig, QueueConfig};
use gantry::models::dao::PartitionDAOInfo;
use gantry::models::events::EventChangeDetail;
use gantry::models::{
    messages, AddApplicationRequest, AllocationRelease, NodeInfo, RejectedAllocation, Resource,
    TerminationType, UserGroup,
};
use gantry::Error;

use super::events::{ApplicationEvents, EventStore, NodeEvents, QueueEvents, UserGroupEvents};
use super::objects::{
    Allocation, Application, ApplicationState, Ask, QueueState, SchedulingNode, SchedulingQueue,
};
use super::placement::PlacementManager;
use super::plugins::PluginRegistry;
use super::ugm;

/// The allocation decisions produced by one scheduling pass
#[derive(Debug, Default)]
pub struct SchedulingResults {
    /// The newly proposed allocations
    pub new: Vec<messages::Allocation>,
    /// The asks rejected because no node could hold them
    pub rejected: Vec<RejectedAllocation>,
}

/// The releases produced by an allocation update
#[derive(Debug, Default)]
pub struct ReleaseResults {
    /// The released allocations confirmed back to the resource manager
    pub released: Vec<AllocationRelease>,
}

/// The scheduling context for one partition
pub struct PartitionContext {
    /// The fully qualified name of this partition
    pub name: String,
    /// The resource manager this partition is bound to
    pub rm_id: String,
    /// The root of the queue tree
    root: Arc<SchedulingQueue>,
    /// The placement rule pipeline
    placement: Mutex<PlacementManager>,
    /// The user and group usage trackers
    ugm: ugm::Manager,
    /// The applications in this partition by id
    apps: RwLock<HashMap<String, Arc<Application>>>,
    /// The nodes in this partition by id
    nodes: RwLock<HashMap<String, Arc<SchedulingNode>>>,
    /// How this partition orders candidate nodes
    node_sort_policy: RwLock<NodeSortPolicy>,
    /// The plugin registry for predicate checks
    registry: Arc<PluginRegistry>,
    /// The event store behind all entity event sources
    store: Arc<EventStore>,
}

impl PartitionContext {
    /// Create a new partition context from its configuration
    ///
    /// # Arguments
    ///
    /// * `name` - The fully qualified partition name
    /// * `rm_id` - The resource manager this partition is bound to
    /// * `config` - The partition configuration to build from
    /// * `store` - The event store behind all entity event sources
    /// * `registry` - The plugin registry for predicate checks
    pub fn new(
        name: &str,
        rm_id: &str,
        config: &PartitionConfig,
        store: &Arc<EventStore>,
        registry: &Arc<PluginRegistry>,
    ) -> Result<Arc<Self>, Error> {
        let root = SchedulingQueue::new_root(QueueEvents::new(store));
        let partition = Arc::new(PartitionContext {
            name: name.to_owned(),
            rm_id: rm_id.to_owned(),
            root,
            placement: Mutex::new(PlacementManager::new(&config.placement_rules)?),
            ugm: ugm::Manager::new(UserGroupEvents::new(store)),
            apps: RwLock::new(HashMap::default()),
            nodes: RwLock::new(HashMap::default()),
            node_sort_policy: RwLock::new(config.node_sort_policy),
            registry: registry.clone(),
            store: store.clone(),
        });
        partition.apply_queue_config(config)?;
        partition.ugm.update_config(&config.limits);
        Ok(partition)
    }

    /// Apply the configured queue hierarchy onto the live tree
    ///
    /// # Arguments
    ///
    /// * `config` - The partition configuration to apply
    fn apply_queue_config(&self, config: &PartitionConfig) -> Result<(), Error> {
        if let Some(root_config) = config.queues.first() {
            self.root.apply_config(root_config);
            self.ensure_children(&self.root, &root_config.queues)?;
        }
        Ok(())
    }

    /// Create or update the configured children of a queue recursively
    ///
    /// A draining queue that shows up in the configuration again goes back
    /// to active before its settings are applied.
    ///
    /// # Arguments
    ///
    /// * `queue` - The queue whose children to reconcile
    /// * `configs` - The configured children
    fn ensure_children(
        &self,
        queue: &Arc<SchedulingQueue>,
        configs: &[QueueConfig],
    ) -> Result<(), Error> {
        for config in configs {
            let child = match queue.get_child(&config.name) {
                Some(child) => {
                    // a configured queue must not stay stuck draining
                    if child.current_state() == QueueState::Draining {
                        child.set_state(QueueState::Active);
                    }
                    child
                }
                None => SchedulingQueue::new_child(queue, &config.name, true)?,
            };
            child.apply_config(config);
            self.ensure_children(&child, &config.queues)?;
        }
        Ok(())
    }

    /// Look up a queue by its dot separated name
    ///
    /// Comparison is case insensitive and the single segment `root` short
    /// circuits to the root queue.
    ///
    /// # Arguments
    ///
    /// * `name` - The queue name to look up
    #[must_use]
    pub fn get_queue(&self, name: &str) -> Option<Arc<SchedulingQueue>> {
        let lowered = name.to_lowercase();
        let mut parts = lowered.split('.');
        // the first segment must be the root
        if parts.next() != Some("root") {
            return None;
        }
        let mut queue = self.root.clone();
        for part in parts {
            queue = queue.get_child(part)?;
        }
        Some(queue)
    }

    /// Get the root queue of this partition
    #[must_use]
    pub fn root(&self) -> Arc<SchedulingQueue> {
        self.root.clone()
    }

    /// Get an application by id
    ///
    /// # Arguments
    ///
    /// * `application_id` - The id of the application to get
    #[must_use]
    pub fn get_application(&self, application_id: &str) -> Option<Arc<Application>> {
        self.apps.read().get(application_id).cloned()
    }

    /// Get a node by id
    ///
    /// # Arguments
    ///
    /// * `node_id` - The id of the node to get
    #[must_use]
    pub fn get_node(&self, node_id: &str) -> Option<Arc<SchedulingNode>> {
        self.nodes.read().get(node_id).cloned()
    }

    /// Add a new application to this partition
    ///
    /// Placement resolves the queue, dynamic queues are created when the
    /// winning rule allows it, and queue limits decide whether the
    /// application starts runnable or parked.
    ///
    /// # Arguments
    ///
    /// * `request` - The application request to add
    #[instrument(name = "PartitionContext::add_application", skip_all, fields(application = %request.application_id))]
    pub fn add_application(&self, request: &AddApplicationRequest) -> Result<(), Error> {
        // reject duplicates before doing any work
        if self.apps.read().contains_key(&request.application_id) {
            return Err(Error::new(format!(
                "adding application {} to partition {}, but application already existed",
                request.application_id, self.name
            )));
        }
        let user = UserGroup::new(&request.user, request.groups.clone());
        let app = Arc::new(Application::new(
            &request.application_id,
            &self.name,
            &request.queue_name,
            user.clone(),
            request.tags.clone(),
            ApplicationEvents::new(&self.store),
        ));
        // run the placement pipeline to resolve the queue
        let resolver = |path: &str| self.get_queue(path);
        let placed = self.placement.lock().place_application(&app, &resolver)?;
        app.set_queue_path(&placed.queue_path);
        // resolve or create the target queue
        let queue = match self.get_queue(&placed.queue_path) {
            Some(queue) => {
                if !queue.is_leaf() {
                    return Err(Error::new(format!(
                        "failed to find queue {} for application {}: not a leaf",
                        placed.queue_path, request.application_id
                    )));
                }
                if !queue.check_submit_access(&user) {
                    return Err(Error::new(format!(
                        "user {} denied access to queue {}",
                        user.user, placed.queue_path
                    )));
                }
                queue
            }
            None => {
                if !placed.create {
                    return Err(Error::new(format!(
                        "failed to find queue {} for application {}",
                        placed.queue_path, request.application_id
                    )));
                }
                self.create_queue(&placed.queue_path, &user)?
            }
        };
        queue.add_application(app.clone())?;
        // queue and quota limits decide runnable against parked
        let queue_ok = queue.can_run_more_apps();
        let quota_ok =
            self.ugm
                .can_run_app(&placed.queue_path, &request.application_id, &Resource::new(), &user);
        app.set_queue_runnable(queue_ok);
        app.set_quota_runnable(quota_ok);
        if app.is_runnable() {
            queue.increment_running_apps();
        }
        self.apps
            .write()
            .insert(request.application_id.clone(), app.clone());
        app.transition(ApplicationState::Accepted, "application admitted");
        Ok(())
    }

    /// Create a queue hierarchy below the nearest existing ancestor
    ///
    /// The ancestor has to grant submit access before any queue is created.
    /// Every created queue is dynamic and stamped from its parent template.
    ///
    /// # Arguments
    ///
    /// * `name` - The fully qualified queue path to create
    /// * `user` - The user asking for the queue
    fn create_queue(&self, name: &str, user: &UserGroup) -> Result<Arc<SchedulingQueue>, Error> {
        let lowered = name.to_lowercase();
        // find the furthest existing ancestor of the requested path
        let mut existing = lowered.clone();
        let mut missing = Vec::new();
        let ancestor = loop {
            if let Some(queue) = self.get_queue(&existing) {
                break queue;
            }
            match existing.rfind('.') {
                Some(idx) => {
                    missing.push(existing[idx + 1..].to_owned());
                    existing.truncate(idx);
                }
                None => {
                    return Err(Error::new(format!("queue {name} is not under root")));
                }
            }
        };
        // the existing ancestor is the lowest ACL we need to check
        if !ancestor.check_submit_access(user) {
            return Err(Error::new(format!(
                "user {} denied queue create on {}",
                user.user, ancestor.path
            )));
        }
        event!(
            Level::DEBUG,
            parent = %ancestor.path,
            queue = %lowered,
            msg = "creating dynamic queue(s)"
        );
        let mut parent = ancestor;
        for segment in missing.into_iter().rev() {
            parent = SchedulingQueue::new_child(&parent, &segment, false)?;
        }
        Ok(parent)
    }

    /// Remove an application from this partition
    ///
    /// Remaining asks and allocations are released quietly. A missing
    /// application is a soft error returned to the caller.
    ///
    /// # Arguments
    ///
    /// * `application_id` - The id of the application to remove
    #[instrument(name = "PartitionContext::remove_application", skip(self))]
    pub fn remove_application(&self, application_id: &str) -> Result<Arc<Application>, Error> {
        let Some(app) = self.apps.write().remove(application_id) else {
            return Err(Error::new(format!(
                "removing application {application_id} from partition {}, but application does not exist",
                self.name
            )));
        };
        let queue = self.get_queue(&app.queue_path());
        // release whatever the application still holds
        self.release_application_state(&app, &queue);
        if let Some(queue) = &queue {
            queue.remove_application(application_id);
            if app.is_runnable() {
                queue.decrement_running_apps();
            }
        }
        app.emit_removed();
        // freed queue slots may unpark waiting applications
        self.reevaluate_parked_applications();
        Ok(app)
    }

    /// Release every ask and allocation an application still holds
    ///
    /// # Arguments
    ///
    /// * `app` - The application to strip
    /// * `queue` - The queue the application lives on if it still exists
    fn release_application_state(&self, app: &Arc<Application>, queue: &Option<Arc<SchedulingQueue>>) {
        // drop the remaining pending asks and their reservations
        for ask in app.sorted_asks() {
            if app.remove_ask(&ask.allocation_key, EventChangeDetail::DetailsNone).is_some() {
                if let Some(queue) = queue {
                    queue.dec_pending(&ask.resource);
                }
                if let Some(required) = &ask.required_node {
                    if let Some(node) = self.get_node(required) {
                        node.unreserve(&ask.allocation_key);
                    }
                }
            }
        }
        // release the remaining allocations
        let remaining = app.allocations();
        let mut left = remaining.len();
        for alloc in remaining {
            left -= 1;
            self.release_one_allocation(app, &alloc, TerminationType::StoppedByRm, left == 0);
        }
    }

    /// Unpark any application whose queue and quota limits now allow it
    fn reevaluate_parked_applications(&self) {
        let apps: Vec<_> = self.apps.read().values().cloned().collect();
        for app in apps {
            if app.is_runnable() {
                continue;
            }
            let Some(queue) = self.get_queue(&app.queue_path()) else {
                continue;
            };
            let queue_ok = queue.can_run_more_apps();
            let quota_ok = self.ugm.can_run_app(
                &app.queue_path(),
                &app.application_id,
                &Resource::new(),
                &app.user,
            );
            // each limit flips its own flag so the right record is emitted
            app.set_queue_runnable(queue_ok);
            app.set_quota_runnable(quota_ok);
            if app.is_runnable() {
                queue.increment_running_apps();
            }
        }
    }

    /// Add a node to this partition
    ///
    /// An already known node is logged as out of sync and replaced so the
    /// partition matches the resource manager's view.
    ///
    /// # Arguments
    ///
    /// * `info` - The wire node info to add
    #[instrument(name = "PartitionContext::add_node", skip_all, fields(node = %info.node_id))]
    pub fn add_node(&self, info: &NodeInfo) {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&info.node_id) {
            event!(
                Level::DEBUG,
                node = %info.node_id,
                msg = "new node already existed: updates out of sync with scheduler"
            );
        }
        let node = Arc::new(SchedulingNode::new(
            info,
            &self.name,
            NodeEvents::new(&self.store),
        ));
        nodes.insert(info.node_id.clone(), node.clone());
        drop(nodes);
        // restore any allocations the node already carries
        self.confirm_reported_allocations(info, &node);
    }

    /// Apply a node update from the resource manager
    ///
    /// # Arguments
    ///
    /// * `info` - The wire node info to apply
    #[instrument(name = "PartitionContext::update_node", skip_all, fields(node = %info.node_id))]
    pub fn update_node(&self, info: &NodeInfo) {
        let Some(node) = self.get_node(&info.node_id) else {
            event!(
                Level::DEBUG,
                node = %info.node_id,
                msg = "node to be updated does not exist: updates out of sync with scheduler"
            );
            // self heal by accepting the reported state
            self.add_node(info);
            return;
        };
        if !info.schedulable_resource.is_empty() {
            node.update_capacity(&info.schedulable_resource);
        }
        node.update_occupied(&info.occupied_resource);
        self.confirm_reported_allocations(info, &node);
    }

    /// Stop scheduling onto a node without removing it
    ///
    /// # Arguments
    ///
    /// * `node_id` - The id of the node to drain
    pub fn drain_node(&self, node_id: &str) {
        if let Some(node) = self.get_node(node_id) {
            node.set_schedulable(false);
        }
    }

    /// Remove a node and release everything it held
    ///
    /// A missing node is logged as out of sync and ignored. The released
    /// allocations are handed back so the resource manager can be told.
    ///
    /// # Arguments
    ///
    /// * `node_id` - The id of the node to remove
    #[instrument(name = "PartitionContext::remove_node", skip(self))]
    pub fn remove_node(&self, node_id: &str) -> ReleaseResults {
        let mut results = ReleaseResults::default();
        let Some(node) = self.nodes.write().remove(node_id) else {
            event!(
                Level::DEBUG,
                node = node_id,
                msg = "node to be removed does not exist: updates out of sync with scheduler"
            );
            return results;
        };
        NodeEvents::new(&self.store).send_node_removed(node_id, "");
        // everything on the node is lost with it
        let apps = self.apps.read().clone();
        for app in apps.values() {
            for alloc in app.allocations() {
                if alloc.node_id == node.node_id {
                    self.release_one_allocation(app, &alloc, TerminationType::Unknown, true);
                    results.released.push(AllocationRelease {
                        partition_name: self.name.clone(),
                        application_id: alloc.application_id.clone(),
                        allocation_key: alloc.allocation_key.clone(),
                        termination_type: TerminationType::Unknown,
                        message: format!("node {node_id} removed"),
                    });
                }
            }
        }
        results
    }

    /// Confirm or restore the allocations a node reports holding
    ///
    /// A proposed allocation the node now reports moves to confirmed and
    /// starts counting against user and group quotas. An unknown allocation
    /// is restored as running workload recovery.
    ///
    /// # Arguments
    ///
    /// * `info` - The wire node info carrying the allocations
    /// * `node` - The node the allocations live on
    fn confirm_reported_allocations(&self, info: &NodeInfo, node: &Arc<SchedulingNode>) {
        for wire in &info.existing_allocations {
            let Some(app) = self.get_application(&wire.application_id) else {
                event!(
                    Level::WARN,
                    application = %wire.application_id,
                    allocation = %wire.allocation_key,
                    msg = "node reported an allocation for an unknown application"
                );
                continue;
            };
            match app.get_allocation(&wire.allocation_key) {
                Some(existing) => {
                    // confirmation of an allocation this scheduler proposed
                    if !existing.is_confirmed() {
                        node.confirm_allocation(&existing);
                        app.confirm_allocation(&wire.allocation_key);
                        self.ugm.increase_tracked_resource(
                            &app.queue_path(),
                            &app.application_id,
                            &existing.resource,
                            &app.user,
                        );
                    }
                }
                None => {
                    // recovery of an allocation placed before this scheduler
                    let ask = Ask::from_wire(wire);
                    let alloc = Arc::new(Allocation::from_ask(&ask, &node.node_id));
                    alloc.confirm();
                    node.restore_allocation(&alloc);
                    app.add_allocation(alloc.clone());
                    app.confirm_allocation(&alloc.allocation_key);
                    if let Some(queue) = self.get_queue(&app.queue_path()) {
                        queue.inc_allocated(&alloc.resource);
                    }
                    self.ugm.increase_tracked_resource(
                        &app.queue_path(),
                        &app.application_id,
                        &alloc.resource,
                        &app.user,
                    );
                }
            }
        }
    }

    /// Queue new asks from an allocation request
    ///
    /// # Arguments
    ///
    /// * `asks` - The wire allocations carrying the asks
    pub fn add_asks(&self, asks: &[messages::Allocation]) {
        for wire in asks {
            let Some(app) = self.get_application(&wire.application_id) else {
                event!(
                    Level::WARN,
                    application = %wire.application_id,
                    allocation = %wire.allocation_key,
                    msg = "ask for an unknown application dropped"
                );
                continue;
            };
            let ask = Arc::new(Ask::from_wire(wire));
            match app.add_ask(ask.clone()) {
                Ok(()) => {
                    if let Some(queue) = self.get_queue(&app.queue_path()) {
                        queue.inc_pending(&ask.resource);
                    }
                }
                Err(error) => {
                    event!(
                        Level::WARN,
                        application = %wire.application_id,
                        allocation = %wire.allocation_key,
                        error = %error,
                        msg = "ask rejected by application"
                    );
                }
            }
        }
    }

    /// Release allocations or asks named by the resource manager
    ///
    /// An empty allocation key releases everything the application holds.
    /// A key matching no allocation falls back to removing a pending ask.
    ///
    /// # Arguments
    ///
    /// * `releases` - The releases to apply
    pub fn release_allocations(&self, releases: &[AllocationRelease]) -> ReleaseResults {
        let mut results = ReleaseResults::default();
        for release in releases {
            let Some(app) = self.get_application(&release.application_id) else {
                continue;
            };
            if release.allocation_key.is_empty() {
                // release everything the application holds
                let remaining = app.allocations();
                let mut left = remaining.len();
                for alloc in remaining {
                    left -= 1;
                    self.release_one_allocation(&app, &alloc, release.termination_type, left == 0);
                    results.released.push(confirmed_release(&self.name, release, &alloc.allocation_key));
                }
                continue;
            }
            if let Some(alloc) = app.get_allocation(&release.allocation_key) {
                self.release_one_allocation(&app, &alloc, release.termination_type, true);
                results
                    .released
                    .push(confirmed_release(&self.name, release, &release.allocation_key));
            } else if let Some(ask) =
                app.remove_ask(&release.allocation_key, EventChangeDetail::DetailsNone)
            {
                // the key named a pending ask instead of an allocation
                if let Some(queue) = self.get_queue(&app.queue_path()) {
                    queue.dec_pending(&ask.resource);
                }
                if let Some(required) = &ask.required_node {
                    if let Some(node) = self.get_node(required) {
                        node.unreserve(&ask.allocation_key);
                    }
                }
                app.unreserve(&release.allocation_key);
            }
        }
        results
    }

    /// Release a single allocation everywhere it is referenced
    ///
    /// # Arguments
    ///
    /// * `app` - The application holding the allocation
    /// * `alloc` - The allocation to release
    /// * `termination` - Why the allocation is released
    /// * `last` - Whether this is the last release for the application
    fn release_one_allocation(
        &self,
        app: &Arc<Application>,
        alloc: &Arc<Allocation>,
        termination: TerminationType,
        last: bool,
    ) {
        let confirmed = alloc.is_confirmed();
        if app.remove_allocation(&alloc.allocation_key, termination).is_none() {
            return;
        }
        if let Some(node) = self.get_node(&alloc.node_id) {
            node.release_allocation(alloc);
        }
        let queue = self.get_queue(&app.queue_path());
        if let Some(queue) = &queue {
            queue.dec_allocated(&alloc.resource);
            if alloc.is_preempted() {
                queue.dec_preempting(&alloc.resource);
            }
        }
        // only confirmed allocations were counted against quotas
        if confirmed {
            self.ugm.decrease_tracked_resource(
                &app.queue_path(),
                &app.application_id,
                &alloc.resource,
                last && !app.has_pending(),
                &app.user,
            );
        }
    }

    /// Mark an allocation for preemption
    ///
    /// The resources stay allocated but are marked preempting on the node
    /// and the queue until the matching release arrives.
    ///
    /// # Arguments
    ///
    /// * `application_id` - The application holding the allocation
    /// * `allocation_key` - The allocation to mark
    pub fn preempt_allocation(&self, application_id: &str, allocation_key: &str) -> Result<(), Error> {
        let app = self.get_application(application_id).ok_or_else(|| {
            Error::new(format!("application {application_id} does not exist"))
        })?;
        let alloc = app.get_allocation(allocation_key).ok_or_else(|| {
            Error::new(format!(
                "allocation {allocation_key} does not exist on application {application_id}"
            ))
        })?;
        alloc.mark_preempted();
        if let Some(node) = self.get_node(&alloc.node_id) {
            node.mark_preempting(&alloc.resource);
        }
        if let Some(queue) = self.get_queue(&app.queue_path()) {
            queue.inc_preempting(&alloc.resource);
        }
        Ok(())
    }

    /// Run one scheduling pass over this partition
    ///
    /// The queue tree is walked depth first in child ordering order. Every
    /// leaf pulls its asks by priority and tries the candidate nodes in the
    /// partition's node sort order. An ask that fits its queue headroom but
    /// finds no node twice in a row is rejected.
    #[instrument(name = "PartitionContext::try_schedule", skip_all, fields(partition = %self.name))]
    pub fn try_schedule(&self) -> SchedulingResults {
        let mut results = SchedulingResults::default();
        // only schedulable nodes are candidates this pass
        let nodes: Vec<_> = self
            .nodes
            .read()
            .values()
            .filter(|node| node.is_schedulable())
            .cloned()
            .collect();
        self.schedule_queue(&self.root, &nodes, &mut results);
        results
    }

    /// Walk one queue during a scheduling pass
    ///
    /// # Arguments
    ///
    /// * `queue` - The queue to walk
    /// * `nodes` - The candidate nodes this pass
    /// * `results` - The decisions collected so far
    fn schedule_queue(
        &self,
        queue: &Arc<SchedulingQueue>,
        nodes: &[Arc<SchedulingNode>],
        results: &mut SchedulingResults,
    ) {
        // stopped and draining queues take no new allocations
        if queue.current_state() != QueueState::Active {
            return;
        }
        if queue.is_leaf() {
            self.schedule_leaf(queue, nodes, results);
            return;
        }
        for child in queue.sorted_children() {
            self.schedule_queue(&child, nodes, results);
        }
    }

    /// Try to place the asks of every application on a leaf queue
    ///
    /// # Arguments
    ///
    /// * `queue` - The leaf queue to schedule
    /// * `nodes` - The candidate nodes this pass
    /// * `results` - The decisions collected so far
    fn schedule_leaf(
        &self,
        queue: &Arc<SchedulingQueue>,
        nodes: &[Arc<SchedulingNode>],
        results: &mut SchedulingResults,
    ) {
        for app in queue.sorted_applications() {
            // parked applications wait for a queue or quota slot
            if !app.is_runnable() {
                continue;
            }
            for ask in app.sorted_asks() {
                // asks over the queue headroom stay pending
                if let Some(headroom) = queue.headroom() {
                    if !ask.resource.fits_in(&headroom) {
                        continue;
                    }
                }
                // asks over the user quota stay pending as well
                if let Some(headroom) = self.ugm.headroom(&app.queue_path(), &app.user) {
                    if !ask.resource.fits_in(&headroom) {
                        continue;
                    }
                }
                if self.try_place_ask(queue, &app, &ask, nodes, results) {
                    // a placed ask gives up any reservation it held
                    if let Some(required) = &ask.required_node {
                        if let Some(node) = self.get_node(required) {
                            node.unreserve(&ask.allocation_key);
                        }
                        app.unreserve(&ask.allocation_key);
                    }
                    continue;
                }
                // required node asks hold a reservation instead of rejecting
                if let Some(required) = &ask.required_node {
                    if let Some(node) = self.get_node(required) {
                        if !node.has_reservation(&ask.allocation_key) {
                            node.reserve(&ask);
                            app.reserve(&ask.allocation_key);
                        }
                    }
                    continue;
                }
                // a second fruitless pass over the nodes rejects the ask
                if ask.is_scheduling_attempted() {
                    app.remove_ask(&ask.allocation_key, EventChangeDetail::AppRequestRejected);
                    queue.dec_pending(&ask.resource);
                    results.rejected.push(RejectedAllocation {
                        allocation_key: ask.allocation_key.clone(),
                        application_id: app.application_id.clone(),
                        reason: "no node with enough resources".to_owned(),
                    });
                } else {
                    ask.set_scheduling_attempted();
                }
            }
        }
    }

    /// Try every candidate node for one ask
    ///
    /// # Arguments
    ///
    /// * `queue` - The leaf queue the ask belongs to
    /// * `app` - The application the ask belongs to
    /// * `ask` - The ask to place
    /// * `nodes` - The candidate nodes this pass
    /// * `results` - The decisions collected so far
    fn try_place_ask(
        &self,
        queue: &Arc<SchedulingQueue>,
        app: &Arc<Application>,
        ask: &Arc<Ask>,
        nodes: &[Arc<SchedulingNode>],
        results: &mut SchedulingResults,
    ) -> bool {
        for node in self.sorted_nodes(nodes, &ask.resource) {
            // a required node pins the candidate list to one entry
            if let Some(required) = &ask.required_node {
                if node.node_id != *required {
                    continue;
                }
            }
            if !node.check_allocate_conditions(&ask.allocation_key, &self.registry) {
                continue;
            }
            if !node.check_and_allocate(&ask.resource, false) {
                continue;
            }
            // the ask is placed, move it onto the application and queue
            app.remove_ask(&ask.allocation_key, EventChangeDetail::DetailsNone);
            queue.dec_pending(&ask.resource);
            let alloc = Arc::new(Allocation::from_ask(ask, &node.node_id));
            app.add_allocation(alloc.clone());
            queue.inc_allocated(&alloc.resource);
            results.new.push(alloc.to_wire(&self.name));
            return true;
        }
        false
    }

    /// Order candidate nodes for an ask
    ///
    /// The default prefers the node with the most available resources for
    /// the ask's types, with a small jitter so equal nodes spread load, and
    /// a stable node id tie break.
    ///
    /// # Arguments
    ///
    /// * `nodes` - The candidate nodes this pass
    /// * `shape` - The resource shape being placed
    fn sorted_nodes(&self, nodes: &[Arc<SchedulingNode>], shape: &Resource) -> Vec<Arc<SchedulingNode>> {
        let policy = *self.node_sort_policy.read();
        let mut rng = rand::thread_rng();
        let mut scored: Vec<(f64, Arc<SchedulingNode>)> = nodes
            .iter()
            .map(|node| {
                let jitter = rng.gen_range(1.0..1.05);
                (node.available_for(shape) as f64 * jitter, node.clone())
            })
            .collect();
        scored.sort_by(|a, b| {
            let ordering = match policy {
                NodeSortPolicy::MostAvailable => b.0.partial_cmp(&a.0),
                NodeSortPolicy::LeastAvailable => a.0.partial_cmp(&b.0),
            };
            ordering
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.node_id.cmp(&b.1.node_id))
        });
        scored.into_iter().map(|(_, node)| node).collect()
    }

    /// Reload this partition from new configuration
    ///
    /// Placement rules are replaced when the manager exists and rebuilt
    /// otherwise. Queue properties propagate recursively; managed queues
    /// that left the configuration start draining. Conflicting property
    /// updates are applied best effort and logged.
    ///
    /// # Arguments
    ///
    /// * `config` - The new partition configuration
    #[instrument(name = "PartitionContext::reload", skip_all, fields(partition = %self.name))]
    pub fn reload(&self, config: &PartitionConfig) -> Result<(), Error> {
        let mut placement = self.placement.lock();
        if placement.is_initialised() {
            event!(Level::INFO, msg = "updating placement manager rules on config reload");
            placement.update_rules(&config.placement_rules)?;
        } else {
            event!(Level::INFO, msg = "creating new placement manager on config reload");
            *placement = PlacementManager::new(&config.placement_rules)?;
        }
        drop(placement);
        // push the new queue hierarchy onto the live tree
        self.apply_queue_config(config)?;
        // drain managed queues that left the configuration
        let mut configured = Vec::new();
        if let Some(root_config) = config.queues.first() {
            collect_paths("root", &root_config.queues, &mut configured);
        }
        self.drain_unconfigured(&self.root, &configured);
        self.ugm.update_config(&config.limits);
        *self.node_sort_policy.write() = config.node_sort_policy;
        // sweep empty dynamic queues while we are at it
        self.collect_dynamic_queues(&self.root);
        Ok(())
    }

    /// Drain managed queues that are no longer configured
    ///
    /// # Arguments
    ///
    /// * `queue` - The queue whose children to check
    /// * `configured` - The configured queue paths
    fn drain_unconfigured(&self, queue: &Arc<SchedulingQueue>, configured: &[String]) {
        for child in queue.children() {
            if child.managed && !configured.contains(&child.path) {
                event!(
                    Level::INFO,
                    queue = %child.path,
                    msg = "managed queue left the configuration, draining"
                );
                child.set_state(QueueState::Draining);
            }
            self.drain_unconfigured(&child, configured);
        }
    }

    /// Remove empty and idle dynamic queues
    ///
    /// # Arguments
    ///
    /// * `queue` - The queue whose children to sweep
    fn collect_dynamic_queues(&self, queue: &Arc<SchedulingQueue>) {
        for child in queue.children() {
            self.collect_dynamic_queues(&child);
            if child.is_gc_eligible() {
                queue.remove_child(&child.name);
            }
        }
    }

    /// Shut this partition down and drop its state
    ///
    /// Used when the owning resource manager re-registers or goes away. No
    /// events are pushed back since the old binding is already gone.
    pub fn remove(&self) {
        self.root.set_state(QueueState::Draining);
        self.root.set_state(QueueState::Stopped);
        self.apps.write().clear();
        self.nodes.write().clear();
    }

    /// Serialize the DAO projection of this partition to JSON
    ///
    /// This is the read path external inspection consumes.
    pub fn snapshot(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(&self.dao())?)
    }

    /// Build the DAO projection of this partition
    #[must_use]
    pub fn dao(&self) -> PartitionDAOInfo {
        let nodes = self.nodes.read();
        let mut total_capacity = Resource::new();
        for node in nodes.values() {
            total_capacity += &node.total();
        }
        PartitionDAOInfo {
            name: self.name.clone(),
            rm_id: self.rm_id.clone(),
            node_count: nodes.len(),
            application_count: self.apps.read().len(),
            total_capacity,
            root: self.root.dao(true),
        }
    }
}

/// Collect the fully qualified paths of a configured queue tree
///
/// # Arguments
///
/// * `parent` - The path of the parent queue
/// * `configs` - The configured children
fn collect_paths(parent: &str, configs: &[QueueConfig], out: &mut Vec<String>) {
    for config in configs {
        let path = format!("{parent}.{}", config.name.to_lowercase());
        collect_paths(&path, &config.queues, out);
        out.push(path);
    }
}

/// Build the confirmed release pushed back to the resource manager
///
/// # Arguments
///
/// * `partition` - The fully qualified partition name
/// * `release` - The release that was asked for
/// * `allocation_key` - The allocation that was released
fn confirmed_release(
    partition: &str,
    release: &AllocationRelease,
    allocation_key: &str,
) -> AllocationRelease {
    AllocationRelease {
        partition_name: partition.to_owned(),
        application_id: release.application_id.clone(),
        allocation_key: allocation_key.to_owned(),
        termination_type: release.termination_type,
        message: release.message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry::conf::{LimitConfig, PlacementRuleConfig, QueueLimitsConfig, QueueResourcesConfig};
    use gantry::models::NodeAction;

    /// Build a partition config with a single leaf queue
    fn generate_config(leaf: &str, max_memory: u64) -> PartitionConfig {
        let mut leaf_config = QueueConfig {
            name: leaf.to_owned(),
            ..Default::default()
        };
        if max_memory > 0 {
            leaf_config.resources = QueueResourcesConfig::default();
            leaf_config
                .resources
                .max
                .insert("memory".to_owned(), max_memory);
        }
        PartitionConfig {
            name: "default".to_owned(),
            queues: vec![QueueConfig {
                name: "root".to_owned(),
                queues: vec![leaf_config],
                ..Default::default()
            }],
            placement_rules: vec![PlacementRuleConfig {
                name: "provided".to_owned(),
                create: true,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Build a partition for tests
    fn generate_partition(max_memory: u64) -> Arc<PartitionContext> {
        let store = Arc::new(EventStore::new(1000, false));
        let registry = Arc::new(PluginRegistry::new());
        PartitionContext::new(
            "[test]rm:1.default",
            "rm:1",
            &generate_config("single", max_memory),
            &store,
            &registry,
        )
        .unwrap()
    }

    /// Build an add application request
    fn generate_app_request(id: &str, queue: &str) -> AddApplicationRequest {
        AddApplicationRequest {
            application_id: id.to_owned(),
            queue_name: queue.to_owned(),
            partition_name: "[test]rm:1.default".to_owned(),
            user: "alice".to_owned(),
            ..Default::default()
        }
    }

    /// Build a node create request
    fn generate_node_info(id: &str, memory: u64) -> NodeInfo {
        NodeInfo {
            node_id: id.to_owned(),
            action: NodeAction::Create,
            schedulable_resource: Resource::from_pairs([("memory", memory)]),
            ..Default::default()
        }
    }

    /// Build an ask for an application
    fn generate_ask(app: &str, key: &str, memory: u64) -> messages::Allocation {
        messages::Allocation {
            allocation_key: key.to_owned(),
            application_id: app.to_owned(),
            resource_per_alloc: Resource::from_pairs([("memory", memory)]),
            ..Default::default()
        }
    }

    #[test]
    fn queue_lookup_is_case_insensitive() {
        let partition = generate_partition(0);
        assert!(partition.get_queue("root").is_some());
        assert!(partition.get_queue("Root.Single").is_some());
        assert!(partition.get_queue("root.missing").is_none());
        assert!(partition.get_queue("other").is_none());
    }

    #[test]
    fn duplicate_application_is_rejected() {
        let partition = generate_partition(0);
        partition
            .add_application(&generate_app_request("app-1", "root.single"))
            .unwrap();
        assert!(partition
            .add_application(&generate_app_request("app-1", "root.single"))
            .is_err());
    }

    #[test]
    fn application_lands_on_dynamic_queue() {
        let partition = generate_partition(0);
        partition
            .add_application(&generate_app_request("app-1", "root.teams.blue"))
            .unwrap();
        // the intermediate queues were created dynamically
        let queue = partition.get_queue("root.teams.blue").unwrap();
        assert!(!queue.managed);
        assert!(!partition.get_queue("root.teams").unwrap().managed);
        let app = partition.get_application("app-1").unwrap();
        assert_eq!(app.queue_path(), "root.teams.blue");
        assert_eq!(app.current_state(), ApplicationState::Accepted);
    }

    #[test]
    fn non_leaf_queue_is_rejected() {
        let partition = generate_partition(0);
        assert!(partition
            .add_application(&generate_app_request("app-1", "root"))
            .is_err());
    }

    #[test]
    fn missing_application_remove_is_soft() {
        let partition = generate_partition(0);
        assert!(partition.remove_application("app-404").is_err());
    }

    #[test]
    fn node_add_remove_reconciles() {
        let partition = generate_partition(0);
        partition.add_node(&generate_node_info("node-1", 10));
        // adding the same node again reconciles instead of failing
        partition.add_node(&generate_node_info("node-1", 20));
        assert_eq!(partition.get_node("node-1").unwrap().total().get("memory"), 20);
        // removing an unknown node is a quiet no op
        let released = partition.remove_node("node-404");
        assert!(released.released.is_empty());
        partition.remove_node("node-1");
        assert!(partition.get_node("node-1").is_none());
    }

    #[test]
    fn schedule_places_and_rejects() {
        let partition = generate_partition(0);
        partition.add_node(&generate_node_info("node-1", 10));
        partition
            .add_application(&generate_app_request("app-1", "root.single"))
            .unwrap();
        partition.add_asks(&[generate_ask("app-1", "ask-1", 8)]);
        // the first pass places the only ask on the only node
        let results = partition.try_schedule();
        assert_eq!(results.new.len(), 1);
        assert_eq!(results.new[0].allocation_key, "ask-1");
        assert_eq!(results.new[0].node_id, "node-1");
        assert_eq!(results.new[0].resource_per_alloc.get("memory"), 8);
        assert!(results.rejected.is_empty());
        // a second ask no node can hold is rejected after two passes
        partition.add_asks(&[generate_ask("app-1", "ask-2", 5)]);
        let first = partition.try_schedule();
        assert!(first.new.is_empty());
        assert!(first.rejected.is_empty());
        let second = partition.try_schedule();
        assert!(second.new.is_empty());
        assert_eq!(second.rejected.len(), 1);
        assert_eq!(second.rejected[0].allocation_key, "ask-2");
    }

    #[test]
    fn headroom_blocked_asks_stay_pending() {
        let partition = generate_partition(4);
        partition.add_node(&generate_node_info("node-1", 100));
        partition
            .add_application(&generate_app_request("app-1", "root.single"))
            .unwrap();
        partition.add_asks(&[generate_ask("app-1", "ask-1", 8)]);
        // the queue max blocks the ask so it pends instead of rejecting
        for _ in 0..3 {
            let results = partition.try_schedule();
            assert!(results.new.is_empty());
            assert!(results.rejected.is_empty());
        }
        let app = partition.get_application("app-1").unwrap();
        assert!(app.has_pending());
    }

    #[test]
    fn confirmation_flows_into_usage_tracking() {
        let partition = generate_partition(0);
        partition.add_node(&generate_node_info("node-1", 10));
        partition
            .add_application(&generate_app_request("app-1", "root.single"))
            .unwrap();
        partition.add_asks(&[generate_ask("app-1", "ask-1", 8)]);
        let results = partition.try_schedule();
        assert_eq!(results.new.len(), 1);
        // the node reports the allocation back which confirms it
        let mut update = generate_node_info("node-1", 10);
        update.action = NodeAction::Update;
        update.existing_allocations = results.new.clone();
        partition.update_node(&update);
        let app = partition.get_application("app-1").unwrap();
        let alloc = app.get_allocation("ask-1").unwrap();
        assert!(alloc.is_confirmed());
        // allocation is referenced from app, node, and usage trackers
        let node = partition.get_node("node-1").unwrap();
        assert!(node.get_allocation("ask-1").is_some());
        assert_eq!(node.allocated().get("memory"), 8);
        assert_eq!(node.allocating().get("memory"), 0);
        let usage = partition.ugm.user_dao("alice").unwrap();
        assert_eq!(usage.queues.resource_usage.get("memory"), 8);
        // queue roll up matches as well
        assert_eq!(partition.root().allocated().get("memory"), 8);
    }

    #[test]
    fn release_unwinds_everywhere() {
        let partition = generate_partition(0);
        partition.add_node(&generate_node_info("node-1", 10));
        partition
            .add_application(&generate_app_request("app-1", "root.single"))
            .unwrap();
        partition.add_asks(&[generate_ask("app-1", "ask-1", 8)]);
        let results = partition.try_schedule();
        let mut update = generate_node_info("node-1", 10);
        update.action = NodeAction::Update;
        update.existing_allocations = results.new.clone();
        partition.update_node(&update);
        // release the allocation through the wire shape
        let releases = partition.release_allocations(&[AllocationRelease {
            partition_name: "[test]rm:1.default".to_owned(),
            application_id: "app-1".to_owned(),
            allocation_key: "ask-1".to_owned(),
            termination_type: TerminationType::StoppedByRm,
            ..Default::default()
        }]);
        assert_eq!(releases.released.len(), 1);
        let node = partition.get_node("node-1").unwrap();
        assert_eq!(node.allocated().get("memory"), 0);
        assert_eq!(partition.root().allocated().get("memory"), 0);
        // the usage tracker emptied and was collected
        assert!(!partition.ugm.is_user_tracked("alice"));
    }

    #[test]
    fn preempt_then_release_clears_both_counters() {
        let partition = generate_partition(0);
        partition.add_node(&generate_node_info("node-1", 10));
        partition
            .add_application(&generate_app_request("app-1", "root.single"))
            .unwrap();
        partition.add_asks(&[generate_ask("app-1", "ask-1", 8)]);
        let results = partition.try_schedule();
        let mut update = generate_node_info("node-1", 10);
        update.action = NodeAction::Update;
        update.existing_allocations = results.new.clone();
        partition.update_node(&update);
        partition.preempt_allocation("app-1", "ask-1").unwrap();
        let node = partition.get_node("node-1").unwrap();
        assert_eq!(node.preempting().get("memory"), 8);
        partition.release_allocations(&[AllocationRelease {
            application_id: "app-1".to_owned(),
            allocation_key: "ask-1".to_owned(),
            termination_type: TerminationType::PreemptedByScheduler,
            ..Default::default()
        }]);
        assert_eq!(node.preempting().get("memory"), 0);
        assert_eq!(node.allocated().get("memory"), 0);
    }

    #[test]
    fn node_removal_releases_allocations() {
        let partition = generate_partition(0);
        partition.add_node(&generate_node_info("node-1", 10));
        partition
            .add_application(&generate_app_request("app-1", "root.single"))
            .unwrap();
        partition.add_asks(&[generate_ask("app-1", "ask-1", 8)]);
        let results = partition.try_schedule();
        assert_eq!(results.new.len(), 1);
        let released = partition.remove_node("node-1");
        assert_eq!(released.released.len(), 1);
        assert_eq!(
            released.released[0].termination_type,
            TerminationType::Unknown
        );
        assert_eq!(partition.root().allocated().get("memory"), 0);
    }

    #[test]
    fn reload_updates_queues_and_rules() {
        let partition = generate_partition(0);
        // the new config caps the leaf and adds a second queue
        let mut config = generate_config("single", 50);
        config.queues[0].queues.push(QueueConfig {
            name: "extra".to_owned(),
            ..Default::default()
        });
        partition.reload(&config).unwrap();
        let single = partition.get_queue("root.single").unwrap();
        assert_eq!(single.max_resource().unwrap().get("memory"), 50);
        assert!(partition.get_queue("root.extra").is_some());
        // dropping a queue from config drains it
        let config = generate_config("extra", 0);
        partition.reload(&config).unwrap();
        let single = partition.get_queue("root.single").unwrap();
        assert_eq!(single.current_state(), QueueState::Draining);
        // a queue back in the configuration stops draining
        let config = generate_config("single", 0);
        partition.reload(&config).unwrap();
        assert_eq!(single.current_state(), QueueState::Active);
        let extra = partition.get_queue("root.extra").unwrap();
        assert_eq!(extra.current_state(), QueueState::Draining);
    }

    #[test]
    fn parked_application_unparks_on_removal() {
        let store = Arc::new(EventStore::new(1000, false));
        let registry = Arc::new(PluginRegistry::new());
        let mut config = generate_config("single", 0);
        config.queues[0].queues[0].max_applications = Some(1);
        let partition = PartitionContext::new(
            "[test]rm:1.default",
            "rm:1",
            &config,
            &store,
            &registry,
        )
        .unwrap();
        partition
            .add_application(&generate_app_request("app-1", "root.single"))
            .unwrap();
        partition
            .add_application(&generate_app_request("app-2", "root.single"))
            .unwrap();
        // the second application parks behind the queue limit
        let second = partition.get_application("app-2").unwrap();
        assert!(!second.is_runnable());
        partition.remove_application("app-1").unwrap();
        assert!(second.is_runnable());
    }

    #[test]
    fn snapshot_is_a_pure_projection() {
        let partition = generate_partition(0);
        partition.add_node(&generate_node_info("node-1", 10));
        let first = partition.snapshot().unwrap();
        // the snapshot is deterministic given the same state
        assert_eq!(first, partition.snapshot().unwrap());
        assert!(first.contains("\"node_count\":1"));
    }

    #[test]
    fn required_node_ask_reserves_until_it_fits() {
        let partition = generate_partition(0);
        partition.add_node(&generate_node_info("node-1", 10));
        partition.add_node(&generate_node_info("node-2", 100));
        partition
            .add_application(&generate_app_request("app-1", "root.single"))
            .unwrap();
        // pin the first ask to the small node despite the bigger one
        let mut pinned = generate_ask("app-1", "ask-1", 8);
        pinned.node_id = "node-1".to_owned();
        partition.add_asks(&[pinned]);
        let results = partition.try_schedule();
        assert_eq!(results.new.len(), 1);
        assert_eq!(results.new[0].node_id, "node-1");
        // a second pinned ask reserves the node instead of rejecting
        let mut pinned = generate_ask("app-1", "ask-2", 5);
        pinned.node_id = "node-1".to_owned();
        partition.add_asks(&[pinned]);
        for _ in 0..3 {
            let results = partition.try_schedule();
            assert!(results.new.is_empty());
            assert!(results.rejected.is_empty());
        }
        let node = partition.get_node("node-1").unwrap();
        assert!(node.has_reservation("ask-2"));
        // releasing the first allocation lets the reservation convert
        partition.release_allocations(&[AllocationRelease {
            application_id: "app-1".to_owned(),
            allocation_key: "ask-1".to_owned(),
            termination_type: TerminationType::StoppedByRm,
            ..Default::default()
        }]);
        let results = partition.try_schedule();
        assert_eq!(results.new.len(), 1);
        assert_eq!(results.new[0].allocation_key, "ask-2");
        assert!(!node.has_reservation("ask-2"));
    }

    #[test]
    fn quota_parked_application_unparks_with_events() {
        let store = Arc::new(EventStore::new(1000, true));
        let registry = Arc::new(PluginRegistry::new());
        let mut config = generate_config("single", 0);
        // one running application per user on the leaf
        config.limits = vec![QueueLimitsConfig {
            queue_path: "root.single".to_owned(),
            limits: vec![LimitConfig {
                users: vec!["*".to_owned()],
                max_applications: Some(1),
                ..Default::default()
            }],
        }];
        let partition = PartitionContext::new(
            "[test]rm:1.default",
            "rm:1",
            &config,
            &store,
            &registry,
        )
        .unwrap();
        partition.add_node(&generate_node_info("node-1", 10));
        partition
            .add_application(&generate_app_request("app-1", "root.single"))
            .unwrap();
        partition.add_asks(&[generate_ask("app-1", "ask-1", 4)]);
        let results = partition.try_schedule();
        assert_eq!(results.new.len(), 1);
        // confirm so the quota tracker counts the running application
        let mut update = generate_node_info("node-1", 10);
        update.action = NodeAction::Update;
        update.existing_allocations = results.new.clone();
        partition.update_node(&update);
        // the second application parks behind the user quota
        partition
            .add_application(&generate_app_request("app-2", "root.single"))
            .unwrap();
        let second = partition.get_application("app-2").unwrap();
        assert!(!second.is_runnable());
        // removing the first application frees the quota slot
        partition.remove_application("app-1").unwrap();
        assert!(second.is_runnable());
        // both sides of the quota flip were recorded
        let details: Vec<_> = store
            .collect_events()
            .iter()
            .map(|record| record.change_detail)
            .collect();
        assert!(details.contains(&EventChangeDetail::AppCannotRunQuota));
        assert!(details.contains(&EventChangeDetail::AppRunnableQuota));
        assert!(!details.contains(&EventChangeDetail::AppCannotRunQueue));
    }
}
