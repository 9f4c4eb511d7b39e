//! The scheduler core loop and the partition registry
//!
//! One handler task consumes the inbound event queue in submission order and
//! mutates the partitions. A separate driver task runs the scheduling pass
//! on an interval and whenever an update makes new work available.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::{event, instrument, Level};

use gantry::conf::{Conf, PartitionConfig, SchedulerConfig};
use gantry::models::{
    normalize_partition_name, AcceptedApplication, AcceptedNode, AllocationRequest,
    ApplicationRequest, NodeAction, NodeRequest, PartitionDAOInfo,
    RegisterResourceManagerRequest, RejectedApplication, RejectedNode,
    UpdateConfigurationRequest, UpdatedApplication,
};

use super::events::EventStore;
use super::gateway::{enqueue_rm_event, RmEvent, RmResult};
use super::partition::PartitionContext;
use super::plugins::PluginRegistry;

/// An inbound event for the scheduler handler
pub enum SchedulerEvent {
    /// A resource manager is registering
    RmRegistration {
        /// The registration request
        request: RegisterResourceManagerRequest,
        /// The channel the outcome is reported on
        reply: oneshot::Sender<RmResult>,
    },
    /// All partitions of a resource manager must go
    RmPartitionsRemove {
        /// The resource manager whose partitions go away
        rm_id: String,
        /// The channel the outcome is reported on
        reply: oneshot::Sender<RmResult>,
    },
    /// A configuration update was requested
    RmConfigUpdate {
        /// The configuration update request
        request: UpdateConfigurationRequest,
        /// The channel the outcome is reported on
        reply: oneshot::Sender<RmResult>,
    },
    /// New asks and releases arrived
    UpdateAllocation {
        /// The allocation request
        request: AllocationRequest,
    },
    /// New and removed applications arrived
    UpdateApplication {
        /// The application request
        request: ApplicationRequest,
    },
    /// Node changes arrived
    UpdateNode {
        /// The node request
        request: NodeRequest,
    },
}

/// The shared state behind the scheduler core loops
struct CoreContext {
    /// The cluster id used to qualify partition names
    cluster_id: String,
    /// The partitions by fully qualified name
    partitions: RwLock<HashMap<String, Arc<PartitionContext>>>,
    /// The outbound queue towards the gateway dispatcher
    outbound: kanal::AsyncSender<RmEvent>,
    /// The event store behind all entity event sources
    store: Arc<EventStore>,
    /// The plugin registry for predicate checks
    registry: Arc<PluginRegistry>,
    /// Wakes the scheduling driver outside its interval
    notify: Notify,
}

/// The scheduler core
pub struct SchedulerCore {
    /// The shared state behind the loops
    context: Arc<CoreContext>,
    /// How often the driver runs a scheduling pass
    schedule_interval: Duration,
    /// The inbound queue until the handler starts
    inbound: Mutex<Option<kanal::AsyncReceiver<SchedulerEvent>>>,
    /// The driver stop channel while running
    stop: Mutex<Option<kanal::AsyncSender<()>>>,
}

impl SchedulerCore {
    /// Create a new scheduler core
    ///
    /// # Arguments
    ///
    /// * `conf` - The Gantry config
    /// * `inbound` - The inbound scheduler event queue
    /// * `outbound` - The outbound queue towards the gateway dispatcher
    /// * `store` - The event store behind all entity event sources
    /// * `registry` - The plugin registry for predicate checks
    #[must_use]
    pub fn new(
        conf: &Conf,
        inbound: kanal::AsyncReceiver<SchedulerEvent>,
        outbound: kanal::AsyncSender<RmEvent>,
        store: Arc<EventStore>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        SchedulerCore {
            context: Arc::new(CoreContext {
                cluster_id: conf.gantry.cluster_id.clone(),
                partitions: RwLock::new(HashMap::default()),
                outbound,
                store,
                registry,
                notify: Notify::new(),
            }),
            schedule_interval: Duration::from_millis(conf.gantry.scheduler.schedule_interval_ms),
            inbound: Mutex::new(Some(inbound)),
            stop: Mutex::new(None),
        }
    }

    /// Start the handler and driver loops
    ///
    /// Starting twice is a no op.
    pub fn start(&self) {
        let Some(inbound) = self.inbound.lock().take() else {
            return;
        };
        event!(Level::INFO, msg = "starting scheduler core");
        // the handler loop consumes inbound events in submission order
        let context = self.context.clone();
        tokio::spawn(async move {
            while let Ok(scheduler_event) = inbound.recv().await {
                context.handle_event(scheduler_event);
            }
            event!(Level::INFO, msg = "scheduler handler stopped");
        });
        // the driver loop runs scheduling passes on an interval or on demand
        let (stop_tx, stop_rx) = kanal::bounded_async::<()>(1);
        *self.stop.lock() = Some(stop_tx);
        let context = self.context.clone();
        let interval = self.schedule_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => context.schedule_all(),
                    _ = context.notify.notified() => context.schedule_all(),
                    _ = stop_rx.recv() => break,
                }
            }
            event!(Level::INFO, msg = "scheduling driver stopped");
        });
    }

    /// Stop the driver loop
    ///
    /// In flight work completes or is abandoned; the handler loop exits once
    /// the inbound queue closes.
    pub fn stop(&self) {
        if self.stop.lock().take().is_some() {
            event!(Level::INFO, msg = "stopping scheduler core");
        }
    }

    /// Run one scheduling pass over all partitions right now
    pub fn schedule_now(&self) {
        self.context.schedule_all();
    }

    /// Get a partition by its fully qualified name
    ///
    /// # Arguments
    ///
    /// * `name` - The fully qualified partition name
    #[must_use]
    pub fn get_partition(&self, name: &str) -> Option<Arc<PartitionContext>> {
        self.context.partitions.read().get(name).cloned()
    }

    /// Build the DAO projections of every partition
    #[must_use]
    pub fn partitions_dao(&self) -> Vec<PartitionDAOInfo> {
        let mut daos: Vec<_> = self
            .context
            .partitions
            .read()
            .values()
            .map(|partition| partition.dao())
            .collect();
        daos.sort_by(|a, b| a.name.cmp(&b.name));
        daos
    }
}

impl CoreContext {
    /// Handle one inbound scheduler event
    ///
    /// # Arguments
    ///
    /// * `scheduler_event` - The event to handle
    fn handle_event(&self, scheduler_event: SchedulerEvent) {
        match scheduler_event {
            SchedulerEvent::RmRegistration { request, reply } => {
                let result = self.handle_registration(&request);
                let _ = reply.send(result);
            }
            SchedulerEvent::RmPartitionsRemove { rm_id, reply } => {
                self.remove_partitions(&rm_id);
                let _ = reply.send(RmResult::succeeded("partitions removed"));
            }
            SchedulerEvent::RmConfigUpdate { request, reply } => {
                let result = self.handle_config_update(&request);
                let _ = reply.send(result);
            }
            SchedulerEvent::UpdateAllocation { request } => self.handle_allocation_update(&request),
            SchedulerEvent::UpdateApplication { request } => {
                self.handle_application_update(&request);
            }
            SchedulerEvent::UpdateNode { request } => self.handle_node_update(&request),
        }
    }

    /// Build the partitions for a registering resource manager
    ///
    /// An empty configuration still creates the default partition so a
    /// resource manager can start pushing state right away.
    ///
    /// # Arguments
    ///
    /// * `request` - The registration request
    #[instrument(name = "SchedulerCore::handle_registration", skip_all, fields(rm_id = %request.rm_id))]
    fn handle_registration(&self, request: &RegisterResourceManagerRequest) -> RmResult {
        let config = match SchedulerConfig::parse(&request.config) {
            Ok(config) => config,
            Err(error) => return RmResult::failed(error.to_string()),
        };
        let mut partition_configs = config.partitions;
        if partition_configs.is_empty() {
            partition_configs.push(PartitionConfig {
                name: "default".to_owned(),
                ..Default::default()
            });
        }
        for partition_config in &partition_configs {
            let name =
                normalize_partition_name(&partition_config.name, &request.rm_id, &self.cluster_id);
            let partition = match PartitionContext::new(
                &name,
                &request.rm_id,
                partition_config,
                &self.store,
                &self.registry,
            ) {
                Ok(partition) => partition,
                Err(error) => return RmResult::failed(error.to_string()),
            };
            event!(Level::INFO, partition = %name, msg = "partition created");
            self.partitions.write().insert(name, partition);
        }
        RmResult::succeeded("registered")
    }

    /// Remove every partition bound to a resource manager
    ///
    /// # Arguments
    ///
    /// * `rm_id` - The resource manager whose partitions go away
    #[instrument(name = "SchedulerCore::remove_partitions", skip(self))]
    fn remove_partitions(&self, rm_id: &str) {
        let mut partitions = self.partitions.write();
        let removed: Vec<_> = partitions
            .iter()
            .filter(|(_, partition)| partition.rm_id == rm_id)
            .map(|(name, _)| name.clone())
            .collect();
        for name in removed {
            if let Some(partition) = partitions.remove(&name) {
                partition.remove();
                event!(Level::INFO, partition = %name, msg = "partition removed");
            }
        }
    }

    /// Validate and apply a configuration update
    ///
    /// Existing partitions reload, new ones are created, and partitions of
    /// the calling resource manager that left the configuration are removed.
    ///
    /// # Arguments
    ///
    /// * `request` - The configuration update request
    #[instrument(name = "SchedulerCore::handle_config_update", skip_all, fields(rm_id = %request.rm_id))]
    fn handle_config_update(&self, request: &UpdateConfigurationRequest) -> RmResult {
        let config = match SchedulerConfig::parse(&request.config) {
            Ok(config) => config,
            Err(error) => return RmResult::failed(error.to_string()),
        };
        if config.partitions.is_empty() {
            return RmResult::succeeded("no partitions in configuration");
        }
        let mut configured = Vec::with_capacity(config.partitions.len());
        for partition_config in &config.partitions {
            let name =
                normalize_partition_name(&partition_config.name, &request.rm_id, &self.cluster_id);
            configured.push(name.clone());
            let existing = self.partitions.read().get(&name).cloned();
            match existing {
                Some(partition) => {
                    if let Err(error) = partition.reload(partition_config) {
                        return RmResult::failed(error.to_string());
                    }
                }
                None => {
                    match PartitionContext::new(
                        &name,
                        &request.rm_id,
                        partition_config,
                        &self.store,
                        &self.registry,
                    ) {
                        Ok(partition) => {
                            self.partitions.write().insert(name, partition);
                        }
                        Err(error) => return RmResult::failed(error.to_string()),
                    }
                }
            }
        }
        // partitions of this RM that left the configuration are removed
        let mut partitions = self.partitions.write();
        let gone: Vec<_> = partitions
            .iter()
            .filter(|(name, partition)| {
                partition.rm_id == request.rm_id && !configured.contains(name)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in gone {
            if let Some(partition) = partitions.remove(&name) {
                partition.remove();
                event!(Level::INFO, partition = %name, msg = "partition removed on config update");
            }
        }
        RmResult::succeeded("configuration updated")
    }

    /// Route new asks and releases to their partitions
    ///
    /// # Arguments
    ///
    /// * `request` - The allocation request to route
    fn handle_allocation_update(&self, request: &AllocationRequest) {
        // route the new asks by partition
        for alloc in &request.allocations {
            let Some(partition) = self.partitions.read().get(&alloc.partition_name).cloned() else {
                event!(
                    Level::WARN,
                    partition = %alloc.partition_name,
                    msg = "allocation update for unknown partition dropped"
                );
                continue;
            };
            partition.add_asks(std::slice::from_ref(alloc));
        }
        // route the releases by partition
        for release in &request.releases.allocations_to_release {
            let Some(partition) = self.partitions.read().get(&release.partition_name).cloned()
            else {
                continue;
            };
            let results = partition.release_allocations(std::slice::from_ref(release));
            if !results.released.is_empty() {
                enqueue_rm_event(
                    &self.outbound,
                    RmEvent::ReleaseAllocations {
                        rm_id: request.rm_id.clone(),
                        released: results.released,
                        result: None,
                    },
                );
            }
        }
        // new work may be schedulable right away
        self.notify.notify_one();
    }

    /// Route new and removed applications to their partitions
    ///
    /// # Arguments
    ///
    /// * `request` - The application request to route
    fn handle_application_update(&self, request: &ApplicationRequest) {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for add in &request.new {
            let Some(partition) = self.partitions.read().get(&add.partition_name).cloned() else {
                rejected.push(RejectedApplication {
                    application_id: add.application_id.clone(),
                    reason: format!("partition {} does not exist", add.partition_name),
                });
                continue;
            };
            match partition.add_application(add) {
                Ok(()) => accepted.push(AcceptedApplication {
                    application_id: add.application_id.clone(),
                }),
                Err(error) => rejected.push(RejectedApplication {
                    application_id: add.application_id.clone(),
                    reason: error.to_string(),
                }),
            }
        }
        let mut updated = Vec::new();
        for remove in &request.remove {
            let Some(partition) = self.partitions.read().get(&remove.partition_name).cloned()
            else {
                continue;
            };
            match partition.remove_application(&remove.application_id) {
                Ok(app) => updated.push(UpdatedApplication {
                    application_id: remove.application_id.clone(),
                    state: app.current_state().as_str().to_owned(),
                    message: "application removed".to_owned(),
                }),
                Err(error) => {
                    event!(
                        Level::DEBUG,
                        application = %remove.application_id,
                        error = %error,
                        msg = "application removal out of sync"
                    );
                }
            }
        }
        if !accepted.is_empty() || !rejected.is_empty() || !updated.is_empty() {
            enqueue_rm_event(
                &self.outbound,
                RmEvent::ApplicationUpdate {
                    rm_id: request.rm_id.clone(),
                    accepted,
                    rejected,
                    updated,
                },
            );
        }
        self.notify.notify_one();
    }

    /// Route node changes to their partitions
    ///
    /// # Arguments
    ///
    /// * `request` - The node request to route
    fn handle_node_update(&self, request: &NodeRequest) {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for node in &request.nodes {
            let partition_name = node.partition().to_owned();
            let Some(partition) = self.partitions.read().get(&partition_name).cloned() else {
                rejected.push(RejectedNode {
                    node_id: node.node_id.clone(),
                    reason: format!("partition {partition_name} does not exist"),
                });
                continue;
            };
            match node.action {
                NodeAction::Create => {
                    partition.add_node(node);
                    accepted.push(AcceptedNode {
                        node_id: node.node_id.clone(),
                    });
                }
                NodeAction::Update => partition.update_node(node),
                NodeAction::Drain => partition.drain_node(&node.node_id),
                NodeAction::Decomission => {
                    let results = partition.remove_node(&node.node_id);
                    if !results.released.is_empty() {
                        enqueue_rm_event(
                            &self.outbound,
                            RmEvent::ReleaseAllocations {
                                rm_id: request.rm_id.clone(),
                                released: results.released,
                                result: None,
                            },
                        );
                    }
                }
            }
        }
        if !accepted.is_empty() || !rejected.is_empty() {
            enqueue_rm_event(
                &self.outbound,
                RmEvent::NodeUpdate {
                    rm_id: request.rm_id.clone(),
                    accepted,
                    rejected,
                },
            );
        }
        self.notify.notify_one();
    }

    /// Run a scheduling pass over every partition
    fn schedule_all(&self) {
        let partitions: Vec<_> = self.partitions.read().values().cloned().collect();
        for partition in partitions {
            let results = partition.try_schedule();
            if !results.new.is_empty() {
                enqueue_rm_event(
                    &self.outbound,
                    RmEvent::NewAllocations {
                        rm_id: partition.rm_id.clone(),
                        allocations: results.new,
                        result: None,
                    },
                );
            }
            if !results.rejected.is_empty() {
                enqueue_rm_event(
                    &self.outbound,
                    RmEvent::RejectedAllocations {
                        rm_id: partition.rm_id.clone(),
                        rejected: results.rejected,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::gateway::{ResourceManagerCallback, RmGateway};
    use gantry::models::{
        AddApplicationRequest, Allocation, AllocationResponse, ApplicationResponse, NodeInfo,
        NodeResponse, RemoveApplicationRequest, Resource,
    };
    use gantry::Error;
    use parking_lot::Mutex as SyncMutex;

    /// A resource manager shim capturing every pushed response
    #[derive(Default)]
    struct MockResourceManager {
        allocations: SyncMutex<Vec<AllocationResponse>>,
        applications: SyncMutex<Vec<ApplicationResponse>>,
        nodes: SyncMutex<Vec<NodeResponse>>,
    }

    impl ResourceManagerCallback for MockResourceManager {
        fn update_allocation(&self, response: AllocationResponse) -> Result<(), Error> {
            self.allocations.lock().push(response);
            Ok(())
        }

        fn update_application(&self, response: ApplicationResponse) -> Result<(), Error> {
            self.applications.lock().push(response);
            Ok(())
        }

        fn update_node(&self, response: NodeResponse) -> Result<(), Error> {
            self.nodes.lock().push(response);
            Ok(())
        }
    }

    impl MockResourceManager {
        /// Get all new allocations pushed so far
        fn new_allocations(&self) -> Vec<Allocation> {
            self.allocations
                .lock()
                .iter()
                .flat_map(|response| response.new.clone())
                .collect()
        }

        /// Count the rejected allocations pushed so far
        fn rejected_allocations(&self) -> usize {
            self.allocations
                .lock()
                .iter()
                .map(|response| response.rejected_allocations.len())
                .sum()
        }
    }

    /// A running gateway and core pair wired together for tests
    struct Harness {
        gateway: Arc<RmGateway>,
        core: SchedulerCore,
        rm: Arc<MockResourceManager>,
    }

    /// Build and start a full scheduler harness
    fn generate_harness() -> Harness {
        let mut conf = Conf::default();
        conf.gantry.cluster_id = "mycluster".to_owned();
        // keep the pass interval tight so tests converge quickly
        conf.gantry.scheduler.schedule_interval_ms = 10;
        let store = Arc::new(EventStore::new(10_000, true));
        let registry = Arc::new(PluginRegistry::new());
        let (scheduler_tx, scheduler_rx) = kanal::bounded_async(1024);
        let gateway = RmGateway::new("mycluster", scheduler_tx, 1024);
        let core = SchedulerCore::new(
            &conf,
            scheduler_rx,
            gateway.outbound_queue(),
            store,
            registry,
        );
        gateway.start();
        core.start();
        Harness {
            gateway,
            core,
            rm: Arc::new(MockResourceManager::default()),
        }
    }

    /// Wait until a condition holds or a timeout passes
    async fn wait_for<F: Fn() -> bool>(condition: F, timeout_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        condition()
    }

    /// Build a node create request on the default partition
    fn generate_node(id: &str, memory: u64) -> NodeRequest {
        NodeRequest {
            nodes: vec![NodeInfo {
                node_id: id.to_owned(),
                action: NodeAction::Create,
                schedulable_resource: Resource::from_pairs([("memory", memory)]),
                ..Default::default()
            }],
            rm_id: "rm:1".to_owned(),
        }
    }

    /// Build a single application add request
    fn generate_app(id: &str, queue: &str) -> ApplicationRequest {
        ApplicationRequest {
            new: vec![AddApplicationRequest {
                application_id: id.to_owned(),
                queue_name: queue.to_owned(),
                user: "alice".to_owned(),
                ..Default::default()
            }],
            remove: Vec::default(),
            rm_id: "rm:1".to_owned(),
        }
    }

    /// Build a single ask request
    fn generate_ask(app: &str, key: &str, memory: u64) -> AllocationRequest {
        AllocationRequest {
            allocations: vec![Allocation {
                allocation_key: key.to_owned(),
                application_id: app.to_owned(),
                resource_per_alloc: Resource::from_pairs([("memory", memory)]),
                ..Default::default()
            }],
            releases: Default::default(),
            rm_id: "rm:1".to_owned(),
        }
    }

    #[tokio::test]
    async fn full_allocation_round_trip() {
        let harness = generate_harness();
        harness
            .gateway
            .register(
                RegisterResourceManagerRequest {
                    rm_id: "rm:1".to_owned(),
                    ..Default::default()
                },
                harness.rm.clone(),
            )
            .await
            .unwrap();
        // the default partition exists once registration returns
        assert!(harness
            .core
            .get_partition("[mycluster]rm:1.default")
            .is_some());
        harness.gateway.update_node(generate_node("N1", 10)).await.unwrap();
        harness
            .gateway
            .update_application(generate_app("A1", "root.single"))
            .await
            .unwrap();
        harness
            .gateway
            .update_allocation(generate_ask("A1", "K1", 8))
            .await
            .unwrap();
        // exactly one new allocation lands on the mock RM
        let rm = harness.rm.clone();
        assert!(
            wait_for(|| rm.new_allocations().len() == 1, 2000).await,
            "allocation was never pushed"
        );
        let allocs = harness.rm.new_allocations();
        assert_eq!(allocs[0].application_id, "A1");
        assert_eq!(allocs[0].allocation_key, "K1");
        assert_eq!(allocs[0].node_id, "N1");
        assert_eq!(allocs[0].resource_per_alloc.get("memory"), 8);
        // a second ask the node cannot hold is rejected exactly once
        harness
            .gateway
            .update_allocation(generate_ask("A1", "K2", 5))
            .await
            .unwrap();
        let rm = harness.rm.clone();
        assert!(
            wait_for(|| rm.rejected_allocations() == 1, 2000).await,
            "ask was never rejected"
        );
        // and no extra allocation or rejection ever shows up
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.rm.new_allocations().len(), 1);
        assert_eq!(harness.rm.rejected_allocations(), 1);
    }

    #[tokio::test]
    async fn unregistered_rm_fails_fast() {
        let harness = generate_harness();
        let error = harness
            .gateway
            .update_allocation(generate_ask("A1", "K1", 1))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("not registered"));
        let error = harness
            .gateway
            .update_node(generate_node("N1", 1))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("not registered"));
    }

    #[tokio::test]
    async fn re_registration_replaces_partitions() {
        let harness = generate_harness();
        let request = RegisterResourceManagerRequest {
            rm_id: "rm:1".to_owned(),
            ..Default::default()
        };
        harness
            .gateway
            .register(request.clone(), harness.rm.clone())
            .await
            .unwrap();
        harness
            .gateway
            .update_application(generate_app("A1", "root.single"))
            .await
            .unwrap();
        let core = &harness.core;
        assert!(
            wait_for(
                || {
                    core.get_partition("[mycluster]rm:1.default")
                        .and_then(|p| p.get_application("A1"))
                        .is_some()
                },
                2000
            )
            .await
        );
        // the second registration removes the old partitions synchronously
        let second = Arc::new(MockResourceManager::default());
        harness.gateway.register(request, second).await.unwrap();
        let partition = harness.core.get_partition("[mycluster]rm:1.default").unwrap();
        assert!(partition.get_application("A1").is_none());
        // a resource manager that never registered still fails fast
        let error = harness
            .gateway
            .update_allocation(AllocationRequest {
                rm_id: "rm:2".to_owned(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(error.to_string().contains("not registered"));
    }

    #[tokio::test]
    async fn inbound_requests_stay_ordered() {
        let harness = generate_harness();
        harness
            .gateway
            .register(
                RegisterResourceManagerRequest {
                    rm_id: "rm:1".to_owned(),
                    ..Default::default()
                },
                harness.rm.clone(),
            )
            .await
            .unwrap();
        // submit a burst of application adds in a known order
        for idx in 0..20 {
            harness
                .gateway
                .update_application(generate_app(&format!("app-{idx:02}"), "root.single"))
                .await
                .unwrap();
        }
        let rm = harness.rm.clone();
        assert!(
            wait_for(|| rm.applications.lock().len() == 20, 2000).await,
            "application responses were not delivered"
        );
        // responses arrive in submission order through the one dispatcher
        let seen: Vec<String> = harness
            .rm
            .applications
            .lock()
            .iter()
            .flat_map(|response| response.accepted.clone())
            .map(|accepted| accepted.application_id)
            .collect();
        let expected: Vec<String> = (0..20).map(|idx| format!("app-{idx:02}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn config_update_is_synchronous() {
        let harness = generate_harness();
        harness
            .gateway
            .register(
                RegisterResourceManagerRequest {
                    rm_id: "rm:1".to_owned(),
                    ..Default::default()
                },
                harness.rm.clone(),
            )
            .await
            .unwrap();
        // a bad config is surfaced to the caller
        let error = harness
            .gateway
            .update_configuration(UpdateConfigurationRequest {
                rm_id: "rm:1".to_owned(),
                config: "partitions:\n  - name: default\n    placement_rules:\n      - name: bogus\n".to_owned(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(error.to_string().contains("update of configuration failed"));
        // a good config applies before the call returns
        let config = "
partitions:
  - name: default
    queues:
      - name: root
        queues:
          - name: batch
            resources:
              max:
                memory: 100
";
        harness
            .gateway
            .update_configuration(UpdateConfigurationRequest {
                rm_id: "rm:1".to_owned(),
                config: config.to_owned(),
                ..Default::default()
            })
            .await
            .unwrap();
        let partition = harness.core.get_partition("[mycluster]rm:1.default").unwrap();
        let batch = partition.get_queue("root.batch").unwrap();
        assert_eq!(batch.max_resource().unwrap().get("memory"), 100);
        // the inspection projection sees the reloaded tree
        let daos = harness.core.partitions_dao();
        assert_eq!(daos.len(), 1);
        assert!(daos[0]
            .root
            .children
            .iter()
            .any(|child| child.queue_name == "root.batch"));
    }

    #[tokio::test]
    async fn application_removal_flows_through() {
        let harness = generate_harness();
        harness
            .gateway
            .register(
                RegisterResourceManagerRequest {
                    rm_id: "rm:1".to_owned(),
                    ..Default::default()
                },
                harness.rm.clone(),
            )
            .await
            .unwrap();
        harness
            .gateway
            .update_application(generate_app("A1", "root.single"))
            .await
            .unwrap();
        harness
            .gateway
            .update_application(ApplicationRequest {
                remove: vec![RemoveApplicationRequest {
                    application_id: "A1".to_owned(),
                    ..Default::default()
                }],
                rm_id: "rm:1".to_owned(),
                ..Default::default()
            })
            .await
            .unwrap();
        let core = &harness.core;
        assert!(
            wait_for(
                || {
                    core.get_partition("[mycluster]rm:1.default")
                        .map(|p| p.get_application("A1").is_none())
                        .unwrap_or_default()
                },
                2000
            )
            .await
        );
    }
}
