//! The gateway that mediates all traffic between resource managers and the
//! scheduler core
//!
//! Inbound requests are normalized and enqueued to the scheduler handler in
//! submission order. Outbound responses flow through one bounded queue with
//! a single dispatcher task, which makes the dispatcher the single source of
//! outbound truth.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{event, instrument, Level};

use gantry::models::{
    normalize_partition_name, AcceptedApplication, AcceptedNode, Allocation, AllocationRelease,
    AllocationRequest, AllocationResponse, ApplicationRequest, ApplicationResponse, NodeRequest,
    NodeResponse, RegisterResourceManagerRequest, RegisterResourceManagerResponse,
    RejectedAllocation, RejectedApplication, RejectedNode, UpdateConfigurationRequest,
    UpdatedApplication, NODE_PARTITION_ATTRIBUTE,
};
use gantry::Error;

use super::core::SchedulerEvent;

/// The callback capability set a resource manager registers with
pub trait ResourceManagerCallback: Send + Sync {
    /// Push an allocation response to the resource manager
    ///
    /// # Arguments
    ///
    /// * `response` - The allocation response to push
    fn update_allocation(&self, response: AllocationResponse) -> Result<(), Error>;

    /// Push an application response to the resource manager
    ///
    /// # Arguments
    ///
    /// * `response` - The application response to push
    fn update_application(&self, response: ApplicationResponse) -> Result<(), Error>;

    /// Push a node response to the resource manager
    ///
    /// # Arguments
    ///
    /// * `response` - The node response to push
    fn update_node(&self, response: NodeResponse) -> Result<(), Error>;
}

/// The result handed back on a synchronous reply channel
#[derive(Debug, Clone)]
pub struct RmResult {
    /// Whether the operation succeeded
    pub succeeded: bool,
    /// A short summary of what happened
    pub reason: String,
}

impl RmResult {
    /// Create a successful result
    ///
    /// # Arguments
    ///
    /// * `reason` - A short summary of what happened
    #[must_use]
    pub fn succeeded<T: Into<String>>(reason: T) -> Self {
        RmResult {
            succeeded: true,
            reason: reason.into(),
        }
    }

    /// Create a failed result
    ///
    /// # Arguments
    ///
    /// * `reason` - Why the operation failed
    #[must_use]
    pub fn failed<T: Into<String>>(reason: T) -> Self {
        RmResult {
            succeeded: false,
            reason: reason.into(),
        }
    }
}

/// An outbound event pushed from the scheduler to a resource manager
pub enum RmEvent {
    /// Newly proposed allocations
    NewAllocations {
        /// The resource manager to push to
        rm_id: String,
        /// The proposed allocations
        allocations: Vec<Allocation>,
        /// The completion channel to signal once pushed
        result: Option<oneshot::Sender<RmResult>>,
    },
    /// Released allocations
    ReleaseAllocations {
        /// The resource manager to push to
        rm_id: String,
        /// The released allocations
        released: Vec<AllocationRelease>,
        /// The completion channel to signal once pushed
        result: Option<oneshot::Sender<RmResult>>,
    },
    /// Allocation asks the scheduler could not place
    RejectedAllocations {
        /// The resource manager to push to
        rm_id: String,
        /// The rejected asks
        rejected: Vec<RejectedAllocation>,
    },
    /// Application admission decisions and state changes
    ApplicationUpdate {
        /// The resource manager to push to
        rm_id: String,
        /// The accepted applications
        accepted: Vec<AcceptedApplication>,
        /// The rejected applications
        rejected: Vec<RejectedApplication>,
        /// The updated applications
        updated: Vec<UpdatedApplication>,
    },
    /// Node admission decisions
    NodeUpdate {
        /// The resource manager to push to
        rm_id: String,
        /// The accepted nodes
        accepted: Vec<AcceptedNode>,
        /// The rejected nodes
        rejected: Vec<RejectedNode>,
    },
}

impl RmEvent {
    /// The resource manager this event is addressed to
    #[must_use]
    pub fn rm_id(&self) -> &str {
        match self {
            RmEvent::NewAllocations { rm_id, .. }
            | RmEvent::ReleaseAllocations { rm_id, .. }
            | RmEvent::RejectedAllocations { rm_id, .. }
            | RmEvent::ApplicationUpdate { rm_id, .. }
            | RmEvent::NodeUpdate { rm_id, .. } => rm_id,
        }
    }
}

/// Enqueue an outbound event without ever blocking
///
/// The queue is sized so it never fills when consumption keeps up with
/// production; finding it full is a programmer error. The enqueue is
/// recorded and aborted rather than blocking the caller.
///
/// # Arguments
///
/// * `queue` - The outbound queue to enqueue into
/// * `rm_event` - The event to enqueue
pub fn enqueue_rm_event(queue: &kanal::AsyncSender<RmEvent>, rm_event: RmEvent) {
    match queue.try_send(rm_event) {
        Ok(true) => {
            event!(Level::DEBUG, queued = queue.len(), msg = "enqueued RM event");
        }
        Ok(false) => {
            event!(Level::ERROR, msg = "failed to enqueue RM event: queue is full");
            debug_assert!(false, "RM event queue overflow");
        }
        Err(error) => {
            event!(Level::WARN, error = %error, msg = "RM event queue is closed");
        }
    }
}

/// The gateway owning the resource manager bindings
pub struct RmGateway {
    /// The cluster id used to qualify partition names
    cluster_id: String,
    /// The registered callback for each resource manager
    callbacks: RwLock<HashMap<String, Arc<dyn ResourceManagerCallback>>>,
    /// The queue feeding the scheduler handler
    scheduler_queue: kanal::AsyncSender<SchedulerEvent>,
    /// The bounded queue of outbound events awaiting dispatch
    outbound_queue: kanal::AsyncSender<RmEvent>,
    /// The receive half of the outbound queue until the dispatcher starts
    dispatch_queue: Mutex<Option<kanal::AsyncReceiver<RmEvent>>>,
}

impl RmGateway {
    /// Create a new gateway
    ///
    /// # Arguments
    ///
    /// * `cluster_id` - The cluster id used to qualify partition names
    /// * `scheduler_queue` - The queue feeding the scheduler handler
    /// * `outbound_capacity` - The capacity of the outbound event queue
    #[must_use]
    pub fn new(
        cluster_id: &str,
        scheduler_queue: kanal::AsyncSender<SchedulerEvent>,
        outbound_capacity: usize,
    ) -> Arc<Self> {
        let (outbound_queue, dispatch_queue) = kanal::bounded_async(outbound_capacity);
        Arc::new(RmGateway {
            cluster_id: cluster_id.to_owned(),
            callbacks: RwLock::new(HashMap::default()),
            scheduler_queue,
            outbound_queue,
            dispatch_queue: Mutex::new(Some(dispatch_queue)),
        })
    }

    /// Get a sender for the outbound event queue
    #[must_use]
    pub fn outbound_queue(&self) -> kanal::AsyncSender<RmEvent> {
        self.outbound_queue.clone()
    }

    /// Start the single outbound dispatcher task
    ///
    /// Starting twice is a no op. The dispatcher exits when the outbound
    /// queue closes.
    pub fn start(self: &Arc<Self>) {
        let Some(queue) = self.dispatch_queue.lock().take() else {
            return;
        };
        let gateway = self.clone();
        tokio::spawn(async move {
            // the one and only consumer of the outbound queue
            while let Ok(rm_event) = queue.recv().await {
                gateway.dispatch(rm_event);
            }
            event!(Level::INFO, msg = "RM event dispatcher stopped");
        });
    }

    /// Stop the gateway by closing the outbound queue
    pub fn stop(&self) {
        event!(Level::INFO, msg = "stopping RM gateway");
        self.outbound_queue.close();
    }

    /// Look up the callback registered for a resource manager
    ///
    /// # Arguments
    ///
    /// * `rm_id` - The resource manager to look up
    #[must_use]
    pub fn get_callback(&self, rm_id: &str) -> Option<Arc<dyn ResourceManagerCallback>> {
        self.callbacks.read().get(rm_id).cloned()
    }

    /// Dispatch one outbound event to its resource manager
    ///
    /// A missing callback is logged and the event dropped; the dispatcher
    /// itself never crashes over a bad binding.
    ///
    /// # Arguments
    ///
    /// * `rm_event` - The event to dispatch
    fn dispatch(&self, rm_event: RmEvent) {
        let rm_id = rm_event.rm_id().to_owned();
        match rm_event {
            RmEvent::NewAllocations {
                allocations,
                result,
                ..
            } => {
                let count = allocations.len();
                if count != 0 {
                    self.push_allocation_response(
                        &rm_id,
                        AllocationResponse {
                            new: allocations,
                            ..Default::default()
                        },
                    );
                }
                // done, notify the completion channel
                if let Some(result) = result {
                    let _ = result.send(RmResult::succeeded(format!("no. of allocations: {count}")));
                }
            }
            RmEvent::ReleaseAllocations {
                released, result, ..
            } => {
                let count = released.len();
                if count != 0 {
                    self.push_allocation_response(
                        &rm_id,
                        AllocationResponse {
                            released,
                            ..Default::default()
                        },
                    );
                }
                // done, notify the completion channel
                if let Some(result) = result {
                    let _ = result.send(RmResult::succeeded(format!("no. of allocations: {count}")));
                }
            }
            RmEvent::RejectedAllocations { rejected, .. } => {
                if !rejected.is_empty() {
                    self.push_allocation_response(
                        &rm_id,
                        AllocationResponse {
                            rejected_allocations: rejected,
                            ..Default::default()
                        },
                    );
                }
            }
            RmEvent::ApplicationUpdate {
                accepted,
                rejected,
                updated,
                ..
            } => {
                if accepted.is_empty() && rejected.is_empty() && updated.is_empty() {
                    return;
                }
                let Some(callback) = self.get_callback(&rm_id) else {
                    event!(Level::ERROR, rm_id = %rm_id, msg = "RM is not registered");
                    return;
                };
                let response = ApplicationResponse {
                    accepted,
                    rejected,
                    updated,
                };
                if let Err(error) = callback.update_application(response) {
                    self.handle_callback_error(&rm_id, &error);
                }
            }
            RmEvent::NodeUpdate {
                accepted, rejected, ..
            } => {
                if accepted.is_empty() && rejected.is_empty() {
                    return;
                }
                let Some(callback) = self.get_callback(&rm_id) else {
                    event!(Level::ERROR, rm_id = %rm_id, msg = "RM is not registered");
                    return;
                };
                let response = NodeResponse { accepted, rejected };
                if let Err(error) = callback.update_node(response) {
                    self.handle_callback_error(&rm_id, &error);
                }
            }
        }
    }

    /// Push an allocation response through the registered callback
    ///
    /// # Arguments
    ///
    /// * `rm_id` - The resource manager to push to
    /// * `response` - The allocation response to push
    fn push_allocation_response(&self, rm_id: &str, response: AllocationResponse) {
        let Some(callback) = self.get_callback(rm_id) else {
            event!(Level::ERROR, rm_id, msg = "RM is not registered");
            return;
        };
        if let Err(error) = callback.update_allocation(response) {
            self.handle_callback_error(rm_id, &error);
        }
    }

    /// Record a failed callback invocation
    ///
    /// The event is not resent; the resource manager resynchronises on its
    /// next update.
    ///
    /// # Arguments
    ///
    /// * `rm_id` - The resource manager whose callback failed
    /// * `error` - The error the callback returned
    fn handle_callback_error(&self, rm_id: &str, error: &Error) {
        event!(Level::ERROR, rm_id, error = %error, msg = "failed to handle response");
    }

    /// Register a resource manager, replacing any prior binding
    ///
    /// A re-registration drives the removal of the old binding's partitions
    /// synchronously before the new callback is installed. The failure
    /// reason from the scheduler is surfaced verbatim.
    ///
    /// # Arguments
    ///
    /// * `request` - The registration request
    /// * `callback` - The callback capability set to install
    #[instrument(name = "RmGateway::register", skip_all, fields(rm_id = %request.rm_id))]
    pub async fn register(
        &self,
        request: RegisterResourceManagerRequest,
        callback: Arc<dyn ResourceManagerCallback>,
    ) -> Result<RegisterResourceManagerResponse, Error> {
        // a re-register cleans up the old binding first
        if self.get_callback(&request.rm_id).is_some() {
            let (reply, answer) = oneshot::channel();
            self.scheduler_queue
                .send(SchedulerEvent::RmPartitionsRemove {
                    rm_id: request.rm_id.clone(),
                    reply,
                })
                .await?;
            let result = answer.await?;
            if !result.succeeded {
                return Err(Error::new(format!(
                    "registration of RM failed: {}",
                    result.reason
                )));
            }
        }
        let rm_id = request.rm_id.clone();
        let (reply, answer) = oneshot::channel();
        self.scheduler_queue
            .send(SchedulerEvent::RmRegistration { request, reply })
            .await?;
        // wait for the scheduler to build the partitions
        let result = answer.await?;
        if !result.succeeded {
            return Err(Error::new(format!(
                "registration of RM failed: {}",
                result.reason
            )));
        }
        self.callbacks.write().insert(rm_id, callback);
        Ok(RegisterResourceManagerResponse::default())
    }

    /// Forward an allocation update to the scheduler handler
    ///
    /// Every allocation and release is normalized to its fully qualified
    /// partition name first. The enqueue is synchronous so a single resource
    /// manager's requests land on the handler in submission order.
    ///
    /// # Arguments
    ///
    /// * `request` - The allocation request to forward
    pub async fn update_allocation(&self, mut request: AllocationRequest) -> Result<(), Error> {
        if self.get_callback(&request.rm_id).is_none() {
            return Err(Error::new(format!(
                "received AllocationRequest, but RmID=\"{}\" not registered",
                request.rm_id
            )));
        }
        // normalize the new allocations
        for alloc in &mut request.allocations {
            alloc.partition_name =
                normalize_partition_name(&alloc.partition_name, &request.rm_id, &self.cluster_id);
        }
        // normalize the releases
        for release in &mut request.releases.allocations_to_release {
            release.partition_name =
                normalize_partition_name(&release.partition_name, &request.rm_id, &self.cluster_id);
        }
        self.scheduler_queue
            .send(SchedulerEvent::UpdateAllocation { request })
            .await?;
        Ok(())
    }

    /// Forward an application update to the scheduler handler
    ///
    /// # Arguments
    ///
    /// * `request` - The application request to forward
    pub async fn update_application(&self, mut request: ApplicationRequest) -> Result<(), Error> {
        if self.get_callback(&request.rm_id).is_none() {
            return Err(Error::new(format!(
                "received ApplicationRequest, but RmID=\"{}\" not registered",
                request.rm_id
            )));
        }
        // normalize the new applications
        for app in &mut request.new {
            app.partition_name =
                normalize_partition_name(&app.partition_name, &request.rm_id, &self.cluster_id);
        }
        // normalize the removed applications
        for app in &mut request.remove {
            app.partition_name =
                normalize_partition_name(&app.partition_name, &request.rm_id, &self.cluster_id);
        }
        self.scheduler_queue
            .send(SchedulerEvent::UpdateApplication { request })
            .await?;
        Ok(())
    }

    /// Forward a node update to the scheduler handler
    ///
    /// # Arguments
    ///
    /// * `request` - The node request to forward
    pub async fn update_node(&self, mut request: NodeRequest) -> Result<(), Error> {
        if self.get_callback(&request.rm_id).is_none() {
            return Err(Error::new(format!(
                "received NodeRequest, but RmID=\"{}\" not registered",
                request.rm_id
            )));
        }
        // normalize the partition attribute on every node
        for node in &mut request.nodes {
            let partition = node.partition().to_owned();
            node.attributes.insert(
                NODE_PARTITION_ATTRIBUTE.to_owned(),
                normalize_partition_name(&partition, &request.rm_id, &self.cluster_id),
            );
        }
        self.scheduler_queue
            .send(SchedulerEvent::UpdateNode { request })
            .await?;
        Ok(())
    }

    /// Apply a configuration update and wait for the outcome
    ///
    /// The caller blocks on the reply channel until the scheduler reports
    /// success or failure.
    ///
    /// # Arguments
    ///
    /// * `request` - The configuration update to apply
    pub async fn update_configuration(
        &self,
        request: UpdateConfigurationRequest,
    ) -> Result<(), Error> {
        let (reply, answer) = oneshot::channel();
        self.scheduler_queue
            .send(SchedulerEvent::RmConfigUpdate { request, reply })
            .await?;
        let result = answer.await?;
        if !result.succeeded {
            return Err(Error::new(format!(
                "update of configuration failed: {}",
                result.reason
            )));
        }
        Ok(())
    }
}
