//! The Gantry scheduler core
//!
//! The decision engine between resource managers and a pool of compute
//! nodes: it ingests node, application, and allocation updates, places
//! applications into a hierarchical queue tree under quota and ACL
//! constraints, and pushes allocation decisions back to each resource
//! manager through a single outbound dispatcher.

mod args;
mod libs;

pub use libs::{
    EventPublisher, EventSink, EventStore, PartitionContext, PluginRegistry, PredicatesArgs,
    PredicatesPlugin, ResourceManagerCallback, RmEvent, RmGateway, RmResult, SchedulerCore,
    SchedulerEvent,
};
