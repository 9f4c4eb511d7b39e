//! The building blocks of the Gantry scheduler core

pub mod core;
pub mod events;
pub mod gateway;
pub mod objects;
pub mod partition;
pub mod placement;
pub mod plugins;
pub mod ugm;

pub use self::core::{SchedulerCore, SchedulerEvent};
pub use events::{EventPublisher, EventStore};
pub use gateway::{ResourceManagerCallback, RmEvent, RmGateway, RmResult};
pub use partition::PartitionContext;
pub use plugins::{EventSink, PluginRegistry, PredicatesArgs, PredicatesPlugin};
