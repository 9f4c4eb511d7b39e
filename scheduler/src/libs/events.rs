//! The observability event pipeline for the scheduler
//!
//! Entity mutations emit records into a bounded store; a periodic publisher
//! drains the store to a registered sink. Events are best effort with
//! explicit loss counters.

mod publisher;
mod sources;
mod store;

pub use publisher::EventPublisher;
pub use sources::{
    termination_change_detail, ApplicationEvents, NodeEvents, QueueEvents, UserGroupEvents,
};
pub use store::EventStore;
