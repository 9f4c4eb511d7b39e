//! The entities the scheduler core reasons about

mod allocation;
mod application;
mod node;
mod queue;

pub use allocation::{Allocation, Ask};
pub use application::{Application, ApplicationState, PlaceholderData};
pub use node::SchedulingNode;
pub use queue::{QueueState, SchedulingQueue};
