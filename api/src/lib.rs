//! The shared models, config, and errors for Gantry
//!
//! Gantry is a cluster workload scheduler core. This crate carries the
//! objects that cross component boundaries: the resource manager wire
//! messages, resource vectors, event records, DAO projections, and the
//! config and error types every component uses.

#[macro_use]
extern crate serde_derive;

pub mod conf;
pub mod errors;
pub mod models;
pub mod utils;

pub use conf::Conf;
pub use errors::Error;
