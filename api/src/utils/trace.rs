//! Sets up tracing for Gantry components

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::conf::TracingSettings;

/// Setup the tracer for a Gantry component
///
/// The filter honours `RUST_LOG` when set and falls back to the configured
/// level otherwise.
///
/// # Arguments
///
/// * `name` - The name of the component we are tracing
/// * `settings` - The tracing settings from the config
pub fn setup(name: &str, settings: &TracingSettings) {
    // honour an explicit env filter before the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));
    // build our local stdout subscriber
    let local = tracing_subscriber::fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(filter)
        .with(local)
        .try_init()
        .expect("Failed to register stdout registry");
    tracing::info!(component = name, "tracing initialized");
}
