use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

mod args;
mod libs;

use libs::{EventPublisher, EventStore, PluginRegistry, RmGateway, SchedulerCore};

/// The Gantry scheduler
#[tokio::main]
async fn main() {
    // get command line args
    let args = args::Args::parse();
    // try to load a config file
    let conf = gantry::Conf::new(&args.config).expect("Failed to load config");
    // setup our tracer
    gantry::utils::trace::setup("GantryScheduler", &conf.gantry.tracing);
    // build the shared event store and plugin registry
    let store = Arc::new(EventStore::new(
        conf.gantry.events.store_capacity,
        conf.gantry.events.tracking_enabled,
    ));
    let registry = Arc::new(PluginRegistry::new());
    // wire the inbound queue between the gateway and the core
    let (scheduler_tx, scheduler_rx) =
        kanal::bounded_async(conf.gantry.scheduler.inbound_event_capacity);
    let gateway = RmGateway::new(
        &conf.gantry.cluster_id,
        scheduler_tx,
        conf.gantry.scheduler.pending_event_capacity,
    );
    let core = SchedulerCore::new(
        &conf,
        scheduler_rx,
        gateway.outbound_queue(),
        store.clone(),
        registry.clone(),
    );
    let publisher = EventPublisher::new(
        store,
        registry,
        Duration::from_millis(conf.gantry.events.publish_interval_ms),
    );
    // start the long lived loops
    gateway.start();
    core.start();
    publisher.start();
    // run until we are asked to stop
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to wait for shutdown signal");
    publisher.stop();
    core.stop();
    gateway.stop();
}
