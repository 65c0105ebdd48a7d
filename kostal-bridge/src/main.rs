//! Kostal inverter bridge.
//!
//! Polls the inverter and forwards measurements to InfluxDB and MQTT.

use std::sync::Arc;

use anyhow::Result;
use kostal_bridge::{Components, heartbeat};
use kostal_bridge_framework::{BridgeArgs, BridgeRunner};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse();

    kostal_common::init_tracing(&args.logging())
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!(work_dir = %args.work_dir.display(), "Starting kostal-bridge");

    let mut components = Components::new();
    if let Err(e) = components.init(&args.work_dir) {
        error!(error = %e, "Initialization failed");
        return Err(e.into());
    }
    if args.console && components.enable_console_observer() {
        info!("Console observer enabled");
    }

    let mut runner = BridgeRunner::new("kostal");
    components.start(&mut runner, args.poll_interval())?;

    let components = Arc::new(components);
    info!(status = %components.status_text(), "Bridge ready");
    runner.spawn(
        "heartbeat",
        heartbeat::run(components.clone(), args.heartbeat_interval()),
    );

    runner.run().await;
    Ok(())
}
