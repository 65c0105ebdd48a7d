//! Periodic health publication.

use std::sync::Arc;
use std::time::Duration;

use kostal_bridge_framework::Result;
use tracing::{info, warn};

use crate::components::Components;

/// Publish the current health keys through the status publisher.
///
/// Returns the number of keys published; zero when not ready.
pub fn publish_health(components: &Components) -> Result<usize> {
    let status = components.status_keys();
    let Some(publisher) = components.status_publisher() else {
        return Ok(0);
    };
    if status.is_empty() {
        return Ok(0);
    }

    publisher.publish_status(&status)?;
    Ok(status.len())
}

/// Log the status line and publish the health keys every `interval`.
pub async fn run(components: Arc<Components>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        info!(status = %components.status_text(), "Heartbeat");
        if let Err(e) = publish_health(&components) {
            warn!(error = %e, "Failed to publish health keys");
        }
    }
}
