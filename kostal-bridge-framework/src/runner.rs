//! Task lifecycle for the bridge process.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Owns the long-running tasks of the bridge.
///
/// Workers are spawned under a name, run until Ctrl+C, and are then
/// aborted in spawn order.
///
/// # Example
///
/// ```ignore
/// use kostal_bridge_framework::BridgeRunner;
///
/// let mut runner = BridgeRunner::new("kostal");
/// runner.spawn("influx", store.clone().run());
/// runner.spawn("observable", observable.clone().run(interval));
/// runner.run().await;
/// ```
pub struct BridgeRunner {
    name: String,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl BridgeRunner {
    /// Create a runner for the named bridge.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        info!(bridge = %name, version = env!("CARGO_PKG_VERSION"), "Starting bridge");

        Self {
            name,
            tasks: Vec::new(),
        }
    }

    /// Number of tracked tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Names of tracked tasks, in spawn order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|(name, _)| name.as_str())
    }

    /// Spawn a named worker. It is aborted on shutdown.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(worker = %name, "Spawning worker");
        self.tasks.push((name, tokio::spawn(future)));
    }

    /// Run until Ctrl+C is received, then shut down.
    pub async fn run(self) {
        info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }

        info!(bridge = %self.name, "Received shutdown signal");
        self.shutdown().await;
    }

    /// Abort all tracked tasks and wait for them to finish.
    pub async fn shutdown(self) {
        for (_, task) in &self.tasks {
            task.abort();
        }
        for (name, task) in self.tasks {
            match task.await {
                Ok(()) => debug!(worker = %name, "Worker finished"),
                Err(e) if e.is_cancelled() => debug!(worker = %name, "Worker aborted"),
                Err(e) => warn!(worker = %name, error = %e, "Worker panicked"),
            }
        }

        info!(bridge = %self.name, "Goodbye!");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_shutdown_aborts_tasks() {
        let mut runner = BridgeRunner::new("test");
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        runner.spawn("sleeper", async move {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            flag.store(true, Ordering::SeqCst);
        });
        runner.spawn("quick", async {});

        assert_eq!(runner.task_count(), 2);
        assert_eq!(runner.task_names().collect::<Vec<_>>(), vec!["sleeper", "quick"]);

        runner.shutdown().await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
