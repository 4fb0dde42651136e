//! Coordinated shutdown of the proxy's long-running tasks.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Stops the accept loops and waits for them to drain.
///
/// Each long-running task (a load balancer listener, the metrics endpoint)
/// takes a receiver from [`subscribe`](ShutdownSignal::subscribe) and hands
/// its join handle to [`register`](ShutdownSignal::register);
/// [`shutdown_and_join`](ShutdownSignal::shutdown_and_join) then fires the
/// signal once and does not return until every registered task has stopped.
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            handles: Vec::new(),
        }
    }

    /// Receiver for a task that should stop when shutdown fires.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Track a spawned task so `shutdown_and_join` waits for it.
    pub fn register(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Fire the signal and wait for every registered task to finish.
    pub async fn shutdown_and_join(self) {
        let _ = self.sender.send(());
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "task ended abnormally during shutdown");
            }
        }
        info!("all tasks stopped");
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_joins_registered_tasks() {
        let mut signal = ShutdownSignal::new();
        let mut rx = signal.subscribe();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        signal.register(tokio::spawn(async move {
            let _ = started_tx.send(());
            let _ = rx.recv().await;
        }));

        // The task is parked on the receiver before the signal fires.
        started_rx.await.unwrap();
        signal.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn test_shutdown_with_no_tasks_returns() {
        ShutdownSignal::new().shutdown_and_join().await;
    }
}
