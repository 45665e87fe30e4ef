use super::SnapshotManager;
use crate::storage::InMemoryTraceStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Background worker that periodically snapshots the store
pub struct SnapshotWorker {
    store: Arc<InMemoryTraceStore>,
    manager: Arc<SnapshotManager>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl SnapshotWorker {
    pub fn new(
        store: Arc<InMemoryTraceStore>,
        manager: Arc<SnapshotManager>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            manager,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Snapshot worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);
            // The first tick completes immediately; nothing to save yet
            interval.tick().await;

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                self.snapshot_now().await;
            }

            tracing::info!("Snapshot worker stopped");
        })
    }

    /// Write a snapshot right away, off the async runtime threads
    pub async fn snapshot_now(&self) {
        let store = Arc::clone(&self.store);
        let manager = Arc::clone(&self.manager);

        match tokio::task::spawn_blocking(move || manager.create_snapshot(&store)).await {
            Ok(Ok(metadata)) => {
                tracing::info!(
                    snapshot_id = %metadata.id,
                    traces = metadata.trace_count,
                    "Snapshot saved"
                );
            }
            Ok(Err(e)) => tracing::error!("Snapshot failed: {}", e),
            Err(e) => tracing::error!("Snapshot task panicked: {}", e),
        }
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if worker is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
