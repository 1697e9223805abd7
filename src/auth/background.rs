//! Background work detached from the request that triggered it.
//!
//! Cleanup and bookkeeping (index pruning, last-IP updates, revocation after a
//! user disappears) run on a shared [`TaskTracker`]. A task outlives the
//! cancellation of its request; its failure is logged and never reaches the
//! caller. The expiry sweeper runs on the same tracker until its
//! [`CancellationToken`] fires.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use super::kv::MemoryStore;

#[derive(Clone, Debug, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire-and-forget `task`; an error is logged under `name`.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.tracker.spawn(async move {
            if let Err(err) = task.await {
                warn!(task = name, "Background task failed: {err:#}");
            }
        });
    }

    /// Purge expired entries from `store` every `every` until `cancel` fires.
    pub fn spawn_sweeper(&self, store: Arc<MemoryStore>, every: Duration, cancel: CancellationToken) {
        self.tracker.spawn(async move {
            info!(interval_secs = every.as_secs(), "Expiry sweeper started");
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Expiry sweeper stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            debug!(purged, "Expiry sweeper: purged entries");
                        }
                    }
                }
            }
        });
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Wait for every task spawned so far. New tasks may be spawned afterwards.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Close the tracker and wait for in-flight work. Called once at shutdown.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::kv::SharedStore;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn failing_tasks_do_not_poison_the_tracker() -> Result<()> {
        let tasks = BackgroundTasks::new();
        let ran = Arc::new(AtomicUsize::new(0));

        tasks.spawn("fails", async { Err(anyhow::anyhow!("boom")) });
        let counter = Arc::clone(&ran);
        tasks.spawn("counts", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        tasks.wait_idle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(tasks.is_empty());

        let counter = Arc::clone(&ran);
        tasks.spawn("counts again", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tasks.wait_idle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_until_cancelled() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.set("short", "v", Some(Duration::from_secs(5))).await?;
        store.set("forever", "v", None).await?;

        let tasks = BackgroundTasks::new();
        let cancel = CancellationToken::new();
        tasks.spawn_sweeper(Arc::clone(&store), Duration::from_secs(10), cancel.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(store.len(), 1);

        cancel.cancel();
        tasks.shutdown().await;
        assert!(tasks.is_empty());
        Ok(())
    }
}
