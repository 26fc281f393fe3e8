//! Network reachability monitor
//!
//! Observes platform connectivity notifications and triggers a drain pass
//! exactly on the disconnected-to-connected transition, not on every event.
//! The trigger is fire-and-forget: the platform callback is never blocked on
//! the sync result, and an `AlreadyRunning` rejection is left for the next
//! reconnect or scheduled pass to pick up.

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::processor::{SyncError, SyncHandle};

/// Edge-detecting connectivity observer
pub struct ReachabilityMonitor {
    sync: Arc<dyn SyncHandle>,
    last_known: Arc<RwLock<Option<bool>>>,
    changes: broadcast::Sender<bool>,
}

impl ReachabilityMonitor {
    /// Create a monitor that triggers the given sync handle on reconnect
    pub fn new(sync: Arc<dyn SyncHandle>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            sync,
            last_known: Arc::new(RwLock::new(None)),
            changes,
        }
    }

    /// Subscribe to raw reachability changes, independent of sync triggering
    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.changes.subscribe()
    }

    /// Last-known reachability, if any notification has arrived yet
    pub async fn is_reachable(&self) -> Option<bool> {
        *self.last_known.read().await
    }

    /// Feed one platform-level connectivity notification.
    ///
    /// Compares against the previous value; only a `false -> true` edge
    /// spawns a sync. Repeated notifications of the same state are ignored.
    pub async fn report(&self, reachable: bool) {
        let previous = {
            let mut last = self.last_known.write().await;
            last.replace(reachable)
        };

        if previous == Some(reachable) {
            return;
        }

        tracing::debug!(reachable, "reachability changed");
        let _ = self.changes.send(reachable);

        if previous == Some(false) && reachable {
            let sync = Arc::clone(&self.sync);
            tokio::spawn(async move {
                match sync.sync_all().await {
                    Ok(report) => {
                        tracing::info!(
                            succeeded = report.succeeded,
                            failed = report.failed,
                            "reconnect sync finished"
                        );
                    }
                    Err(SyncError::AlreadyRunning) => {
                        tracing::debug!("reconnect sync skipped, drain already running");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reconnect sync failed");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Result, SyncReport};
    use mockall::mock;
    use std::time::Duration;

    mock! {
        Sync {}

        #[async_trait::async_trait]
        impl SyncHandle for Sync {
            async fn sync_all(&self) -> Result<SyncReport>;
        }
    }

    fn empty_report() -> SyncReport {
        SyncReport {
            attempted: 0,
            succeeded: 0,
            failed: 0,
            pending_after: 0,
            error: None,
        }
    }

    async fn settle() {
        // Let the spawned trigger task run.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_reconnect_triggers_exactly_one_sync() {
        let mut sync = MockSync::new();
        sync.expect_sync_all().times(1).returning(|| Ok(empty_report()));

        let monitor = ReachabilityMonitor::new(Arc::new(sync));

        monitor.report(true).await;
        monitor.report(false).await;
        monitor.report(true).await;
        settle().await;
        // MockSync panics on drop if sync_all ran more or less than once.
    }

    #[tokio::test]
    async fn test_initial_notification_does_not_trigger() {
        let mut sync = MockSync::new();
        sync.expect_sync_all().times(0);

        let monitor = ReachabilityMonitor::new(Arc::new(sync));

        monitor.report(true).await;
        monitor.report(true).await;
        settle().await;
        assert_eq!(monitor.is_reachable().await, Some(true));
    }

    #[tokio::test]
    async fn test_disconnect_does_not_trigger() {
        let mut sync = MockSync::new();
        sync.expect_sync_all().times(0);

        let monitor = ReachabilityMonitor::new(Arc::new(sync));

        monitor.report(true).await;
        monitor.report(false).await;
        settle().await;
        assert_eq!(monitor.is_reachable().await, Some(false));
    }

    #[tokio::test]
    async fn test_rejection_not_retried_here() {
        let mut sync = MockSync::new();
        sync.expect_sync_all()
            .times(1)
            .returning(|| Err(SyncError::AlreadyRunning));

        let monitor = ReachabilityMonitor::new(Arc::new(sync));

        monitor.report(false).await;
        monitor.report(true).await;
        settle().await;
    }

    #[tokio::test]
    async fn test_subscribers_see_raw_changes() {
        let mut sync = MockSync::new();
        sync.expect_sync_all().returning(|| Ok(empty_report()));

        let monitor = ReachabilityMonitor::new(Arc::new(sync));
        let mut rx = monitor.subscribe();

        monitor.report(true).await;
        monitor.report(false).await;
        monitor.report(false).await; // duplicate, no event
        monitor.report(true).await;
        settle().await;

        assert_eq!(rx.recv().await.unwrap(), true);
        assert_eq!(rx.recv().await.unwrap(), false);
        assert_eq!(rx.recv().await.unwrap(), true);
        assert!(rx.try_recv().is_err());
    }
}
