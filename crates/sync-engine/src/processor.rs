//! Sync processor
//!
//! Drains the mutation queue against the remote service, exactly once per
//! drain pass. The `Idle -> Draining -> Idle` state machine lives behind a
//! single try-lock: a trigger arriving while a drain is in progress gets
//! [`SyncError::AlreadyRunning`] immediately, with no side effects, and may
//! retry later. This is what prevents two drains from double-marking or
//! concurrently purging the same items.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};

use remote_client::{RemoteMutation, RemoteService};
use storage::{now_millis, MutationQueue, QueueItem, StorageError};

/// Errors from the sync processor
#[derive(Debug, Error)]
pub enum SyncError {
    /// A drain was requested while one was already running.
    ///
    /// A normal rejection, not a fault: the running drain will handle the
    /// queue, and the next trigger retries.
    #[error("Sync already in progress")]
    AlreadyRunning,

    /// The durable store failed; the pass aborts and the failure propagates
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Outcome of one drain pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Items the pass attempted (the due snapshot)
    pub attempted: usize,
    /// Items applied remotely and purged
    pub succeeded: usize,
    /// Items that failed and remain queued
    pub failed: usize,
    /// Unsynced items left after the pass (failed plus not-yet-due)
    pub pending_after: usize,
    /// Non-fatal aggregate error when any item failed
    pub error: Option<String>,
}

/// Observable processor status
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncStatus {
    /// Whether a drain pass is currently running
    pub is_syncing: bool,
    /// When the last drain pass finished (unix millis)
    pub last_sync_time: Option<i64>,
    /// Unsynced items at the end of the last pass
    pub pending_count: usize,
    /// Human-readable last error, if any
    pub last_error: Option<String>,
}

/// Events emitted to registered observers after every transition
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A drain pass started
    DrainStarted,
    /// A drain pass finished with this report
    DrainFinished(SyncReport),
    /// The observable status changed
    StatusChanged(SyncStatus),
}

/// The sync entry point shared by all three triggers.
///
/// The reachability monitor and the background scheduler depend on this
/// trait rather than the concrete processor.
#[async_trait::async_trait]
pub trait SyncHandle: Send + Sync {
    /// Run one drain pass, or reject if one is already running
    async fn sync_all(&self) -> Result<SyncReport>;
}

/// Drains pending mutations against the remote service
pub struct SyncProcessor {
    queue: MutationQueue,
    remote: Arc<dyn RemoteService>,
    drain_gate: Arc<Mutex<()>>,
    status: Arc<RwLock<SyncStatus>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncProcessor {
    /// Create a processor over the queue and a remote service
    pub fn new(queue: MutationQueue, remote: Arc<dyn RemoteService>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            queue,
            remote,
            drain_gate: Arc::new(Mutex::new(())),
            status: Arc::new(RwLock::new(SyncStatus::default())),
            events,
        }
    }

    /// Subscribe to status-change and drain events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the observable status
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Current unsynced item count, straight from the queue
    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.queue.pending_count().await?)
    }

    async fn set_status(&self, f: impl FnOnce(&mut SyncStatus)) {
        let mut status = self.status.write().await;
        f(&mut status);
        let snapshot = status.clone();
        drop(status);
        let _ = self.events.send(SyncEvent::StatusChanged(snapshot));
    }

    /// Attempt one mutation; errors become the per-item failure message.
    async fn dispatch(&self, item: &QueueItem) -> std::result::Result<(), String> {
        let mutation =
            RemoteMutation::from_queue_row(&item.target_table, item.action.as_str(), &item.payload)
                .map_err(|e| e.to_string())?;

        self.remote
            .apply(&mutation)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn drain(&self) -> Result<SyncReport> {
        let items = self.queue.list_due(now_millis()).await?;
        let attempted = items.len();

        if items.is_empty() {
            let pending_after = self.queue.pending_count().await?;
            return Ok(SyncReport {
                attempted: 0,
                succeeded: 0,
                failed: 0,
                pending_after,
                error: None,
            });
        }

        let mut succeeded = 0;
        let mut failed = 0;

        // Strictly sequential, in creation order. A single item's failure is
        // recorded and the pass moves on; partial progress is preserved.
        for item in &items {
            match self.dispatch(item).await {
                Ok(()) => {
                    self.queue.mark_synced(&item.id).await?;
                    succeeded += 1;
                }
                Err(message) => {
                    tracing::warn!(
                        id = %item.id,
                        table = %item.target_table,
                        error = %message,
                        "mutation failed to sync"
                    );
                    self.queue.mark_error(&item.id, &message).await?;
                    failed += 1;
                }
            }
        }

        let purged = self.queue.purge_synced().await?;
        let pending_after = self.queue.pending_count().await?;

        tracing::info!(attempted, succeeded, failed, purged, "drain pass finished");

        let error = (failed > 0).then(|| format!("{failed} of {attempted} mutations failed to sync"));
        Ok(SyncReport {
            attempted,
            succeeded,
            failed,
            pending_after,
            error,
        })
    }
}

#[async_trait::async_trait]
impl SyncHandle for SyncProcessor {
    async fn sync_all(&self) -> Result<SyncReport> {
        let Ok(_guard) = self.drain_gate.try_lock() else {
            return Err(SyncError::AlreadyRunning);
        };

        self.set_status(|s| s.is_syncing = true).await;
        let _ = self.events.send(SyncEvent::DrainStarted);

        let result = self.drain().await;

        match result {
            Ok(report) => {
                self.set_status(|s| {
                    s.is_syncing = false;
                    s.last_sync_time = Some(now_millis());
                    s.pending_count = report.pending_after;
                    s.last_error = report.error.clone();
                })
                .await;
                let _ = self.events.send(SyncEvent::DrainFinished(report.clone()));
                Ok(report)
            }
            Err(e) => {
                let message = e.to_string();
                self.set_status(|s| {
                    s.is_syncing = false;
                    s.last_error = Some(message);
                })
                .await;
                Err(e)
            }
        }
    }
}

impl Clone for SyncProcessor {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            remote: Arc::clone(&self.remote),
            drain_gate: Arc::clone(&self.drain_gate),
            status: Arc::clone(&self.status),
            events: self.events.clone(),
        }
    }
}
