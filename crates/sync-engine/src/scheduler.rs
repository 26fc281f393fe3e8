//! Background task scheduler
//!
//! Keeps reconciliation happening when the client is not in active use, by
//! registering one named periodic task. The interval is a lower bound, not a
//! guarantee; the host OS decides when the task actually fires. Hosts can
//! also restrict or deny background execution entirely, in which case the
//! engine degrades to reachability- and user-triggered sync.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::processor::{SyncError, SyncHandle};

/// Name of the engine's single periodic task
pub const TASK_NAME: &str = "fieldlink-background-sync";

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The host policy denies background execution
    #[error("Background execution denied by host policy")]
    Denied,
}

/// Whether the host OS permits background execution.
///
/// Policy differs by device and battery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundPermission {
    /// Background execution is allowed
    Available,
    /// Allowed but throttled by the host; wake-ups may be rare
    Restricted,
    /// Denied; the periodic task cannot be registered
    Denied,
}

/// Host hook answering whether background execution is permitted right now
pub trait HostPolicy: Send + Sync {
    /// Current background-execution permission
    fn background_permission(&self) -> BackgroundPermission;
}

/// Policy for hosts without background-execution restrictions
pub struct AlwaysAvailable;

impl HostPolicy for AlwaysAvailable {
    fn background_permission(&self) -> BackgroundPermission {
        BackgroundPermission::Available
    }
}

/// Result code the host expects from a background wake-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The pass applied at least one mutation
    NewData,
    /// Nothing to do (or a drain was already running)
    NoData,
    /// The pass failed
    Failed,
}

/// Registers and owns the periodic background sync task
pub struct BackgroundScheduler {
    sync: Arc<dyn SyncHandle>,
    policy: Arc<dyn HostPolicy>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundScheduler {
    /// Create a scheduler over a sync handle and a host policy
    pub fn new(sync: Arc<dyn SyncHandle>, policy: Arc<dyn HostPolicy>) -> Self {
        Self {
            sync,
            policy,
            task: Mutex::new(None),
        }
    }

    /// Register the periodic task. Idempotent: re-registering while the task
    /// is live is a no-op. Fails only when the host denies background
    /// execution.
    pub async fn register(&self, min_interval: Duration) -> Result<(), SchedulerError> {
        match self.policy.background_permission() {
            BackgroundPermission::Denied => return Err(SchedulerError::Denied),
            BackgroundPermission::Restricted => {
                tracing::warn!(task = TASK_NAME, "background execution is restricted; wake-ups may be rare");
            }
            BackgroundPermission::Available => {}
        }

        let mut slot = self.task.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let sync = Arc::clone(&self.sync);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(min_interval);
            // The first tick fires immediately; the task only runs after a
            // full interval has elapsed.
            interval.tick().await;
            loop {
                interval.tick().await;
                let outcome = run_pass(sync.as_ref()).await;
                tracing::info!(task = TASK_NAME, ?outcome, "background sync wake-up finished");
            }
        });

        *slot = Some(handle);
        tracing::info!(task = TASK_NAME, interval_secs = min_interval.as_secs(), "background task registered");
        Ok(())
    }

    /// Stop and forget the periodic task
    pub async fn unregister(&self) {
        let mut slot = self.task.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
            tracing::info!(task = TASK_NAME, "background task unregistered");
        }
    }

    /// Whether the periodic task is currently registered
    pub async fn is_registered(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Current host permission for background execution
    pub fn status(&self) -> BackgroundPermission {
        self.policy.background_permission()
    }

    /// Run one background pass now, returning the host result code.
    ///
    /// Exposed so host task callbacks can invoke the body directly.
    pub async fn run_once(&self) -> TaskOutcome {
        run_pass(self.sync.as_ref()).await
    }
}

async fn run_pass(sync: &dyn SyncHandle) -> TaskOutcome {
    match sync.sync_all().await {
        Ok(report) if report.succeeded > 0 => TaskOutcome::NewData,
        Ok(_) => TaskOutcome::NoData,
        Err(SyncError::AlreadyRunning) => TaskOutcome::NoData,
        Err(e) => {
            tracing::warn!(error = %e, "background sync pass failed");
            TaskOutcome::Failed
        }
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.task.try_lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}
