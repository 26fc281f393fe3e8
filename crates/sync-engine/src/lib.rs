//! Sync engine for the FieldLink field client
//!
//! Drives reconciliation of the durable mutation queue against the remote
//! service. Three independent triggers can invoke a drain pass: an explicit
//! call, a connectivity recovery observed by the reachability monitor, and
//! an OS-governed periodic wake-up from the background scheduler. The
//! processor serializes them so only one drain runs at a time.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod processor;
pub mod reachability;
pub mod scheduler;

pub use processor::{SyncError, SyncEvent, SyncHandle, SyncProcessor, SyncReport, SyncStatus};
pub use reachability::ReachabilityMonitor;
pub use scheduler::{
    AlwaysAvailable, BackgroundPermission, BackgroundScheduler, HostPolicy, SchedulerError,
    TaskOutcome,
};
