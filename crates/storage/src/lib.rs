//! Local store for the FieldLink sync engine
//!
//! This crate provides the durable, offline-first side of the engine: a
//! SQLite-backed cache of remote domain entities and the ordered mutation
//! queue that records every local change until it has been applied remotely.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod entities;
pub mod queue;

pub use database::{DatabaseConfig, MigrationDefinition, SqliteDatabase, StorageError, SynchronousMode};
pub use entities::{EntityKind, EntityStore};
pub use queue::{MutationAction, MutationQueue, QueueItem, RetryPolicy};

use std::time::SystemTime;

/// Milliseconds since the Unix epoch.
///
/// All row timestamps in this crate use this representation.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
