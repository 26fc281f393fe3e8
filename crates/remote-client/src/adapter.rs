//! Remote service boundary
//!
//! The trait the sync processor drains against, plus the transport error
//! taxonomy. Implementations perform exactly one remote call per mutation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::mutation::RemoteMutation;

/// Transport-level errors from the backend collaborator
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request itself failed (DNS, connect, timeout)
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-success status
    #[error("Remote returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body or status text
        message: String,
    },

    /// The response body could not be decoded
    #[error("Malformed response: {0}")]
    Decode(#[source] serde_json::Error),
}

impl TransportError {
    /// Whether a later drain pass may reasonably retry this failure.
    ///
    /// Network failure statuses: 408, 425, 429, 500, 502, 503, 504, 522, 524.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::Request(_) => true,
            TransportError::Status { status, .. } => {
                matches!(*status, 408 | 425 | 429 | 500 | 502 | 503 | 504 | 522 | 524)
            }
            TransportError::Decode(_) => false,
        }
    }
}

/// Result type for remote operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Inclusive date range for shift queries (ISO 8601 dates)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day of the range
    pub from: String,
    /// Last day of the range
    pub to: String,
}

/// The canonical record the backend stored for an applied mutation.
///
/// Used for observability only; the engine never re-caches it
/// authoritatively.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedRecord {
    /// The stored record as returned by the backend
    pub record: Value,
}

/// The backend collaborator boundary.
///
/// Write side: one remote call per mutation. Read side: bulk pulls used to
/// populate the local cache.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Apply a single mutation remotely
    async fn apply(&self, mutation: &RemoteMutation) -> Result<AppliedRecord>;

    /// Fetch a driver's profile record
    async fn fetch_driver_profile(&self, driver_id: &str) -> Result<Value>;

    /// Fetch a driver's shifts, optionally restricted to a date range
    async fn fetch_shifts(&self, driver_id: &str, range: Option<&DateRange>) -> Result<Vec<Value>>;

    /// Fetch the trips of a shift
    async fn fetch_trips(&self, shift_id: &str) -> Result<Vec<Value>>;

    /// Fetch a trip's passenger manifest
    async fn fetch_manifest(&self, trip_id: &str) -> Result<Vec<Value>>;

    /// Upload a photo, returning the URL to embed in an issue report
    async fn upload_photo(&self, bytes: Vec<u8>, content_type: &str) -> Result<String>;
}
