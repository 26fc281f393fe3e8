//! Typed remote mutations
//!
//! A closed enum with one variant per supported `(target_table, action)`
//! pair replaces string-keyed dispatch: code constructing a mutation cannot
//! name an unsupported target. Decoding a persisted queue row can still fail
//! (legacy or corrupt rows), which surfaces as [`MutationError::Unsupported`]
//! and is recorded on the item rather than silently dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors translating between queue rows and typed mutations
#[derive(Debug, Error)]
pub enum MutationError {
    /// The `(target_table, action)` pair is not one the adapter supports
    #[error("Unsupported mutation target: {table}/{action}")]
    Unsupported {
        /// Target table from the queue row
        table: String,
        /// Action from the queue row
        action: String,
    },

    /// The payload did not match the variant's shape
    #[error("Malformed mutation payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Set a shift's status (`shifts` / update)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftStatusChange {
    /// Remote shift id
    pub shift_id: String,
    /// New status value
    pub status: String,
}

/// Update a trip's status and assorted fields (`trips` / update)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripUpdate {
    /// Remote trip id
    pub trip_id: String,
    /// New status value
    pub status: String,
    /// Additional fields to write alongside the status
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, Value>,
}

/// Mark a passenger checked in (`manifest` / update)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassengerCheckIn {
    /// Trip whose manifest is being updated
    pub trip_id: String,
    /// Manifest entry being checked in
    pub manifest_entry_id: String,
    /// Check-in flag; replays of the same value are harmless
    pub checked_in: bool,
}

/// Append a trip log entry (`trip_logs` / create)
///
/// Append-only, so not naturally idempotent: the idempotency key lets the
/// backend deduplicate a replay after an unacknowledged success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripLogDraft {
    /// Trip the entry belongs to
    pub trip_id: String,
    /// Log message
    pub message: String,
    /// When the entry was recorded on the device (unix millis)
    pub logged_at: i64,
    /// Client-generated deduplication key
    pub idempotency_key: String,
}

/// File an issue report (`issues` / create)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueReportDraft {
    /// Trip the issue occurred on, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<String>,
    /// Issue category
    pub category: String,
    /// Free-text description
    pub description: String,
    /// URL of an uploaded photo, if one was attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Client-generated deduplication key
    pub idempotency_key: String,
}

/// One remote operation per variant
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteMutation {
    /// `shifts` / update
    SetShiftStatus(ShiftStatusChange),
    /// `trips` / update
    UpdateTrip(TripUpdate),
    /// `manifest` / update
    CheckInPassenger(PassengerCheckIn),
    /// `trip_logs` / create
    AppendTripLog(TripLogDraft),
    /// `issues` / create
    CreateIssueReport(IssueReportDraft),
}

impl RemoteMutation {
    /// The logical table this mutation targets in the durable queue
    pub fn target_table(&self) -> &'static str {
        match self {
            RemoteMutation::SetShiftStatus(_) => "shifts",
            RemoteMutation::UpdateTrip(_) => "trips",
            RemoteMutation::CheckInPassenger(_) => "manifest",
            RemoteMutation::AppendTripLog(_) => "trip_logs",
            RemoteMutation::CreateIssueReport(_) => "issues",
        }
    }

    /// The queue action string for this mutation
    pub fn action(&self) -> &'static str {
        match self {
            RemoteMutation::SetShiftStatus(_)
            | RemoteMutation::UpdateTrip(_)
            | RemoteMutation::CheckInPassenger(_) => "update",
            RemoteMutation::AppendTripLog(_) | RemoteMutation::CreateIssueReport(_) => "create",
        }
    }

    /// Whether replaying this mutation can duplicate remote state without
    /// backend-side deduplication
    pub fn is_append_only(&self) -> bool {
        matches!(
            self,
            RemoteMutation::AppendTripLog(_) | RemoteMutation::CreateIssueReport(_)
        )
    }

    /// Durable representation for the mutation queue:
    /// `(action, target_table, payload)`
    pub fn to_queue_row(&self) -> (&'static str, &'static str, Value) {
        let payload = match self {
            RemoteMutation::SetShiftStatus(p) => serde_json::to_value(p),
            RemoteMutation::UpdateTrip(p) => serde_json::to_value(p),
            RemoteMutation::CheckInPassenger(p) => serde_json::to_value(p),
            RemoteMutation::AppendTripLog(p) => serde_json::to_value(p),
            RemoteMutation::CreateIssueReport(p) => serde_json::to_value(p),
        };
        // Serializing these structs cannot fail; they contain no non-string keys.
        (self.action(), self.target_table(), payload.unwrap_or(Value::Null))
    }

    /// Decode a persisted queue row back into a typed mutation
    pub fn from_queue_row(
        table: &str,
        action: &str,
        payload: &Value,
    ) -> Result<Self, MutationError> {
        match (table, action) {
            ("shifts", "update") => Ok(RemoteMutation::SetShiftStatus(serde_json::from_value(
                payload.clone(),
            )?)),
            ("trips", "update") => Ok(RemoteMutation::UpdateTrip(serde_json::from_value(
                payload.clone(),
            )?)),
            ("manifest", "update") => Ok(RemoteMutation::CheckInPassenger(
                serde_json::from_value(payload.clone())?,
            )),
            ("trip_logs", "create") => Ok(RemoteMutation::AppendTripLog(serde_json::from_value(
                payload.clone(),
            )?)),
            ("issues", "create") => Ok(RemoteMutation::CreateIssueReport(
                serde_json::from_value(payload.clone())?,
            )),
            _ => Err(MutationError::Unsupported {
                table: table.to_string(),
                action: action.to_string(),
            }),
        }
    }
}

/// Generate a client-side idempotency key for append-only mutations
pub fn idempotency_key() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{:x}-{:08x}", millis, rand::random::<u32>())
}
