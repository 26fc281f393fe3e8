//! Durable mutation queue
//!
//! Every local change is recorded here at the moment it is made, before any
//! network is involved. Items are immutable except for their sync-status
//! fields, are applied strictly in creation order, and survive process
//! restarts: a crash right after a local mutation must not drop the pending
//! sync.

use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::time::Duration;

use crate::database::{Result, SqliteDatabase, StorageError};
use crate::entities::{self, EntityKind};
use crate::now_millis;

/// What a queued mutation does to its target table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    /// Append a new remote record
    Create,
    /// Modify an existing remote record
    Update,
}

impl MutationAction {
    /// Stable string form used in the queue table
    pub fn as_str(self) -> &'static str {
        match self {
            MutationAction::Create => "create",
            MutationAction::Update => "update",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(MutationAction::Create),
            "update" => Ok(MutationAction::Update),
            other => Err(StorageError::Corrupt(format!(
                "unknown queue action `{other}`"
            ))),
        }
    }
}

/// A single pending (or completed) local mutation
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    /// Locally generated, collision-free id
    pub id: String,
    /// Create or update
    pub action: MutationAction,
    /// Logical entity table this mutation applies to
    pub target_table: String,
    /// The mutation's input data
    pub payload: Value,
    /// Creation time (unix millis); creation order is the only ordering guarantee
    pub created_at: i64,
    /// Monotonic false-to-true
    pub synced: bool,
    /// When the item was applied remotely
    pub synced_at: Option<i64>,
    /// Advisory last-failure message
    pub error: Option<String>,
    /// How many drain passes have failed on this item
    pub attempts: u32,
    /// Earliest time the next drain may retry this item (unix millis)
    pub next_attempt_at: Option<i64>,
    /// Terminal state: retries exhausted, waiting for manual resolution
    pub needs_resolution: bool,
}

/// Bounded-backoff retry policy for failed items.
///
/// Each failure schedules the next attempt at `base_delay * 2^(attempts - 1)`
/// capped at `max_delay`; once `max_attempts` is reached the item is parked
/// in `needs_resolution` instead of retrying forever.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on the backoff delay
    pub max_delay: Duration,
    /// Failures tolerated before the item is parked
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

/// Generate a queue id: creation timestamp plus a random suffix.
fn generate_id() -> String {
    format!("{}-{:08x}", now_millis(), rand::random::<u32>())
}

/// The durable, ordered mutation queue
pub struct MutationQueue {
    pool: SqlitePool,
    policy: RetryPolicy,
}

impl MutationQueue {
    /// Create a queue over an open database with the default retry policy
    pub fn new(db: &SqliteDatabase) -> Self {
        Self {
            pool: db.pool().clone(),
            policy: RetryPolicy::default(),
        }
    }

    /// Override the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Append a new item with `synced = false`; durable before return.
    ///
    /// Returns the generated id.
    pub async fn enqueue(
        &self,
        action: MutationAction,
        target_table: &str,
        payload: &Value,
    ) -> Result<String> {
        let id = generate_id();
        let now = now_millis();

        sqlx::query(
            "INSERT INTO sync_queue (id, action, target_table, payload, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(action.as_str())
        .bind(target_table)
        .bind(payload.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(id = %id, table = target_table, action = action.as_str(), "enqueued mutation");
        Ok(id)
    }

    /// Upsert an entity record and enqueue its mutation in one transaction.
    ///
    /// Closes the gap where a crash between the cache write and the queue
    /// write would leave an entity updated locally with no pending sync:
    /// either both rows commit or neither does.
    pub async fn record(
        &self,
        kind: EntityKind,
        entity: &Value,
        action: MutationAction,
        target_table: &str,
        payload: &Value,
    ) -> Result<String> {
        let id = generate_id();
        let now = now_millis();

        let mut tx = self.pool.begin().await?;

        entities::upsert_in_tx(&mut tx, kind, entity).await?;

        sqlx::query(
            "INSERT INTO sync_queue (id, action, target_table, payload, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(action.as_str())
        .bind(target_table)
        .bind(payload.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(id = %id, table = target_table, "recorded local mutation");
        Ok(id)
    }

    /// All unsynced, non-terminal items in creation order
    pub async fn list_pending(&self) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_queue
             WHERE synced = 0 AND needs_resolution = 0
             ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// Pending items whose backoff window has elapsed as of `now`.
    ///
    /// This is the snapshot a drain pass works from.
    pub async fn list_due(&self, now: i64) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_queue
             WHERE synced = 0 AND needs_resolution = 0
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
             ORDER BY rowid",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// Number of unsynced, non-terminal items
    pub async fn pending_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_queue WHERE synced = 0 AND needs_resolution = 0",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    /// Mark an item applied remotely. Idempotent: a second call is a no-op.
    pub async fn mark_synced(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sync_queue SET synced = 1, synced_at = ?, error = NULL
             WHERE id = ? AND synced = 0",
        )
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt: stores the message, bumps the attempt count,
    /// schedules the backed-off retry, and parks the item once the policy's
    /// attempt budget is spent.
    pub async fn mark_error(&self, id: &str, message: &str) -> Result<()> {
        let attempts: Option<i64> =
            sqlx::query_scalar("SELECT attempts FROM sync_queue WHERE id = ? AND synced = 0")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(attempts) = attempts else {
            // Already synced or purged; nothing to record.
            return Ok(());
        };

        let attempts = attempts as u32 + 1;
        let exhausted = attempts >= self.policy.max_attempts;
        let next_attempt_at = now_millis() + self.policy.backoff(attempts).as_millis() as i64;

        sqlx::query(
            "UPDATE sync_queue
             SET error = ?, attempts = ?, next_attempt_at = ?, needs_resolution = ?
             WHERE id = ? AND synced = 0",
        )
        .bind(message)
        .bind(attempts as i64)
        .bind(next_attempt_at)
        .bind(exhausted)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if exhausted {
            tracing::warn!(id = %id, attempts, "mutation parked for manual resolution");
        }
        Ok(())
    }

    /// Delete all synced rows. Called only after a full drain pass, so a
    /// crash mid-drain cannot lose a synced-but-unpurged audit trail.
    pub async fn purge_synced(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE synced = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Items parked after exhausting their retry budget
    pub async fn list_unresolved(&self) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query("SELECT * FROM sync_queue WHERE needs_resolution = 1 ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Re-arm a parked item: clears the error, the attempt count, and the
    /// backoff window so the next drain retries it.
    pub async fn resolve(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sync_queue
             SET needs_resolution = 0, attempts = 0, next_attempt_at = NULL, error = NULL
             WHERE id = ? AND synced = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a single item by id
    pub async fn get(&self, id: &str) -> Result<Option<QueueItem>> {
        let row = sqlx::query("SELECT * FROM sync_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }
}

impl Clone for MutationQueue {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            policy: self.policy.clone(),
        }
    }
}

fn item_from_row(row: &SqliteRow) -> Result<QueueItem> {
    let action: String = row.get("action");
    let payload: String = row.get("payload");
    let attempts: i64 = row.get("attempts");

    Ok(QueueItem {
        id: row.get("id"),
        action: MutationAction::parse(&action)?,
        target_table: row.get("target_table"),
        payload: serde_json::from_str(&payload)?,
        created_at: row.get("created_at"),
        synced: row.get("synced"),
        synced_at: row.get("synced_at"),
        error: row.get("error"),
        attempts: attempts as u32,
        next_attempt_at: row.get("next_attempt_at"),
        needs_resolution: row.get("needs_resolution"),
    })
}
