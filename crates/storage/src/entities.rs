//! Entity cache
//!
//! Local mirrors of remote domain records. Each kind gets its own table with
//! a few indexed columns for filtering and ordering, plus the verbatim JSON
//! payload. The indexed columns are extracted from the payload at save time
//! and are never a second source of truth: queries hand back the payload
//! exactly as it was stored.

use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool, Transaction};

use crate::database::{Result, SqliteDatabase, StorageError};
use crate::now_millis;

/// The domain entity kinds mirrored by the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A driver's work shift
    Shift,
    /// A single trip within a shift
    Trip,
    /// A passenger on a trip's manifest
    ManifestEntry,
    /// An issue reported from the field
    IssueReport,
    /// An append-only trip log entry
    TripLogEntry,
}

/// Per-kind table layout: which payload fields are indexed, and how query
/// results are ordered.
struct KindSchema {
    table: &'static str,
    indexed: &'static [&'static str],
    order_by: &'static str,
}

impl EntityKind {
    fn schema(self) -> &'static KindSchema {
        match self {
            EntityKind::Shift => &KindSchema {
                table: "shifts",
                indexed: &["driver_id", "status", "departs_at"],
                order_by: "departs_at",
            },
            EntityKind::Trip => &KindSchema {
                table: "trips",
                indexed: &["shift_id", "status", "departs_at"],
                order_by: "departs_at",
            },
            EntityKind::ManifestEntry => &KindSchema {
                table: "manifest_entries",
                indexed: &["trip_id", "status", "passenger_name"],
                order_by: "passenger_name",
            },
            EntityKind::IssueReport => &KindSchema {
                table: "issue_reports",
                indexed: &["trip_id", "status"],
                order_by: "created_at",
            },
            EntityKind::TripLogEntry => &KindSchema {
                table: "trip_logs",
                indexed: &["trip_id", "logged_at"],
                order_by: "logged_at",
            },
        }
    }

    /// The SQLite table backing this kind
    pub fn table(self) -> &'static str {
        self.schema().table
    }
}

/// Extract an indexed column value from a payload.
///
/// Strings are stored as-is; other JSON values are stored in their serialized
/// form. Absent fields index as NULL.
fn indexed_value(payload: &Value, column: &str) -> Option<String> {
    payload.get(column).and_then(|v| match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}

fn upsert_sql(schema: &KindSchema) -> String {
    let mut columns = vec!["id"];
    columns.extend_from_slice(schema.indexed);
    columns.extend_from_slice(&["payload", "created_at", "updated_at"]);

    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates: Vec<String> = schema
        .indexed
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    format!(
        "INSERT INTO {table} ({cols}) VALUES ({placeholders})
         ON CONFLICT(id) DO UPDATE SET {updates}, payload = excluded.payload, updated_at = excluded.updated_at",
        table = schema.table,
        cols = columns.join(", "),
        updates = updates.join(", "),
    )
}

/// Upsert a single record inside an existing transaction.
///
/// Shared with the mutation queue so that an entity write and its queued
/// mutation can commit atomically.
pub(crate) async fn upsert_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    kind: EntityKind,
    record: &Value,
) -> Result<()> {
    let schema = kind.schema();
    let id = record
        .get("id")
        .and_then(Value::as_str)
        .ok_or(StorageError::MissingField("id"))?;

    let now = now_millis();
    let sql = upsert_sql(schema);
    let mut query = sqlx::query(&sql).bind(id);
    for column in schema.indexed {
        query = query.bind(indexed_value(record, column));
    }
    query = query.bind(record.to_string()).bind(now).bind(now);

    query.execute(&mut **tx).await?;
    Ok(())
}

/// Query-able cache of remote entities
pub struct EntityStore {
    pool: SqlitePool,
}

impl EntityStore {
    /// Create an entity store over an open database
    pub fn new(db: &SqliteDatabase) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Idempotent upsert by id.
    ///
    /// Replaces the full payload and refreshes the indexed columns. Re-saving
    /// identical data is not an error, so repeated pulls from the remote
    /// service are safe.
    pub async fn save_entities(&self, kind: EntityKind, records: &[Value]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            upsert_in_tx(&mut tx, kind, record).await?;
        }
        tx.commit().await?;

        tracing::debug!(table = kind.table(), count = records.len(), "saved entities");
        Ok(())
    }

    /// Return entities matching an indexed filter, in the kind's domain order.
    ///
    /// An empty result is an empty Vec, never an error. Filtering on a column
    /// that is not indexed for the kind is rejected with
    /// [`StorageError::InvalidFilter`].
    pub async fn query_entities(
        &self,
        kind: EntityKind,
        filter_column: &str,
        value: &str,
    ) -> Result<Vec<Value>> {
        let schema = kind.schema();
        if !schema.indexed.contains(&filter_column) {
            return Err(StorageError::InvalidFilter {
                table: schema.table,
                column: filter_column.to_string(),
            });
        }

        let sql = format!(
            "SELECT payload FROM {} WHERE {} = ? ORDER BY {}",
            schema.table, filter_column, schema.order_by
        );

        let rows = sqlx::query(&sql).bind(value).fetch_all(&self.pool).await?;
        rows.iter().map(payload_from_row).collect()
    }

    /// Look up a single cached entity by id
    pub async fn get_entity(&self, kind: EntityKind, id: &str) -> Result<Option<Value>> {
        let sql = format!("SELECT payload FROM {} WHERE id = ?", kind.table());

        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(payload_from_row).transpose()
    }

    /// Count cached entities of a kind
    pub async fn count(&self, kind: EntityKind) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }
}

fn payload_from_row(row: &SqliteRow) -> Result<Value> {
    let raw: String = row.get("payload");
    Ok(serde_json::from_str(&raw)?)
}

impl Clone for EntityStore {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::migrations;
    use serde_json::json;

    async fn store() -> EntityStore {
        let db = SqliteDatabase::in_memory().await.unwrap();
        db.migrate(&migrations()).await.unwrap();
        EntityStore::new(&db)
    }

    #[tokio::test]
    async fn test_save_and_query() {
        let store = store().await;

        let trips = vec![
            json!({"id": "T2", "shift_id": "S1", "status": "SCHEDULED", "departs_at": "2024-06-01T10:00:00Z", "origin": "Depot"}),
            json!({"id": "T1", "shift_id": "S1", "status": "SCHEDULED", "departs_at": "2024-06-01T08:00:00Z", "origin": "Depot"}),
            json!({"id": "T3", "shift_id": "S2", "status": "SCHEDULED", "departs_at": "2024-06-01T09:00:00Z"}),
        ];

        store.save_entities(EntityKind::Trip, &trips).await.unwrap();

        let found = store
            .query_entities(EntityKind::Trip, "shift_id", "S1")
            .await
            .unwrap();

        // Ordered by departure time, payload returned verbatim
        assert_eq!(found.len(), 2);
        assert_eq!(found[0]["id"], "T1");
        assert_eq!(found[1]["id"], "T2");
        assert_eq!(found[0]["origin"], "Depot");
    }

    #[tokio::test]
    async fn test_save_idempotent() {
        let store = store().await;

        let shift = json!({"id": "S1", "driver_id": "D1", "status": "ASSIGNED", "departs_at": "2024-06-01"});
        store.save_entities(EntityKind::Shift, &[shift.clone()]).await.unwrap();
        store.save_entities(EntityKind::Shift, &[shift.clone()]).await.unwrap();

        assert_eq!(store.count(EntityKind::Shift).await.unwrap(), 1);
        let cached = store.get_entity(EntityKind::Shift, "S1").await.unwrap().unwrap();
        assert_eq!(cached, shift);
    }

    #[tokio::test]
    async fn test_upsert_replaces_payload() {
        let store = store().await;

        store
            .save_entities(
                EntityKind::Trip,
                &[json!({"id": "T1", "shift_id": "S1", "status": "SCHEDULED"})],
            )
            .await
            .unwrap();
        store
            .save_entities(
                EntityKind::Trip,
                &[json!({"id": "T1", "shift_id": "S1", "status": "DEPARTED", "odometer": 120})],
            )
            .await
            .unwrap();

        let cached = store.get_entity(EntityKind::Trip, "T1").await.unwrap().unwrap();
        assert_eq!(cached["status"], "DEPARTED");
        assert_eq!(cached["odometer"], 120);

        let departed = store
            .query_entities(EntityKind::Trip, "status", "DEPARTED")
            .await
            .unwrap();
        assert_eq!(departed.len(), 1);
    }

    #[tokio::test]
    async fn test_query_empty_result() {
        let store = store().await;

        let found = store
            .query_entities(EntityKind::ManifestEntry, "trip_id", "nope")
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_query_unknown_filter() {
        let store = store().await;

        let result = store
            .query_entities(EntityKind::Shift, "payload", "x")
            .await;
        assert!(matches!(result, Err(StorageError::InvalidFilter { .. })));
    }

    #[tokio::test]
    async fn test_record_missing_id() {
        let store = store().await;

        let result = store
            .save_entities(EntityKind::Shift, &[json!({"driver_id": "D1"})])
            .await;
        assert!(matches!(result, Err(StorageError::MissingField("id"))));
    }
}
