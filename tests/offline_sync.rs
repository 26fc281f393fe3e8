//! Offline Sync Integration Tests
//!
//! End-to-end tests for the offline-first engine: capture mutations while
//! disconnected, reconcile on reconnect, and survive a process restart with
//! the queue intact.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use remote_client::{AppliedRecord, DateRange, RemoteMutation, RemoteService, TransportError};
use storage::{DatabaseConfig, EntityKind, EntityStore, MutationAction, MutationQueue, SqliteDatabase};
use sync_engine::{ReachabilityMonitor, SyncHandle, SyncProcessor};

/// Recording fake backend: accepts every mutation and remembers it.
#[derive(Default)]
struct RecordingBackend {
    applied: std::sync::Mutex<Vec<RemoteMutation>>,
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteService for RecordingBackend {
    async fn apply(&self, mutation: &RemoteMutation) -> Result<AppliedRecord, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.applied.lock().unwrap().push(mutation.clone());
        Ok(AppliedRecord {
            record: json!({"applied": true}),
        })
    }

    async fn fetch_driver_profile(&self, driver_id: &str) -> Result<Value, TransportError> {
        Ok(json!({"id": driver_id, "name": "Alex"}))
    }

    async fn fetch_shifts(
        &self,
        driver_id: &str,
        _range: Option<&DateRange>,
    ) -> Result<Vec<Value>, TransportError> {
        Ok(vec![
            json!({"id": "S1", "driver_id": driver_id, "status": "ASSIGNED", "departs_at": "2024-06-01T06:00:00Z"}),
        ])
    }

    async fn fetch_trips(&self, shift_id: &str) -> Result<Vec<Value>, TransportError> {
        Ok(vec![
            json!({"id": "T2", "shift_id": shift_id, "status": "SCHEDULED", "departs_at": "2024-06-01T10:00:00Z"}),
            json!({"id": "T1", "shift_id": shift_id, "status": "SCHEDULED", "departs_at": "2024-06-01T08:00:00Z"}),
        ])
    }

    async fn fetch_manifest(&self, trip_id: &str) -> Result<Vec<Value>, TransportError> {
        Ok(vec![
            json!({"id": "M1", "trip_id": trip_id, "status": "BOOKED", "passenger_name": "Riley"}),
        ])
    }

    async fn upload_photo(&self, _bytes: Vec<u8>, _ct: &str) -> Result<String, TransportError> {
        Ok("https://cdn.example.com/photo.jpg".to_string())
    }
}

async fn open_db(path: &std::path::Path) -> SqliteDatabase {
    SqliteDatabase::open(DatabaseConfig::new(path.to_string_lossy()))
        .await
        .unwrap()
}

/// The canonical scenario: one queued trip update, one drain, a clean queue.
#[tokio::test]
async fn test_end_to_end_trip_update() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir.path().join("fieldlink.db")).await;

    let queue = MutationQueue::new(&db);
    let backend = Arc::new(RecordingBackend::default());
    let processor = SyncProcessor::new(queue.clone(), backend.clone());

    queue
        .record(
            EntityKind::Trip,
            &json!({"id": "T1", "shift_id": "S1", "status": "DEPARTED"}),
            MutationAction::Update,
            "trips",
            &json!({"trip_id": "T1", "status": "DEPARTED"}),
        )
        .await
        .unwrap();

    let report = processor.sync_all().await.unwrap();
    assert_eq!(report.succeeded, 1);

    // Queue drained, status observable, exactly one remote update for T1
    assert_eq!(processor.pending_count().await.unwrap(), 0);
    let status = processor.status().await;
    assert!(status.last_sync_time.is_some());
    assert_eq!(status.pending_count, 0);

    let applied = backend.applied.lock().unwrap();
    assert_eq!(applied.len(), 1);
    match &applied[0] {
        RemoteMutation::UpdateTrip(update) => {
            assert_eq!(update.trip_id, "T1");
            assert_eq!(update.status, "DEPARTED");
        }
        other => panic!("unexpected mutation: {other:?}"),
    }
}

/// A day in the field: pull data while online, capture mutations offline,
/// reconcile automatically on reconnect.
#[tokio::test]
async fn test_offline_capture_then_reconnect() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir.path().join("fieldlink.db")).await;

    let store = EntityStore::new(&db);
    let queue = MutationQueue::new(&db);
    let backend = Arc::new(RecordingBackend::default());
    let processor = Arc::new(SyncProcessor::new(queue.clone(), backend.clone()));
    let monitor = ReachabilityMonitor::new(processor.clone());

    // Phase 1: online, populate the cache from the backend
    monitor.report(true).await;
    let shifts = backend.fetch_shifts("D1", None).await.unwrap();
    store.save_entities(EntityKind::Shift, &shifts).await.unwrap();
    let trips = backend.fetch_trips("S1").await.unwrap();
    store.save_entities(EntityKind::Trip, &trips).await.unwrap();

    let cached = store
        .query_entities(EntityKind::Trip, "shift_id", "S1")
        .await
        .unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0]["id"], "T1"); // ordered by departure time

    // Phase 2: offline, record local changes
    monitor.report(false).await;
    queue
        .record(
            EntityKind::Trip,
            &json!({"id": "T1", "shift_id": "S1", "status": "DEPARTED"}),
            MutationAction::Update,
            "trips",
            &json!({"trip_id": "T1", "status": "DEPARTED"}),
        )
        .await
        .unwrap();
    queue
        .record(
            EntityKind::ManifestEntry,
            &json!({"id": "M1", "trip_id": "T1", "status": "CHECKED_IN", "passenger_name": "Riley"}),
            MutationAction::Update,
            "manifest",
            &json!({"trip_id": "T1", "manifest_entry_id": "M1", "checked_in": true}),
        )
        .await
        .unwrap();

    assert_eq!(queue.pending_count().await.unwrap(), 2);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

    // Phase 3: reconnect triggers the drain
    monitor.report(true).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(queue.pending_count().await.unwrap(), 0);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

    // Local cache reflects the offline edits
    let trip = store.get_entity(EntityKind::Trip, "T1").await.unwrap().unwrap();
    assert_eq!(trip["status"], "DEPARTED");
}

/// A process restart resumes with whatever remained unsynced.
#[tokio::test]
async fn test_restart_resumes_pending_queue() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("fieldlink.db");

    // Phase 1: capture a mutation, then "crash" before syncing
    {
        let db = open_db(&db_path).await;
        let queue = MutationQueue::new(&db);
        queue
            .enqueue(
                MutationAction::Create,
                "trip_logs",
                &json!({"trip_id": "T1", "message": "road closure at exit 12", "logged_at": 1717230000000i64, "idempotency_key": "restart-key-1"}),
            )
            .await
            .unwrap();
        db.close().await;
    }

    // Phase 2: restart, the item is still pending and drains cleanly
    {
        let db = open_db(&db_path).await;
        let queue = MutationQueue::new(&db);
        let backend = Arc::new(RecordingBackend::default());
        let processor = SyncProcessor::new(queue.clone(), backend.clone());

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target_table, "trip_logs");

        let report = processor.sync_all().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(queue.pending_count().await.unwrap(), 0);

        let applied = backend.applied.lock().unwrap();
        match &applied[0] {
            RemoteMutation::AppendTripLog(log) => {
                assert_eq!(log.trip_id, "T1");
                assert_eq!(log.idempotency_key, "restart-key-1");
            }
            other => panic!("unexpected mutation: {other:?}"),
        }
    }
}
