//! Database abstraction layer
//!
//! This module provides the SQLite connection layer for the local store, with
//! connection pooling, WAL journaling, and versioned schema migrations.

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Error as SqlxError, SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Storage error types
///
/// Any failure of the durable store is fatal to the calling operation and
/// must be propagated, never swallowed: the sync processor relies on this to
/// avoid marking an item synced when the underlying status write failed.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLx error
    #[error("Database error: {0}")]
    Sqlx(#[from] SqlxError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A query used a column that is not indexed for the entity kind
    #[error("Column `{column}` is not an indexed filter for {table}")]
    InvalidFilter {
        /// Entity table the query targeted
        table: &'static str,
        /// The rejected column name
        column: String,
    },

    /// A record payload is missing a field the store requires
    #[error("Record is missing required field `{0}`")]
    MissingField(&'static str),

    /// A queue row holds a value the store cannot interpret
    #[error("Corrupt queue row: {0}")]
    Corrupt(String),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file path
    pub path: String,
    /// Maximum number of connections in pool
    pub max_connections: u32,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Enable WAL mode
    pub wal_mode: bool,
    /// Synchronous mode
    pub synchronous: SynchronousMode,
}

/// SQLite synchronous mode
#[derive(Debug, Clone, Copy)]
pub enum SynchronousMode {
    /// Off - no synchronization
    Off,
    /// Normal - synchronize at critical moments
    Normal,
    /// Full - synchronize after each write
    Full,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "fieldlink.db".to_string(),
            max_connections: 10,
            connect_timeout: Duration::from_secs(30),
            wal_mode: true,
            // Queue writes must survive a crash immediately after enqueue.
            synchronous: SynchronousMode::Full,
        }
    }
}

impl DatabaseConfig {
    /// Create a new database configuration
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable WAL mode
    pub fn wal_mode(mut self, enabled: bool) -> Self {
        self.wal_mode = enabled;
        self
    }

    /// Set synchronous mode
    pub fn synchronous(mut self, mode: SynchronousMode) -> Self {
        self.synchronous = mode;
        self
    }
}

/// SQLite database handle shared by the entity cache and the mutation queue
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Create a new SQLite database with configuration
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let mut options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.path))
            .map_err(|e| StorageError::Config(e.to_string()))?
            .create_if_missing(true);

        if config.wal_mode {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        options = match config.synchronous {
            SynchronousMode::Off => options.synchronous(SqliteSynchronous::Off),
            SynchronousMode::Normal => options.synchronous(SqliteSynchronous::Normal),
            SynchronousMode::Full => options.synchronous(SqliteSynchronous::Full),
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self { pool })
    }

    /// Open a database and bring its schema up to date
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        let db = Self::new(config).await?;
        db.migrate(&migrations()).await?;
        Ok(db)
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run migrations
    pub async fn migrate(&self, migrations: &[MigrationDefinition]) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                checksum TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let current_version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM _migrations")
            .fetch_optional(&self.pool)
            .await?
            .flatten();

        let current_version = current_version.unwrap_or(0);

        for migration in migrations {
            if migration.version > current_version {
                tracing::info!(
                    "Applying migration {} - {}",
                    migration.version,
                    migration.description
                );

                let mut tx = self.pool.begin().await?;

                sqlx::query(&migration.sql).execute(&mut *tx).await?;

                sqlx::query(
                    "INSERT INTO _migrations (version, description, checksum) VALUES (?, ?, ?)",
                )
                .bind(migration.version)
                .bind(&migration.description)
                .bind(&migration.checksum)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                tracing::info!("Migration {} applied successfully", migration.version);
            }
        }

        Ok(())
    }

    /// Get current migration version
    pub async fn current_version(&self) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM _migrations")
            .fetch_optional(&self.pool)
            .await?
            .flatten();

        Ok(version.unwrap_or(0))
    }

    /// Check if the database is healthy
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Migration definition
#[derive(Debug, Clone)]
pub struct MigrationDefinition {
    /// Migration version number
    pub version: i64,
    /// Migration description
    pub description: String,
    /// SQL to execute
    pub sql: String,
    /// Checksum for verification
    pub checksum: String,
}

impl MigrationDefinition {
    /// Create a new migration definition
    pub fn new(version: i64, description: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let checksum = format!("{:x}", md5::compute(&sql));

        Self {
            version,
            description: description.into(),
            sql,
            checksum,
        }
    }
}

/// The full FieldLink local-store schema, one statement per migration.
///
/// Entity tables share a common shape: a remote-assigned `id`, a handful of
/// indexed columns extracted from the payload for local filtering, and the
/// verbatim serialized payload. The indexed columns are never authoritative;
/// the payload is.
pub fn migrations() -> Vec<MigrationDefinition> {
    vec![
        MigrationDefinition::new(
            1,
            "Shift cache",
            "CREATE TABLE shifts (
                id TEXT PRIMARY KEY,
                driver_id TEXT,
                status TEXT,
                departs_at TEXT,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        ),
        MigrationDefinition::new(
            2,
            "Shift driver index",
            "CREATE INDEX idx_shifts_driver ON shifts (driver_id)",
        ),
        MigrationDefinition::new(
            3,
            "Trip cache",
            "CREATE TABLE trips (
                id TEXT PRIMARY KEY,
                shift_id TEXT,
                status TEXT,
                departs_at TEXT,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        ),
        MigrationDefinition::new(
            4,
            "Trip shift index",
            "CREATE INDEX idx_trips_shift ON trips (shift_id)",
        ),
        MigrationDefinition::new(
            5,
            "Manifest entry cache",
            "CREATE TABLE manifest_entries (
                id TEXT PRIMARY KEY,
                trip_id TEXT,
                status TEXT,
                passenger_name TEXT,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        ),
        MigrationDefinition::new(
            6,
            "Manifest trip index",
            "CREATE INDEX idx_manifest_trip ON manifest_entries (trip_id)",
        ),
        MigrationDefinition::new(
            7,
            "Issue report cache",
            "CREATE TABLE issue_reports (
                id TEXT PRIMARY KEY,
                trip_id TEXT,
                status TEXT,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        ),
        MigrationDefinition::new(
            8,
            "Issue trip index",
            "CREATE INDEX idx_issues_trip ON issue_reports (trip_id)",
        ),
        MigrationDefinition::new(
            9,
            "Trip log cache",
            "CREATE TABLE trip_logs (
                id TEXT PRIMARY KEY,
                trip_id TEXT,
                logged_at TEXT,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        ),
        MigrationDefinition::new(
            10,
            "Trip log trip index",
            "CREATE INDEX idx_trip_logs_trip ON trip_logs (trip_id)",
        ),
        MigrationDefinition::new(
            11,
            "Mutation queue",
            "CREATE TABLE sync_queue (
                id TEXT PRIMARY KEY,
                action TEXT NOT NULL,
                target_table TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                synced_at INTEGER,
                error TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at INTEGER,
                needs_resolution INTEGER NOT NULL DEFAULT 0
            )",
        ),
        MigrationDefinition::new(
            12,
            "Queue pending index",
            "CREATE INDEX idx_queue_pending ON sync_queue (synced, needs_resolution)",
        ),
    ]
}
