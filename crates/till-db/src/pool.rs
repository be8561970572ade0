//! # Local Store Handle
//!
//! Connection pool creation and the open-once [`LocalStore`].
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Opening the Local Store                            │
//! │                                                                         │
//! │  enqueue_sale()     sync_now()      search_catalog()                   │
//! │       │                 │                 │                              │
//! │       └────────┬────────┴────────┬────────┘                             │
//! │                ▼                 ▼                                       │
//! │        LocalStore::open() ← concurrent callers await ONE init           │
//! │                │                                                        │
//! │                ▼  (first caller only)                                   │
//! │        Database::new(config) ← pool + pragmas + migrations              │
//! │                │                                                        │
//! │                ▼                                                        │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │  (max_connections)        │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │                           │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │                                                                         │
//! │  Open failure → DbError::StorageUnavailable, cell stays empty so the   │
//! │  next caller retries.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Durability
//! WAL journal with `synchronous = FULL`: once `enqueue` returns, the sale
//! is on disk even if power is cut on the next instruction.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::error::{DbError, DbResult};
use crate::migrations::{self, SchemaVersion};
use crate::repository::product_cache::ProductCacheRepository;
use crate::repository::queue::QueueRepository;
use crate::repository::receipts::SyncReceiptRepository;
use crate::repository::settings::SettingsRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Local store configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/till/till.db")
///     .max_connections(4);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file. Ignored when `in_memory` is set.
    pub database_path: PathBuf,

    /// Use a private in-memory database (tests).
    pub in_memory: bool,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a configuration for a database file, created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            in_memory: false,
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// The database lives exactly as long as its single connection, so the
    /// pool never lets that connection idle out.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            in_memory: true,
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            run_migrations: true,
        }
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        if self.in_memory {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::StorageUnavailable(e.to_string()))?;
            return Ok(options.foreign_keys(true));
        }

        Ok(SqliteConnectOptions::new()
            .filename(&self.database_path)
            .create_if_missing(true)
            // Readers don't block the sync engine's writes and vice versa
            .journal_mode(SqliteJournalMode::Wal)
            // fsync on every commit: enqueue success means on disk
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Open database handle providing repository access.
///
/// Cheap to clone; every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and (by default) runs migrations.
    ///
    /// ## Returns
    /// * `Ok(Database)` - Ready-to-use handle
    /// * `Err(DbError::StorageUnavailable)` - File, pool or schema could not
    ///   be brought up
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            in_memory = config.in_memory,
            "Opening local store"
        );

        let connect_options = config.connect_options()?;

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout);

        pool_options = if config.in_memory {
            pool_options.idle_timeout(None).max_lifetime(None)
        } else {
            pool_options.idle_timeout(Some(config.idle_timeout))
        };

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to open local store");
                DbError::StorageUnavailable(e.to_string())
            })?;

        debug!(max_connections = config.max_connections, "Pool created");

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await.map_err(|e| {
                error!(error = %e, "Schema migration failed");
                DbError::StorageUnavailable(format!("schema migration failed: {e}"))
            })?;
        }

        Ok(db)
    }

    /// Runs database migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Returns the applied/known schema version.
    pub async fn schema_version(&self) -> DbResult<SchemaVersion> {
        migrations::migration_status(&self.pool).await
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the offline sale queue.
    pub fn queue(&self) -> QueueRepository {
        QueueRepository::new(self.pool.clone())
    }

    /// Returns the product cache.
    pub fn products(&self) -> ProductCacheRepository {
        ProductCacheRepository::new(self.pool.clone())
    }

    /// Returns the settings store.
    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }

    /// Returns the sync receipt store.
    pub fn receipts(&self) -> SyncReceiptRepository {
        SyncReceiptRepository::new(self.pool.clone())
    }

    /// Closes the pool. Later operations fail with `StorageUnavailable`.
    pub async fn close(&self) {
        info!("Closing local store");
        self.pool.close().await;
    }

    /// Checks if the database can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// LocalStore
// =============================================================================

/// Process-wide, open-once local store.
///
/// Clone it freely; all clones share one initialization. Concurrent
/// `open()` calls wait for the same attempt instead of each creating the
/// schema. A failed attempt leaves the store unopened, so the next call
/// tries again.
#[derive(Debug, Clone)]
pub struct LocalStore {
    config: DbConfig,
    cell: Arc<OnceCell<Database>>,
}

impl LocalStore {
    /// Creates an unopened store.
    pub fn new(config: DbConfig) -> Self {
        LocalStore {
            config,
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Opens the store, or returns the already open handle.
    pub async fn open(&self) -> DbResult<&Database> {
        self.cell
            .get_or_try_init(|| Database::new(self.config.clone()))
            .await
    }

    /// Returns the handle if `open()` has already succeeded.
    pub fn get(&self) -> Option<&Database> {
        self.cell.get()
    }

    /// Returns true once the store has been opened.
    pub fn is_open(&self) -> bool {
        self.cell.initialized()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);

        let version = db.schema_version().await.unwrap();
        assert_eq!(version.total, 4);
        assert!(version.is_current());
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/till-test.db")
            .max_connections(10)
            .min_connections(2);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(!config.in_memory);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_open_initializes_once() {
        let store = LocalStore::new(DbConfig::in_memory());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let db = store.open().await.unwrap();
                db.settings().set("opened_by", "task").await.unwrap();
                db as *const Database as usize
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        handles.dedup();
        assert_eq!(handles.len(), 1, "every caller must see the same handle");
        assert!(store.is_open());
    }

    #[tokio::test]
    async fn test_unopenable_path_is_storage_unavailable() {
        let store = LocalStore::new(DbConfig::new("/nonexistent-dir/deeper/till.db"));

        let err = store.open().await.unwrap_err();
        assert!(err.is_storage_unavailable());
        assert!(!store.is_open());
    }

    #[tokio::test]
    async fn test_closed_store_reports_unavailable() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.close().await;

        assert!(!db.health_check().await);
        let err = db.queue().count_pending().await.unwrap_err();
        assert!(err.is_storage_unavailable());
    }
}
