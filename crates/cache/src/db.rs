//! Database connection and pool management.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// Readers run concurrently under WAL; SQLite still serializes the one writer.
const MAX_CONNECTIONS: u32 = 4;

/// Database connection pool for the cache.
///
/// This is the main entry point for interacting with the cache database.
/// It manages the SQLite connection pool and provides access to the
/// [`Repository`](crate::Repository).
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Applies the query-based PRAGMAs to EVERY pooled connection,
            // not only the first one the pool hands out.
            .after_connect(|conn, meta| Box::pin(async move {
                Self::apply_pragmas(conn, meta).await
            }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Open)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Connect to the cache database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let options = Self::base_options().filename(path).create_if_missing(true);
        Self::new(options, None).await
    }

    /// Connect to an in-memory database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the connection closes.
    /// - Do NOT apply `#[cfg(test)]` so that other crates can also use this in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // In-memory databases must be limited to one connection, otherwise
        // parallel connections see different (empty) databases.
        Self::new(options, Some(1)).await
    }

    /// Connect, degrading to `None` with a warning when the cache cannot be
    /// opened. A broken cache file never aborts a run; it just costs the
    /// re-hash.
    pub async fn connect_or_degrade(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        match Self::connect(path).await {
            Ok(db) => Some(db),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e.current_value(),
                    "cache unavailable, continuing without one",
                );
                None
            },
        }
    }

    /// Base connection options shared between file and in-memory databases.
    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // WAL so hash workers can read rows while one writer commits
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            // PRAGMA synchronous = NORMAL: with WAL, a committed transaction
            // is durable before the write call returns
            .synchronous(SqliteSynchronous::Normal)
            // PRAGMA busy_timeout = 1500ms
            // Many hash workers finishing at once can pile onto the single
            // writer; a short timeout absorbs that burst without surfacing
            // SQLITE_BUSY to every caller.
            .busy_timeout(std::time::Duration::from_millis(1500))
            .foreign_keys(true)
    }

    /// Apply additional PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA cache_size = -8192;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Run database migrations.
    ///
    /// This is called automatically by `connect` and `connect_in_memory`,
    /// but can be called manually if needed.
    #[instrument("performing cache migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    ///
    /// Waits for all connections to return to the pool, then closes them.
    /// After calling this, the Database instance should not be used.
    pub async fn close(&self) {
        // Let SQLite update query planner statistics
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}
