use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StoreError;

// ============================================================================
// Database
// ============================================================================

/// SQLite-backed feed store.
///
/// Cheap to clone: every clone shares the same connection pool, so one handle
/// is created at startup and handed to the scheduler and each ingest task.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    /// Feeds fetched more recently than this many seconds ago are not due
    pub(crate) stale_after_secs: i64,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database on a single pinned
    /// connection, which is what the tests use.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another process has the database
    /// locked, `StoreError::Migration` if the schema could not be created, and
    /// `StoreError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);
        let in_memory = path == ":memory:";

        // busy_timeout=5000: concurrent ingest tasks wait for the writer lock
        // instead of failing with SQLITE_BUSY.
        let mut options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives only as long as its connection
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let db = Self {
            pool,
            stale_after_secs: 0,
        };
        db.migrate().await.map_err(|e| match StoreError::from_sqlx(e) {
            StoreError::Other(e) => StoreError::Migration(e.to_string()),
            locked => locked,
        })?;
        Ok(db)
    }

    /// Set the staleness window used by `select_due_feeds`.
    ///
    /// A zero window makes every feed due on every tick; the oldest-first
    /// ordering still rotates through them when there are more feeds than
    /// the batch size.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after_secs = i64::try_from(stale_after.as_secs()).unwrap_or(i64::MAX);
        self
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        // Per-connection setting, must be outside the transaction
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL,
                last_fetched INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT,
                published_at INTEGER,
                url TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(feed_id, url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // select_due_feeds orders by last_fetched
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_last_fetched ON feeds(last_fetched)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_feed_published ON posts(feed_id, published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
