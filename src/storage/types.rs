use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Feed store errors.
///
/// None of these are fatal to the poller: the scheduler skips the tick and the
/// ingest worker skips the feed or item that hit them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds a lock on the database file
    #[error("Database is locked by another process")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// `mark_fetched` targeted a feed that does not exist
    #[error("Feed {0} not found")]
    FeedNotFound(i64),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Classify a sqlx error, folding SQLite lock conditions into [`StoreError::Locked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::Locked;
        }

        StoreError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered feed source.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub created_at: i64,
    /// Unix seconds of the last successful fetch, `None` until the first one
    pub last_fetched: Option<i64>,
}

/// A stored post.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub description: Option<String>,
    /// `None` when the feed supplied a date that could not be parsed
    pub published_at: Option<i64>,
    pub url: String,
    pub created_at: i64,
}

/// A normalized item ready for `insert_post_if_absent`.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub feed_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<i64>,
    pub url: String,
}

/// Outcome of an idempotent post insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A post with the same (feed, url) pair was already stored
    AlreadyExists,
}
