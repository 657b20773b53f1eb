use super::schema::Database;
use super::types::{Feed, StoreError};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Register a feed, returning its ID.
    ///
    /// Upserts by URL: registering a known URL again renames the feed and
    /// returns the existing ID.
    pub async fn insert_feed(&self, url: &str, name: &str) -> Result<i64, StoreError> {
        let now = chrono::Utc::now().timestamp();
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (name, url, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET name = excluded.name
            RETURNING id
        "#,
        )
        .bind(name)
        .bind(url)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Get all feeds ordered by name
    pub async fn get_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let feeds = sqlx::query_as::<_, Feed>(
            "SELECT id, name, url, created_at, last_fetched FROM feeds ORDER BY name, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, StoreError> {
        let feed = sqlx::query_as::<_, Feed>(
            "SELECT id, name, url, created_at, last_fetched FROM feeds WHERE id = ?",
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Select up to `limit` feeds that are due for a refresh.
    ///
    /// A feed is due when it has never been fetched or its last fetch is at
    /// least the staleness window old. Never-fetched feeds come first, then
    /// oldest fetch first, ties broken by ID.
    pub async fn select_due_feeds(&self, limit: usize) -> Result<Vec<Feed>, StoreError> {
        let cutoff = chrono::Utc::now()
            .timestamp()
            .saturating_sub(self.stale_after_secs);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, name, url, created_at, last_fetched
            FROM feeds
            WHERE last_fetched IS NULL OR last_fetched <= ?
            ORDER BY last_fetched IS NOT NULL, last_fetched ASC, id ASC
            LIMIT ?
        "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(feeds)
    }

    /// Record a successful fetch of `feed_id` at the current time.
    ///
    /// The timestamp never moves backwards, even if the wall clock does.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FeedNotFound`] if no feed has that ID.
    pub async fn mark_fetched(&self, feed_id: i64) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE feeds SET last_fetched = MAX(COALESCE(last_fetched, 0), ?) WHERE id = ?",
        )
        .bind(now)
        .bind(feed_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::FeedNotFound(feed_id));
        }
        Ok(())
    }
}
