//! Per-feed ingestion: fetch, mark fetched, normalize and store each item.
//!
//! Failures are contained at the smallest unit that can be skipped: a failed
//! fetch skips the feed for this tick, a failed insert skips one item.

use crate::feed::{parse_pub_date, FeedFetcher, FetchError, FetchedItem};
use crate::storage::{Database, Feed, InsertOutcome, NewPost, StoreError};
use thiserror::Error;

/// Why a whole feed was abandoned for this tick.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The feed was not marked fetched and stays due for the next tick
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Failed to mark feed fetched: {0}")]
    Store(#[from] StoreError),
}

/// Item counts for one ingest pass over one feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Items present in the fetched document
    pub found: usize,
    pub inserted: usize,
    /// Items whose (feed, link) pair was already stored
    pub duplicates: usize,
    /// Items skipped because the store rejected them
    pub failed: usize,
    /// Stored items whose `pubDate` could not be parsed
    pub undated: usize,
}

/// Turns one feed's document into stored posts.
///
/// Cloning shares the store pool and the HTTP client, so the scheduler hands
/// each spawned task its own clone.
#[derive(Clone)]
pub struct IngestWorker {
    db: Database,
    fetcher: FeedFetcher,
    #[cfg(test)]
    panic_on_feed: Option<i64>,
}

impl IngestWorker {
    pub fn new(db: Database, fetcher: FeedFetcher) -> Self {
        Self {
            db,
            fetcher,
            #[cfg(test)]
            panic_on_feed: None,
        }
    }

    /// Make [`IngestWorker::ingest`] panic for `feed_id`.
    #[cfg(test)]
    pub(crate) fn panic_on_feed(mut self, feed_id: i64) -> Self {
        self.panic_on_feed = Some(feed_id);
        self
    }

    /// Fetch `feed` and store its items.
    ///
    /// The feed is marked fetched only after a successful fetch and before any
    /// item is stored, so item failures do not keep it due forever while a
    /// fetch failure leaves it eligible for the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Fetch`] if the document could not be retrieved
    /// or decoded, and [`IngestError::Store`] if the feed could not be marked
    /// fetched. Per-item store errors are logged and counted, not returned.
    pub async fn ingest(&self, feed: &Feed) -> Result<IngestSummary, IngestError> {
        #[cfg(test)]
        if self.panic_on_feed == Some(feed.id) {
            panic!("ingest panicked for feed {}", feed.id);
        }

        let items = match self.fetcher.fetch(&feed.url).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(
                    feed_id = feed.id,
                    url = %feed.url,
                    transient = e.is_transient(),
                    error = %e,
                    "Failed to fetch feed"
                );
                return Err(e.into());
            }
        };

        if let Err(e) = self.db.mark_fetched(feed.id).await {
            tracing::warn!(feed_id = feed.id, error = %e, "Failed to mark feed fetched");
            return Err(e.into());
        }

        let summary = self.store_items(feed.id, &items).await;

        tracing::info!(
            feed_id = feed.id,
            name = %feed.name,
            found = summary.found,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            failed = summary.failed,
            undated = summary.undated,
            "Feed collected"
        );

        Ok(summary)
    }

    /// Store already-fetched items for `feed_id`, in order.
    pub async fn store_items(&self, feed_id: i64, items: &[FetchedItem]) -> IngestSummary {
        let mut summary = IngestSummary {
            found: items.len(),
            ..IngestSummary::default()
        };

        for item in items {
            let post = to_new_post(feed_id, item);
            let undated = post.published_at.is_none();

            match self.db.insert_post_if_absent(&post).await {
                Ok(InsertOutcome::Inserted) => {
                    summary.inserted += 1;
                    if undated {
                        summary.undated += 1;
                    }
                }
                Ok(InsertOutcome::AlreadyExists) => summary.duplicates += 1,
                Err(e) => {
                    tracing::warn!(
                        feed_id = feed_id,
                        url = %item.link,
                        error = %e,
                        "Could not store post, skipping"
                    );
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

/// Normalize a fetched item into an insertable post.
///
/// An empty description becomes `None`. An unparseable `pubDate` is logged and
/// leaves `published_at` as `None`; the item is still stored.
pub fn to_new_post(feed_id: i64, item: &FetchedItem) -> NewPost {
    let description = item.description.clone().filter(|d| !d.is_empty());

    let published_at = match parse_pub_date(&item.pub_date) {
        Ok(date) => Some(date.timestamp()),
        Err(e) => {
            tracing::warn!(
                feed_id = feed_id,
                url = %item.link,
                error = %e,
                "Could not parse publish date, storing post without it"
            );
            None
        }
    };

    NewPost {
        feed_id,
        title: item.title.clone(),
        description,
        published_at,
        url: item.link.clone(),
    }
}
