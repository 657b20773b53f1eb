//! Background RSS poller.
//!
//! A [`scheduler::PollScheduler`] periodically selects the feeds most overdue
//! for a refresh, fetches them concurrently with a [`feed::FeedFetcher`] and
//! stores their items through an [`ingest::IngestWorker`] into the SQLite
//! [`storage::Database`]. Re-fetching a feed never duplicates posts.

pub mod config;
pub mod feed;
pub mod ingest;
pub mod scheduler;
pub mod storage;
pub mod util;
