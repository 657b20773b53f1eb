//! SQLite feed store.
//!
//! [`Database`] is the only shared resource of the poller. Every operation is
//! a single statement, so a failure never spans more than one feed or post.

mod feeds;
mod posts;
mod schema;
mod types;

pub use schema::Database;
pub use types::{Feed, InsertOutcome, NewPost, Post, StoreError};
