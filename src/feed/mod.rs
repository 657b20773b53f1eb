//! Feed retrieval: HTTP fetching and RSS 2.0 decoding.
//!
//! - [`parser`] - turns an RSS document into [`FetchedItem`]s and parses `pubDate`
//! - [`fetcher`] - time-bounded HTTP GET with a response size limit
//!
//! # Example
//!
//! ```ignore
//! let fetcher = FeedFetcher::new(reqwest::Client::new());
//! let items = fetcher.fetch("https://example.com/rss.xml").await?;
//! ```

mod fetcher;
mod parser;

pub use fetcher::{FeedFetcher, FetchError};
pub use parser::{parse_pub_date, parse_rss, FetchedItem, ParseError};
