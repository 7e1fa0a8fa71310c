//! Feed retrieval and parsing.
//!
//! - [`parser`] - RSS/Atom bytes to [`FeedEntry`] values using `feed-rs`
//! - [`reader`] - HTTP fetching with retry, size limits and per-source user agents
//!
//! A feed that cannot be fetched or parsed yields a [`FeedError`] naming the
//! source; callers report it and move on to the next feed.

mod parser;
mod reader;

pub use parser::{parse_feed, FeedEntry, ResourceRef, TORRENT_MEDIA_TYPE};
pub(crate) use reader::{read_limited_bytes, BodyError};
pub use reader::{FeedError, FeedErrorKind, FeedReader, FeedSource, HttpFeedReader, ResolveMode};
