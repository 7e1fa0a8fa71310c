//! feedrelay: poll RSS/Atom feeds and hand new torrents to Transmission.
//!
//! The binary in `main.rs` wires these modules together; everything here is
//! usable on its own and tested against fakes or wiremock servers.

pub mod config;
pub mod feed;
pub mod http;
pub mod poll;
pub mod resolve;
pub mod storage;
pub mod transmission;
pub mod util;
