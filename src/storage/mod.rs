//! Durable record of feed entries that have already been submitted.
//!
//! The seen-set lives in a plain text file with one identifier per line.
//! It is loaded once at startup and only ever appended to afterwards, so a
//! crash can lose at most the record currently being written.

mod seen;

pub use seen::{SeenSet, SeenStore, StoreError};
