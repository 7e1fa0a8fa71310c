use crate::feed::FeedError;
use crate::resolve::ResolutionError;
use crate::storage::StoreError;
use crate::transmission::{ReannounceReport, SubmissionError};
use thiserror::Error;

/// A per-feed or per-entry failure inside one cycle.
///
/// None of these stop the cycle. Entry failures leave the entry unseen so it
/// is retried on a later cycle.
#[derive(Debug, Error)]
pub enum PollFailure {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("Error resolving entry '{entry}' from '{feed}': {source}")]
    Resolution {
        feed: String,
        entry: String,
        #[source]
        source: ResolutionError,
    },

    #[error("Error adding entry '{entry}' from '{feed}': {source}")]
    Submission {
        feed: String,
        entry: String,
        #[source]
        source: SubmissionError,
    },

    /// The download was added but the seen record was not persisted; the
    /// entry will be submitted again next cycle.
    #[error("Entry '{entry}' was added but could not be recorded as seen: {source}")]
    Record {
        entry: String,
        #[source]
        source: StoreError,
    },
}

impl PollFailure {
    /// Entry identifier, for entry-level failures.
    pub fn entry(&self) -> Option<&str> {
        match self {
            PollFailure::Feed(_) => None,
            PollFailure::Resolution { entry, .. }
            | PollFailure::Submission { entry, .. }
            | PollFailure::Record { entry, .. } => Some(entry),
        }
    }
}

/// Everything that happened in one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub feeds_read: usize,
    pub feeds_failed: usize,
    /// Identifiers submitted and recorded this cycle, in submission order.
    pub submitted: Vec<String>,
    /// Entries skipped because they were already seen.
    pub already_seen: usize,
    /// Entries skipped because they hit the attempt limit.
    pub abandoned: usize,
    pub failures: Vec<PollFailure>,
    /// `None` when re-announcing is disabled.
    pub reannounce: Option<ReannounceReport>,
}

impl CycleReport {
    pub fn failed_entries(&self) -> Vec<&str> {
        self.failures.iter().filter_map(PollFailure::entry).collect()
    }
}
