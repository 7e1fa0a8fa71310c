//! The poll / dedupe / submit loop.
//!
//! A cycle walks every configured feed in order. Each entry not already in
//! the seen-set is resolved, submitted to Transmission, and recorded. Any
//! per-feed or per-entry failure lands in the [`CycleReport`] and the cycle
//! moves on; a failed entry stays unseen and is retried next cycle. After all
//! feeds, recently added downloads are re-announced once.
//!
//! [`Scheduler`] repeats cycles with a pause from an injectable [`Clock`].

mod clock;
mod cycle;
mod report;
mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cycle::{PollConfig, PollContext, Poller};
pub use report::{CycleReport, PollFailure};
pub use scheduler::Scheduler;
