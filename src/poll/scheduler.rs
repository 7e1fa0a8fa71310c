use super::clock::Clock;
use super::cycle::Poller;
use super::report::CycleReport;

/// Runs cycles back to back with a fixed pause between them.
///
/// Cycles never overlap: the pause only starts once a cycle has returned.
pub struct Scheduler<C: Clock> {
    poller: Poller,
    clock: C,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(poller: Poller, clock: C) -> Self {
        Self { poller, clock }
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Run `max_cycles` cycles, or forever when `None`.
    ///
    /// There is no pause after the final cycle of a bounded run.
    pub async fn run(&mut self, max_cycles: Option<u64>) -> u64 {
        let interval = self.poller.config().interval;
        let mut completed = 0u64;

        loop {
            let report = self.poller.run_cycle(&self.clock).await;
            completed += 1;
            log_summary(completed, &report);

            if max_cycles.is_some_and(|max| completed >= max) {
                return completed;
            }

            tracing::debug!(secs = interval.as_secs(), "Sleeping until next cycle");
            self.clock.sleep(interval).await;
        }
    }
}

fn log_summary(cycle: u64, report: &CycleReport) {
    let (reannounced, reannounce_failed) = report
        .reannounce
        .as_ref()
        .map(|r| (r.reannounced.len(), r.failures.len()))
        .unwrap_or((0, 0));

    tracing::info!(
        cycle = cycle,
        feeds_read = report.feeds_read,
        feeds_failed = report.feeds_failed,
        submitted = report.submitted.len(),
        already_seen = report.already_seen,
        failures = report.failures.len(),
        reannounced = reannounced,
        reannounce_failed = reannounce_failed,
        "Cycle complete"
    );
}
