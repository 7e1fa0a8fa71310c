use super::clock::Clock;
use super::report::{CycleReport, PollFailure};
use crate::feed::{FeedEntry, FeedReader, FeedSource};
use crate::resolve::{ResolvedResource, Resolver};
use crate::storage::{SeenSet, SeenStore, StoreError};
use crate::transmission::{AddOptions, TorrentClient};
use crate::util::strip_control_chars;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Settings the poll loop runs with. Fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub download_dir: Option<String>,
    pub add_paused: bool,
    /// Zero disables re-announcing.
    pub reannounce_window: Duration,
    pub interval: Duration,
    /// Failures after which an entry is skipped until restart. Zero = never.
    pub max_entry_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            add_paused: false,
            reannounce_window: Duration::from_secs(60 * 60),
            interval: Duration::from_secs(2 * 60),
            max_entry_attempts: 0,
        }
    }
}

/// Collaborators the poll loop drives.
pub struct PollContext {
    pub reader: Arc<dyn FeedReader>,
    pub resolver: Arc<dyn Resolver>,
    pub client: Arc<dyn TorrentClient>,
    pub store: SeenStore,
}

/// Owns the in-memory seen-set and runs one cycle at a time.
pub struct Poller {
    feeds: Vec<FeedSource>,
    ctx: PollContext,
    config: PollConfig,
    seen: SeenSet,
    /// Failed attempts per entry, reset on success.
    attempts: HashMap<String, u32>,
}

impl Poller {
    pub fn new(
        feeds: Vec<FeedSource>,
        ctx: PollContext,
        config: PollConfig,
        seen: SeenSet,
    ) -> Self {
        Self {
            feeds,
            ctx,
            config,
            seen,
            attempts: HashMap::new(),
        }
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Forget every seen entry, on disk and in memory.
    pub fn reset_seen(&mut self) -> Result<(), StoreError> {
        self.ctx.store.reset()?;
        self.seen = SeenSet::new();
        self.attempts.clear();
        Ok(())
    }

    /// One pass over every feed, then one re-announce pass.
    pub async fn run_cycle(&mut self, clock: &dyn Clock) -> CycleReport {
        let mut report = CycleReport::default();
        // Identifiers handed to the resolver this cycle, so a feed listing the
        // same entry twice is only attempted once
        let mut attempted: HashSet<String> = HashSet::new();

        let feeds = self.feeds.clone();
        for source in &feeds {
            let entries = match self.ctx.reader.fetch(source).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!(feed = %e.url, error = %e.kind, "Error reading feed");
                    report.feeds_failed += 1;
                    report.failures.push(PollFailure::Feed(e));
                    continue;
                }
            };
            report.feeds_read += 1;

            for entry in entries {
                if self.seen.contains(&entry.identifier) {
                    report.already_seen += 1;
                    continue;
                }
                if !attempted.insert(entry.identifier.clone()) {
                    tracing::debug!(feed = %source.url, entry = %entry.identifier, "Duplicate entry in cycle, skipping");
                    continue;
                }
                if self.exhausted(&entry.identifier) {
                    report.abandoned += 1;
                    continue;
                }

                self.process_entry(source, entry, &mut report).await;
            }
        }

        if !self.config.reannounce_window.is_zero() {
            let reannounce = self
                .ctx
                .client
                .reannounce_within(self.config.reannounce_window, clock.now())
                .await;
            report.reannounce = Some(reannounce);
        }

        report
    }

    async fn process_entry(
        &mut self,
        source: &FeedSource,
        entry: FeedEntry,
        report: &mut CycleReport,
    ) {
        let resolved = match self.ctx.resolver.resolve(source, &entry).await {
            Ok(r) => r,
            Err(e) => {
                let failure = PollFailure::Resolution {
                    feed: source.url.clone(),
                    entry: entry.identifier.clone(),
                    source: e,
                };
                tracing::error!(error = %failure, "Entry failed");
                self.note_failure(&entry.identifier);
                report.failures.push(failure);
                return;
            }
        };

        let options = AddOptions {
            download_dir: self.config.download_dir.clone(),
            paused: self.config.add_paused,
        };
        tracing::info!(
            title = %strip_control_chars(&entry.title),
            resource = %resolved,
            dir = options.download_dir.as_deref().unwrap_or("default directory"),
            "Adding torrent"
        );

        let submitted = match self.ctx.client.add_torrent(&resolved, &options).await {
            Ok(s) => s,
            Err(e) => {
                let failure = PollFailure::Submission {
                    feed: source.url.clone(),
                    entry: entry.identifier.clone(),
                    source: e,
                };
                tracing::error!(error = %failure, "Entry failed");
                self.note_failure(&entry.identifier);
                report.failures.push(failure);
                return;
            }
        };

        if submitted.duplicate {
            tracing::info!(entry = %entry.identifier, id = submitted.id, "Torrent already present in Transmission");
        }

        if let ResolvedResource::FetchedFile(path) = &resolved {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove staged torrent file");
            }
        }

        match self.ctx.store.record(&entry.identifier) {
            Ok(()) => {
                self.attempts.remove(&entry.identifier);
                self.seen.insert(entry.identifier.clone());
                report.submitted.push(entry.identifier);
            }
            Err(e) => {
                let failure = PollFailure::Record {
                    entry: entry.identifier,
                    source: e,
                };
                tracing::error!(
                    error = %failure,
                    "Download added but not recorded; it will be submitted again next cycle"
                );
                report.failures.push(failure);
            }
        }
    }

    fn note_failure(&mut self, identifier: &str) {
        let count = self.attempts.entry(identifier.to_string()).or_insert(0);
        *count += 1;
        let limit = self.config.max_entry_attempts;
        if limit > 0 && *count == limit {
            tracing::warn!(
                entry = %identifier,
                attempts = *count,
                "Entry reached attempt limit; skipping it until restart"
            );
        }
    }

    fn exhausted(&self, identifier: &str) -> bool {
        let limit = self.config.max_entry_attempts;
        limit > 0 && self.attempts.get(identifier).is_some_and(|n| *n >= limit)
    }
}
