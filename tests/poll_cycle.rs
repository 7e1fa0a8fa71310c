//! Poll cycle behaviour against in-memory feeds, resolver and client.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use feedrelay::feed::{
    parse_feed, FeedEntry, FeedError, FeedErrorKind, FeedReader, FeedSource, ResourceRef,
};
use feedrelay::poll::{
    Clock, CycleReport, ManualClock, PollConfig, PollContext, PollFailure, Poller, Scheduler,
};
use feedrelay::resolve::{ResolutionError, ResolvedResource, Resolver};
use feedrelay::storage::{SeenSet, SeenStore};
use feedrelay::transmission::{
    AddOptions, RpcError, SubmissionError, SubmittedDownload, TorrentClient, TorrentSummary,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeReader {
    /// URL → entries; a URL listed in `failing` errors instead.
    feeds: Mutex<HashMap<String, Vec<FeedEntry>>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeReader {
    fn set_feed(&self, url: &str, entries: Vec<FeedEntry>) {
        self.feeds.lock().unwrap().insert(url.to_string(), entries);
    }

    fn set_failing(&self, url: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(url.to_string());
        } else {
            set.remove(url);
        }
    }
}

#[async_trait]
impl FeedReader for FakeReader {
    async fn fetch(&self, source: &FeedSource) -> Result<Vec<FeedEntry>, FeedError> {
        self.calls.lock().unwrap().push(source.url.clone());
        if self.failing.lock().unwrap().contains(&source.url) {
            return Err(FeedError {
                url: source.url.clone(),
                kind: FeedErrorKind::HttpStatus(503),
            });
        }
        Ok(self
            .feeds
            .lock()
            .unwrap()
            .get(&source.url)
            .cloned()
            .unwrap_or_default())
    }
}

/// Passes the resource URL through; entries without a resource fail.
#[derive(Default)]
struct FakeResolver {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(
        &self,
        _source: &FeedSource,
        entry: &FeedEntry,
    ) -> Result<ResolvedResource, ResolutionError> {
        self.calls.lock().unwrap().push(entry.identifier.clone());
        entry
            .resource
            .as_ref()
            .map(|r| ResolvedResource::DirectLink(r.url.clone()))
            .ok_or(ResolutionError::MissingResource)
    }
}

#[derive(Default)]
struct ClientState {
    added: Vec<(ResolvedResource, AddOptions)>,
    rejecting: HashSet<String>,
    torrents: Vec<TorrentSummary>,
    list_calls: usize,
    reannounced: Vec<i64>,
    reannounce_failing: HashSet<i64>,
}

#[derive(Default)]
struct FakeClient {
    state: Mutex<ClientState>,
}

impl FakeClient {
    fn reject(&self, link: &str, rejecting: bool) {
        let mut state = self.state.lock().unwrap();
        if rejecting {
            state.rejecting.insert(link.to_string());
        } else {
            state.rejecting.remove(link);
        }
    }

    fn added_links(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .added
            .iter()
            .map(|(r, _)| r.to_string())
            .collect()
    }
}

#[async_trait]
impl TorrentClient for FakeClient {
    async fn add_torrent(
        &self,
        resource: &ResolvedResource,
        options: &AddOptions,
    ) -> Result<SubmittedDownload, SubmissionError> {
        let mut state = self.state.lock().unwrap();
        let link = resource.to_string();
        if state.rejecting.contains(&link) {
            return Err(SubmissionError::Rpc(RpcError::Remote(
                "invalid or corrupt torrent file".to_string(),
            )));
        }
        state.added.push((resource.clone(), options.clone()));
        Ok(SubmittedDownload {
            id: state.added.len() as i64,
            name: link,
            hash: None,
            duplicate: false,
        })
    }

    async fn list_torrents(&self) -> Result<Vec<TorrentSummary>, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        Ok(state.torrents.clone())
    }

    async fn reannounce_torrent(&self, id: i64) -> Result<(), RpcError> {
        let mut state = self.state.lock().unwrap();
        if state.reannounce_failing.contains(&id) {
            return Err(RpcError::HttpStatus(500));
        }
        state.reannounced.push(id);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    dir: PathBuf,
    reader: Arc<FakeReader>,
    resolver: Arc<FakeResolver>,
    client: Arc<FakeClient>,
    clock: ManualClock,
}

impl Harness {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("feedrelay_poll_cycle_{name}"));
        std::fs::remove_dir_all(&dir).ok();
        Self {
            dir,
            reader: Arc::new(FakeReader::default()),
            resolver: Arc::new(FakeResolver::default()),
            client: Arc::new(FakeClient::default()),
            clock: ManualClock::new(start_time()),
        }
    }

    fn store(&self) -> SeenStore {
        SeenStore::new(self.dir.join("addeditems.txt"))
    }

    fn poller(&self, feeds: &[&str], config: PollConfig) -> Poller {
        let store = self.store();
        let seen = store.load().unwrap();
        self.poller_with(feeds, config, store, seen)
    }

    fn poller_with(
        &self,
        feeds: &[&str],
        config: PollConfig,
        store: SeenStore,
        seen: SeenSet,
    ) -> Poller {
        let ctx = PollContext {
            reader: self.reader.clone(),
            resolver: self.resolver.clone(),
            client: self.client.clone(),
            store,
        };
        let sources = feeds.iter().map(|u| FeedSource::new(*u)).collect();
        Poller::new(sources, ctx, config, seen)
    }

    fn recorded(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.join("addeditems.txt"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn entry(id: &str) -> FeedEntry {
    FeedEntry {
        identifier: id.to_string(),
        title: format!("Title of {id}"),
        resource: Some(ResourceRef::new(format!("{id}.torrent"))),
    }
}

fn entry_without_resource(id: &str) -> FeedEntry {
    FeedEntry {
        identifier: id.to_string(),
        title: "No link".to_string(),
        resource: None,
    }
}

fn no_reannounce() -> PollConfig {
    PollConfig {
        reannounce_window: Duration::ZERO,
        ..PollConfig::default()
    }
}

fn submitted(report: &CycleReport) -> Vec<&str> {
    report.submitted.iter().map(String::as_str).collect()
}

// ============================================================================
// Cycle behaviour
// ============================================================================

fn ab_feed(h: &Harness) {
    h.reader.set_feed(
        "http://x/rss",
        vec![
            FeedEntry {
                identifier: "a".into(),
                title: "A".into(),
                resource: Some(ResourceRef::new("http://x/a.torrent")),
            },
            FeedEntry {
                identifier: "b".into(),
                title: "B".into(),
                resource: Some(ResourceRef::new("http://x/b.torrent")),
            },
        ],
    );
}

#[tokio::test]
async fn test_scenario_fresh_feed_submits_all() {
    let h = Harness::new("scenario_fresh");
    ab_feed(&h);

    let mut poller = h.poller(&["http://x/rss"], no_reannounce());
    let report = poller.run_cycle(&h.clock).await;

    assert_eq!(submitted(&report), vec!["a", "b"]);
    assert_eq!(poller.seen(), &SeenSet::from_iter(["a", "b"]));
    assert!(report.reannounce.is_none());
    assert_eq!(h.client.state.lock().unwrap().list_calls, 0);
}

#[tokio::test]
async fn test_scenario_seen_entry_skipped() {
    let h = Harness::new("scenario_seen");
    ab_feed(&h);
    h.store().record("a").unwrap();

    let mut poller = h.poller(&["http://x/rss"], no_reannounce());
    let report = poller.run_cycle(&h.clock).await;

    assert_eq!(submitted(&report), vec!["b"]);
    assert_eq!(h.client.added_links(), vec!["http://x/b.torrent"]);
    assert_eq!(poller.seen(), &SeenSet::from_iter(["a", "b"]));
}

#[tokio::test]
async fn test_scenario_failed_submission_stays_unseen() {
    let h = Harness::new("scenario_failed");
    ab_feed(&h);
    h.client.reject("http://x/b.torrent", true);

    let mut poller = h.poller(&["http://x/rss"], no_reannounce());
    let report = poller.run_cycle(&h.clock).await;

    assert_eq!(submitted(&report), vec!["a"]);
    assert_eq!(report.failed_entries(), vec!["b"]);
    assert_eq!(poller.seen(), &SeenSet::from_iter(["a"]));
    assert_eq!(h.recorded(), vec!["a"]);
}

#[tokio::test]
async fn test_new_entries_are_submitted_and_recorded() {
    let h = Harness::new("new_entries");
    h.reader.set_feed("https://a.example/rss", vec![entry("a1"), entry("a2")]);
    h.reader.set_feed("https://b.example/rss", vec![entry("b1")]);

    let mut poller = h.poller(&["https://a.example/rss", "https://b.example/rss"], no_reannounce());
    let report = poller.run_cycle(&h.clock).await;

    assert_eq!(submitted(&report), vec!["a1", "a2", "b1"]);
    assert_eq!(report.feeds_read, 2);
    assert!(report.failures.is_empty());
    assert_eq!(h.client.added_links(), vec!["a1.torrent", "a2.torrent", "b1.torrent"]);
    assert_eq!(h.recorded(), vec!["a1", "a2", "b1"]);
    assert!(poller.seen().contains("b1"));
}

#[tokio::test]
async fn test_second_cycle_without_new_entries_submits_nothing() {
    let h = Harness::new("idempotent");
    h.reader.set_feed("https://a.example/rss", vec![entry("a1"), entry("a2")]);

    let mut poller = h.poller(&["https://a.example/rss"], no_reannounce());
    poller.run_cycle(&h.clock).await;
    let report = poller.run_cycle(&h.clock).await;

    assert!(report.submitted.is_empty());
    assert_eq!(report.already_seen, 2);
    assert_eq!(h.client.added_links().len(), 2);
    assert_eq!(h.recorded().len(), 2);
}

#[tokio::test]
async fn test_seen_entries_survive_restart() {
    let h = Harness::new("restart");
    h.reader.set_feed("https://a.example/rss", vec![entry("a1")]);

    let mut first = h.poller(&["https://a.example/rss"], no_reannounce());
    first.run_cycle(&h.clock).await;
    drop(first);

    h.reader.set_feed("https://a.example/rss", vec![entry("a2"), entry("a1")]);
    let mut second = h.poller(&["https://a.example/rss"], no_reannounce());
    let report = second.run_cycle(&h.clock).await;

    assert_eq!(submitted(&report), vec!["a2"]);
    assert_eq!(h.client.added_links(), vec!["a1.torrent", "a2.torrent"]);
}

#[tokio::test]
async fn test_multiline_guid_submitted_once_across_cycles() {
    let h = Harness::new("multiline_guid");
    let rss = "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>T</title>\
        <item><title>Wrapped</title><guid>release-42\n  part-2</guid>\
        <enclosure url=\"http://x/wrapped.torrent\" type=\"application/x-bittorrent\"/></item>\
        </channel></rss>";
    h.reader.set_feed("http://x/rss", parse_feed(rss.as_bytes()).unwrap());

    let mut poller = h.poller(&["http://x/rss"], no_reannounce());
    let first = poller.run_cycle(&h.clock).await;
    let second = poller.run_cycle(&h.clock).await;

    assert!(first.failures.is_empty());
    assert_eq!(submitted(&first), vec!["release-42 part-2"]);
    assert!(second.submitted.is_empty());
    assert_eq!(second.already_seen, 1);
    assert_eq!(h.client.added_links(), vec!["http://x/wrapped.torrent"]);
    assert_eq!(h.recorded(), vec!["release-42 part-2"]);
}

#[tokio::test]
async fn test_failing_feed_does_not_stop_other_feeds() {
    let h = Harness::new("failing_feed");
    h.reader.set_feed("https://b.example/rss", vec![entry("b1")]);
    h.reader.set_failing("https://a.example/rss", true);

    let mut poller = h.poller(&["https://a.example/rss", "https://b.example/rss"], no_reannounce());
    let report = poller.run_cycle(&h.clock).await;

    assert_eq!(report.feeds_failed, 1);
    assert_eq!(report.feeds_read, 1);
    assert_eq!(submitted(&report), vec!["b1"]);
    assert!(matches!(report.failures.as_slice(), [PollFailure::Feed(e)] if e.url == "https://a.example/rss"));
    assert_eq!(
        *h.reader.calls.lock().unwrap(),
        vec!["https://a.example/rss", "https://b.example/rss"]
    );
}

#[tokio::test]
async fn test_failed_entry_is_retried_next_cycle() {
    let h = Harness::new("retry");
    h.reader.set_feed("https://a.example/rss", vec![entry("a1"), entry("a2"), entry("a3")]);
    h.client.reject("a2.torrent", true);

    let mut poller = h.poller(&["https://a.example/rss"], no_reannounce());
    let report = poller.run_cycle(&h.clock).await;

    assert_eq!(submitted(&report), vec!["a1", "a3"]);
    assert_eq!(report.failed_entries(), vec!["a2"]);
    assert!(matches!(report.failures[0], PollFailure::Submission { .. }));
    assert!(!poller.seen().contains("a2"));
    assert_eq!(h.recorded(), vec!["a1", "a3"]);

    h.client.reject("a2.torrent", false);
    let report = poller.run_cycle(&h.clock).await;

    assert_eq!(submitted(&report), vec!["a2"]);
    assert_eq!(h.recorded(), vec!["a1", "a3", "a2"]);
}

#[tokio::test]
async fn test_unresolvable_entry_is_isolated() {
    let h = Harness::new("unresolvable");
    h.reader.set_feed(
        "https://a.example/rss",
        vec![entry("a1"), entry_without_resource("a2"), entry("a3")],
    );

    let mut poller = h.poller(&["https://a.example/rss"], no_reannounce());
    let report = poller.run_cycle(&h.clock).await;

    assert_eq!(submitted(&report), vec!["a1", "a3"]);
    assert!(matches!(
        &report.failures[..],
        [PollFailure::Resolution { entry, source: ResolutionError::MissingResource, .. }] if entry == "a2"
    ));
    // Never reached the client
    assert_eq!(h.client.added_links(), vec!["a1.torrent", "a3.torrent"]);
}

#[tokio::test]
async fn test_duplicate_entries_within_cycle_submitted_once() {
    let h = Harness::new("dup_in_cycle");
    h.reader.set_feed("https://a.example/rss", vec![entry("x"), entry("x")]);
    h.reader.set_feed("https://b.example/rss", vec![entry("x")]);

    let mut poller = h.poller(&["https://a.example/rss", "https://b.example/rss"], no_reannounce());
    let report = poller.run_cycle(&h.clock).await;

    assert_eq!(submitted(&report), vec!["x"]);
    assert_eq!(h.client.added_links(), vec!["x.torrent"]);
    assert_eq!(h.recorded(), vec!["x"]);
}

#[tokio::test]
async fn test_add_options_follow_config() {
    let h = Harness::new("add_options");
    h.reader.set_feed("https://a.example/rss", vec![entry("a1")]);
    let config = PollConfig {
        download_dir: Some("/data/incoming".to_string()),
        add_paused: true,
        ..no_reannounce()
    };

    let mut poller = h.poller(&["https://a.example/rss"], config);
    poller.run_cycle(&h.clock).await;

    let state = h.client.state.lock().unwrap();
    assert_eq!(
        state.added[0].1,
        AddOptions {
            download_dir: Some("/data/incoming".to_string()),
            paused: true,
        }
    );
}

#[tokio::test]
async fn test_record_failure_leaves_entry_unseen() {
    let h = Harness::new("record_failure");
    h.reader.set_feed("https://a.example/rss", vec![entry("a1")]);
    // A directory where the seen file should be makes every append fail
    std::fs::create_dir_all(h.dir.join("blocked")).unwrap();
    let store = SeenStore::new(h.dir.join("blocked"));

    let mut poller = h.poller_with(&["https://a.example/rss"], no_reannounce(), store, SeenSet::new());
    let report = poller.run_cycle(&h.clock).await;

    assert!(report.submitted.is_empty());
    assert!(matches!(report.failures.as_slice(), [PollFailure::Record { entry, .. }] if entry == "a1"));
    assert!(!poller.seen().contains("a1"));

    // Submitted again next cycle
    poller.run_cycle(&h.clock).await;
    assert_eq!(h.client.added_links(), vec!["a1.torrent", "a1.torrent"]);
}

#[tokio::test]
async fn test_attempt_limit_skips_entry_until_restart() {
    let h = Harness::new("attempt_limit");
    h.reader.set_feed("https://a.example/rss", vec![entry_without_resource("bad"), entry("ok")]);
    let config = PollConfig {
        max_entry_attempts: 2,
        ..no_reannounce()
    };

    let mut poller = h.poller(&["https://a.example/rss"], config.clone());
    for _ in 0..4 {
        poller.run_cycle(&h.clock).await;
    }
    let report = poller.run_cycle(&h.clock).await;

    assert_eq!(report.abandoned, 1);
    let resolved: Vec<String> = h.resolver.calls.lock().unwrap().clone();
    assert_eq!(resolved.iter().filter(|id| *id == "bad").count(), 2);

    // A fresh process starts counting again
    let mut restarted = h.poller(&["https://a.example/rss"], config);
    let report = restarted.run_cycle(&h.clock).await;
    assert_eq!(report.abandoned, 0);
    assert_eq!(report.failed_entries(), vec!["bad"]);
}

#[tokio::test]
async fn test_reset_seen_resubmits_everything() {
    let h = Harness::new("reset");
    h.reader.set_feed("https://a.example/rss", vec![entry("a1"), entry("a2")]);

    let mut poller = h.poller(&["https://a.example/rss"], no_reannounce());
    poller.run_cycle(&h.clock).await;
    poller.reset_seen().unwrap();
    assert!(poller.seen().is_empty());
    assert!(h.recorded().is_empty());

    let report = poller.run_cycle(&h.clock).await;
    assert_eq!(submitted(&report), vec!["a1", "a2"]);
    assert_eq!(h.client.added_links().len(), 4);
}

// ============================================================================
// Re-announce
// ============================================================================

#[tokio::test]
async fn test_reannounce_only_recent_torrents() {
    let h = Harness::new("reannounce");
    {
        let mut state = h.client.state.lock().unwrap();
        state.torrents = vec![
            TorrentSummary {
                id: 1,
                name: "old".into(),
                added: start_time() - ChronoDuration::hours(3),
            },
            TorrentSummary {
                id: 2,
                name: "fresh".into(),
                added: start_time() - ChronoDuration::minutes(10),
            },
            TorrentSummary {
                id: 3,
                name: "flaky".into(),
                added: start_time() - ChronoDuration::minutes(59),
            },
            TorrentSummary {
                id: 4,
                name: "fresh too".into(),
                added: start_time() - ChronoDuration::minutes(1),
            },
        ];
        state.reannounce_failing.insert(3);
    }

    let mut poller = h.poller(&[], PollConfig::default());
    let report = poller.run_cycle(&h.clock).await;
    let reannounce = report.reannounce.expect("reannounce enabled by default");

    assert_eq!(reannounce.candidates, 3);
    assert_eq!(reannounce.reannounced, vec!["fresh", "fresh too"]);
    assert_eq!(reannounce.failures.len(), 1);
    assert_eq!(h.client.state.lock().unwrap().reannounced, vec![2, 4]);
}

#[tokio::test]
async fn test_zero_window_never_lists_torrents() {
    let h = Harness::new("reannounce_disabled");
    h.reader.set_feed("https://a.example/rss", vec![entry("a1")]);

    let mut poller = h.poller(&["https://a.example/rss"], no_reannounce());
    let report = poller.run_cycle(&h.clock).await;

    assert!(report.reannounce.is_none());
    assert_eq!(h.client.state.lock().unwrap().list_calls, 0);
}

#[tokio::test]
async fn test_reannounce_runs_after_feed_failures() {
    let h = Harness::new("reannounce_after_failure");
    h.reader.set_failing("https://a.example/rss", true);

    let mut poller = h.poller(&["https://a.example/rss"], PollConfig::default());
    let report = poller.run_cycle(&h.clock).await;

    assert_eq!(report.feeds_failed, 1);
    assert!(report.reannounce.is_some());
    assert_eq!(h.client.state.lock().unwrap().list_calls, 1);
}

// ============================================================================
// Scheduler
// ============================================================================

#[tokio::test]
async fn test_scheduler_sleeps_between_cycles_only() {
    let h = Harness::new("scheduler");
    h.reader.set_feed("https://a.example/rss", vec![entry("a1")]);
    let config = PollConfig {
        interval: Duration::from_secs(300),
        ..no_reannounce()
    };

    let poller = h.poller(&["https://a.example/rss"], config);
    let mut scheduler = Scheduler::new(poller, ManualClock::new(start_time()));
    let cycles = scheduler.run(Some(3)).await;

    assert_eq!(cycles, 3);
    assert_eq!(scheduler.clock().sleeps(), vec![Duration::from_secs(300); 2]);
    assert_eq!(scheduler.clock().now(), start_time() + ChronoDuration::seconds(600));
    assert_eq!(h.reader.calls.lock().unwrap().len(), 3);
    assert_eq!(h.client.added_links(), vec!["a1.torrent"]);
    assert_eq!(scheduler.poller().seen(), &SeenSet::from_iter(["a1"]));
}

#[tokio::test]
async fn test_single_cycle_run_never_sleeps() {
    let h = Harness::new("scheduler_once");
    let poller = h.poller(&["https://a.example/rss"], no_reannounce());
    let mut scheduler = Scheduler::new(poller, ManualClock::new(start_time()));

    assert_eq!(scheduler.run(Some(1)).await, 1);
    assert!(scheduler.clock().sleeps().is_empty());
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever mix of failures happens, the seen-set only grows, and every
    /// recorded entry was submitted exactly once.
    #[test]
    fn prop_seen_set_only_grows(
        rounds in prop::collection::vec(prop::collection::vec((0u8..6, any::<bool>()), 0..8), 1..5)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let h = Harness::new("prop_seen_grows");
            let mut poller = h.poller(&["https://a.example/rss"], no_reannounce());
            let mut previous = poller.seen().clone();

            for round in &rounds {
                let entries = round.iter().map(|(n, _)| entry(&format!("e{n}"))).collect();
                h.reader.set_feed("https://a.example/rss", entries);
                for (n, reject) in round {
                    h.client.reject(&format!("e{n}.torrent"), *reject);
                }

                poller.run_cycle(&h.clock).await;
                prop_assert!(poller.seen().is_superset(&previous));
                previous = poller.seen().clone();
            }

            let recorded = h.recorded();
            let unique: HashSet<&String> = recorded.iter().collect();
            prop_assert_eq!(unique.len(), recorded.len());
            prop_assert_eq!(recorded.len(), h.client.added_links().len());
            Ok(())
        })?;
    }
}
