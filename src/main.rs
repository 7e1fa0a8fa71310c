use anyhow::{Context, Result};
use clap::Parser;
use feedrelay::config::{Config, ConfigOverrides};
use feedrelay::feed::HttpFeedReader;
use feedrelay::poll::{PollContext, Poller, Scheduler, SystemClock};
use feedrelay::resolve::HttpResolver;
use feedrelay::storage::SeenStore;
use feedrelay::transmission::TransmissionRpc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Default log filter when RUST_LOG is unset.
const DEFAULT_LOG_FILTER: &str = "feedrelay=debug,info";

/// Get the config directory path (~/.config/feedrelay/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedrelay"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedrelay",
    version,
    about = "Poll RSS feeds and add new torrents to Transmission"
)]
struct Args {
    /// Config file (default: ~/.config/feedrelay/config.toml)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transmission host
    #[arg(short = 'H', long, value_name = "HOST")]
    transmission_host: Option<String>,

    /// Transmission RPC port
    #[arg(short = 'P', long, value_name = "PORT")]
    transmission_port: Option<u16>,

    /// Transmission RPC username
    #[arg(short = 'u', long, value_name = "USER")]
    transmission_user: Option<String>,

    /// Transmission RPC password
    #[arg(short = 'p', long, value_name = "PASSWORD")]
    transmission_password: Option<String>,

    /// Feed URLs to poll (replaces the config file's feeds)
    #[arg(short = 'L', long, value_name = "URL", num_args = 1..)]
    feed_urls: Option<Vec<String>>,

    /// Directory Transmission saves downloads to
    #[arg(short = 'd', long, value_name = "DIR")]
    download_dir: Option<String>,

    /// Log file; "-" logs to the console
    #[arg(short = 'l', long, value_name = "FILE")]
    log_file: Option<String>,

    /// Re-announce torrents added within this many minutes (0 disables)
    #[arg(short = 'r', long, value_name = "MINUTES")]
    reannounce_interval: Option<f64>,

    /// Minutes between feed polls
    #[arg(short = 'n', long, value_name = "MINUTES")]
    request_interval: Option<f64>,

    /// Add torrents paused
    #[arg(short = 'a', long)]
    add_paused: bool,

    /// Forget every previously added entry before starting
    #[arg(short = 'R', long)]
    clear_added_items: bool,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            transmission_host: self.transmission_host.clone(),
            transmission_port: self.transmission_port,
            transmission_user: self.transmission_user.clone(),
            transmission_password: self.transmission_password.clone(),
            feed_urls: self.feed_urls.clone(),
            download_dir: self.download_dir.clone(),
            log_file: self.log_file.clone(),
            reannounce_minutes: self.reannounce_interval,
            request_interval_minutes: self.request_interval,
            add_paused: self.add_paused,
        }
    }
}

/// Console logging by default; a log file is appended to without ANSI colors.
fn init_tracing(log_path: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match log_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory '{}'", parent.display())
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file '{}'", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

/// Startup connection check; any failure here ends the process.
async fn connect_transmission(http: reqwest::Client, config: &Config) -> Result<TransmissionRpc> {
    let endpoint = config.rpc_endpoint()?;
    TransmissionRpc::connect(http, endpoint)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Unable to reach Transmission, exiting"))
        .context("Unable to reach Transmission")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let config_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
    config.apply(args.overrides());
    config.validate()?;

    init_tracing(config.log_path().as_deref())?;
    for key in &config.unknown_keys {
        tracing::warn!(key = %key, path = %config_path.display(), "Unknown key in config file, ignoring");
    }
    tracing::info!(
        path = %config_path.display(),
        found = config_path.exists(),
        feeds = config.feeds.len(),
        "Loaded configuration"
    );
    tracing::debug!(config = ?config, "Effective configuration");

    let store = SeenStore::new(config.seen_file_path(&config_dir));
    if args.clear_added_items {
        store.reset()?;
        tracing::info!(path = %store.path().display(), "Cleared added items");
    }

    let http = feedrelay::http::build_client().context("Failed to build HTTP client")?;
    let client = connect_transmission(http.clone(), &config).await?;

    let feeds = config.feed_sources();
    if feeds.is_empty() {
        tracing::info!("No feed URLs configured, exiting");
        return Ok(());
    }

    let seen = store.load()?;
    tracing::info!(
        feeds = feeds.len(),
        seen = seen.len(),
        path = %store.path().display(),
        "Loaded seen entries"
    );

    let ctx = PollContext {
        reader: Arc::new(HttpFeedReader::new(http.clone())),
        resolver: Arc::new(HttpResolver::new(http, config.torrent_dir_path(&config_dir))),
        client: Arc::new(client),
        store,
    };
    let poller = Poller::new(feeds, ctx, config.poll_config(), seen);
    let mut scheduler = Scheduler::new(poller, SystemClock);

    let max_cycles = if args.once { Some(1) } else { None };
    tokio::select! {
        cycles = scheduler.run(max_cycles) => {
            tracing::info!(cycles = cycles, "Finished");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
    }

    Ok(())
}
