//! Configuration file parser for ~/.config/feedrelay/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown top-level keys are ignored by serde but collected in
//! [`Config::unknown_keys`] so the caller can warn about likely typos once
//! logging is up. Command-line flags are layered on top through
//! [`ConfigOverrides`].
use crate::feed::{FeedSource, ResolveMode};
use crate::poll::PollConfig;
use crate::transmission::RpcEndpoint;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// A feed entry in the config file: either a bare URL or a table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FeedConfig {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        user_agent: Option<String>,
        #[serde(default)]
        resolve: ResolveMode,
    },
}

impl FeedConfig {
    pub fn to_source(&self) -> FeedSource {
        match self {
            FeedConfig::Url(url) => FeedSource::new(url.clone()),
            FeedConfig::Detailed {
                url,
                user_agent,
                resolve,
            } => FeedSource {
                url: url.clone(),
                user_agent: user_agent.clone(),
                resolve: *resolve,
            },
        }
    }
}

/// Transmission RPC connection settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    pub host: String,
    pub port: u16,
    pub rpc_path: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9091,
            rpc_path: "/transmission/rpc".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Mask the password in Debug output so it never reaches the logs.
impl std::fmt::Debug for TransmissionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmissionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("rpc_path", &self.rpc_path)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feeds: Vec<FeedConfig>,

    pub transmission: TransmissionConfig,

    /// Where Transmission saves downloads. `None` = Transmission's default.
    pub download_dir: Option<String>,

    /// Add torrents paused instead of starting them.
    pub add_paused: bool,

    /// Re-announce torrents added within this many minutes. 0 = disabled.
    pub reannounce_minutes: f64,

    /// Minutes between polls of all feeds.
    pub request_interval_minutes: f64,

    /// Seen-set file. Defaults to `addeditems.txt` in the config directory.
    pub seen_file: Option<PathBuf>,

    /// Staging directory for downloaded .torrent files.
    pub torrent_dir: Option<PathBuf>,

    /// Give up on an entry after this many failed attempts (until restart). 0 = never.
    pub max_entry_attempts: u32,

    /// Log file path. `None` or `-` logs to the console.
    pub log_file: Option<String>,

    /// Top-level keys in the file that matched no setting.
    #[serde(skip)]
    pub unknown_keys: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            transmission: TransmissionConfig::default(),
            download_dir: None,
            add_paused: false,
            reannounce_minutes: 60.0,
            request_interval_minutes: 2.0,
            seen_file: None,
            torrent_dir: None,
            max_entry_attempts: 0,
            log_file: None,
            unknown_keys: Vec::new(),
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub transmission_host: Option<String>,
    pub transmission_port: Option<u16>,
    pub transmission_user: Option<String>,
    pub transmission_password: Option<String>,
    pub feed_urls: Option<Vec<String>>,
    pub download_dir: Option<String>,
    pub log_file: Option<String>,
    pub reannounce_minutes: Option<f64>,
    pub request_interval_minutes: Option<f64>,
    /// Only ever turns pausing on; the flag cannot disable a config value.
    pub add_paused: bool,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "feeds",
        "transmission",
        "download_dir",
        "add_paused",
        "reannounce_minutes",
        "request_interval_minutes",
        "seen_file",
        "torrent_dir",
        "max_entry_attempts",
        "log_file",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, listed in `unknown_keys`
    ///
    /// Loading happens before the log destination is known, so nothing is
    /// logged here.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut config: Config = toml::from_str(&content)?;
        if let Ok(raw) = content.parse::<toml::Table>() {
            config.unknown_keys = raw
                .keys()
                .filter(|key| !Self::KNOWN_KEYS.contains(&key.as_str()))
                .cloned()
                .collect();
        }
        Ok(config)
    }

    /// Layer command-line values over the file values.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.transmission_host {
            self.transmission.host = host;
        }
        if let Some(port) = overrides.transmission_port {
            self.transmission.port = port;
        }
        if let Some(user) = overrides.transmission_user {
            self.transmission.username = Some(user);
        }
        if let Some(password) = overrides.transmission_password {
            self.transmission.password = Some(password);
        }
        if let Some(urls) = overrides.feed_urls {
            self.feeds = urls.into_iter().map(FeedConfig::Url).collect();
        }
        if let Some(dir) = overrides.download_dir {
            self.download_dir = Some(dir);
        }
        if let Some(log_file) = overrides.log_file {
            self.log_file = Some(log_file);
        }
        if let Some(minutes) = overrides.reannounce_minutes {
            self.reannounce_minutes = minutes;
        }
        if let Some(minutes) = overrides.request_interval_minutes {
            self.request_interval_minutes = minutes;
        }
        if overrides.add_paused {
            self.add_paused = true;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !minutes(self.request_interval_minutes).is_some_and(|d| !d.is_zero()) {
            return Err(ConfigError::Invalid(format!(
                "request_interval_minutes must be greater than 0 and fit in a duration (got {})",
                self.request_interval_minutes
            )));
        }
        if minutes(self.reannounce_minutes).is_none() {
            return Err(ConfigError::Invalid(format!(
                "reannounce_minutes must be 0 or more and fit in a duration (got {})",
                self.reannounce_minutes
            )));
        }
        if self.transmission.host.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "transmission.host must not be empty".to_string(),
            ));
        }
        if let Some(feed) = self.feeds.iter().map(FeedConfig::to_source).find(|f| f.url.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "feed URL must not be empty ({:?})",
                feed
            )));
        }
        Ok(())
    }

    /// `None` and `-` both mean console logging.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file
            .as_deref()
            .filter(|p| !p.is_empty() && *p != "-")
            .map(PathBuf::from)
    }

    pub fn feed_sources(&self) -> Vec<FeedSource> {
        self.feeds.iter().map(FeedConfig::to_source).collect()
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            download_dir: self.download_dir.clone(),
            add_paused: self.add_paused,
            reannounce_window: saturating_minutes(self.reannounce_minutes),
            interval: saturating_minutes(self.request_interval_minutes),
            max_entry_attempts: self.max_entry_attempts,
        }
    }

    pub fn rpc_endpoint(&self) -> Result<RpcEndpoint, ConfigError> {
        let t = &self.transmission;
        let endpoint = RpcEndpoint::new(&t.host, t.port, &t.rpc_path)
            .map_err(|e| ConfigError::Invalid(format!("Transmission endpoint: {e}")))?;
        Ok(endpoint.with_credentials(
            t.username.clone(),
            t.password.clone().map(SecretString::from),
        ))
    }

    pub fn seen_file_path(&self, config_dir: &Path) -> PathBuf {
        self.seen_file
            .clone()
            .unwrap_or_else(|| config_dir.join("addeditems.txt"))
    }

    pub fn torrent_dir_path(&self, config_dir: &Path) -> PathBuf {
        self.torrent_dir
            .clone()
            .unwrap_or_else(|| config_dir.join("torrents"))
    }
}

/// `None` for negative, NaN, infinite or overflowing values.
fn minutes(m: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(m * 60.0).ok()
}

fn saturating_minutes(m: f64) -> Duration {
    minutes(m).unwrap_or(if m > 0.0 { Duration::MAX } else { Duration::ZERO })
}

// ============================================================================
// Tests
// ============================================================================
