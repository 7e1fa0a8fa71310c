//! Submission client for the remote download service (Transmission).
//!
//! [`TorrentClient`] is the seam the poll loop talks to; [`TransmissionRpc`]
//! implements it over Transmission's JSON-RPC interface. Tests substitute an
//! in-memory client.

mod rpc;

pub use rpc::{RpcEndpoint, TransmissionRpc};

use crate::resolve::ResolvedResource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Transport or protocol failure on a single RPC call.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("Authentication rejected (HTTP 401)")]
    Unauthorized,
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Server did not accept the session id handshake")]
    SessionHandshake,
    /// `result` field other than "success"
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),
}

/// Could not reach or authenticate with the remote service at startup.
#[derive(Debug, Error)]
#[error("Error connecting to Transmission at {endpoint}: {source}")]
pub struct ConnectionError {
    pub endpoint: String,
    #[source]
    pub source: RpcError,
}

/// The remote service did not accept a download.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("Failed to read torrent file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One re-announce step that failed; the rest of the pass continues.
#[derive(Debug, Error)]
pub enum ReannounceError {
    #[error("Listing torrents failed: {0}")]
    List(#[source] RpcError),
    #[error("Reannouncing torrent failed: '{name}' (id {id}): {source}")]
    Torrent {
        id: i64,
        name: String,
        #[source]
        source: RpcError,
    },
}

// ============================================================================
// Types
// ============================================================================

/// Per-submission options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// `None` uses the remote service's default directory.
    pub download_dir: Option<String>,
    pub paused: bool,
}

/// Handle returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedDownload {
    pub id: i64,
    pub name: String,
    pub hash: Option<String>,
    /// The remote already had this torrent.
    pub duplicate: bool,
}

/// A download as listed by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentSummary {
    pub id: i64,
    pub name: String,
    pub added: DateTime<Utc>,
}

/// Outcome of one re-announce pass.
#[derive(Debug, Default)]
pub struct ReannounceReport {
    /// Downloads added within the window.
    pub candidates: usize,
    /// Names of downloads successfully re-announced.
    pub reannounced: Vec<String>,
    pub failures: Vec<ReannounceError>,
}

// ============================================================================
// Client Trait
// ============================================================================

#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Submit a resolved resource. Links are handed over by URL, fetched
    /// files by their local contents.
    async fn add_torrent(
        &self,
        resource: &ResolvedResource,
        options: &AddOptions,
    ) -> Result<SubmittedDownload, SubmissionError>;

    async fn list_torrents(&self) -> Result<Vec<TorrentSummary>, RpcError>;

    async fn reannounce_torrent(&self, id: i64) -> Result<(), RpcError>;

    /// Re-announce every download added less than `window` before `now`.
    ///
    /// One list query, then one request per candidate. A failing candidate is
    /// recorded and logged; the remaining candidates are still attempted.
    async fn reannounce_within(&self, window: Duration, now: DateTime<Utc>) -> ReannounceReport {
        let mut report = ReannounceReport::default();

        let torrents = match self.list_torrents().await {
            Ok(t) => t,
            Err(e) => {
                let err = ReannounceError::List(e);
                tracing::error!(error = %err, "Reannounce pass skipped");
                report.failures.push(err);
                return report;
            }
        };

        for torrent in torrents {
            // Add times in the future (clock skew) count as recent
            let recent = match (now - torrent.added).to_std() {
                Ok(age) => age < window,
                Err(_) => true,
            };
            if !recent {
                continue;
            }

            report.candidates += 1;
            match self.reannounce_torrent(torrent.id).await {
                Ok(()) => {
                    tracing::info!(torrent = %torrent.name, id = torrent.id, "Reannounced torrent");
                    report.reannounced.push(torrent.name);
                }
                Err(source) => {
                    let err = ReannounceError::Torrent {
                        id: torrent.id,
                        name: torrent.name,
                        source,
                    };
                    tracing::error!(error = %err, "Reannounce failed");
                    report.failures.push(err);
                }
            }
        }

        report
    }
}
