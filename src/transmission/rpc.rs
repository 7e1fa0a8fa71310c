use super::{
    AddOptions, ConnectionError, RpcError, SubmissionError, SubmittedDownload, TorrentClient,
    TorrentSummary,
};
use crate::resolve::ResolvedResource;
use async_trait::async_trait;
use base64::Engine;
use chrono::DateTime;
use secrecy::{ExposeSecret, SecretString};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

const SESSION_HEADER: &str = "X-Transmission-Session-Id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and how to reach the RPC interface.
#[derive(Clone)]
pub struct RpcEndpoint {
    pub url: Url,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl RpcEndpoint {
    /// Build `http://{host}:{port}{path}`.
    pub fn new(host: &str, port: u16, path: &str) -> Result<Self, url::ParseError> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let url = Url::parse(&format!("http://{host}:{port}{path}"))?;
        Ok(Self {
            url,
            username: None,
            password: None,
        })
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<SecretString>) -> Self {
        self.username = username;
        self.password = password;
        self
    }
}

/// Never prints the password.
impl std::fmt::Debug for RpcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEndpoint")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct TorrentRef {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(rename = "hashString")]
    hash: Option<String>,
}

#[derive(Deserialize)]
struct AddResult {
    #[serde(rename = "torrent-added")]
    added: Option<TorrentRef>,
    #[serde(rename = "torrent-duplicate")]
    duplicate: Option<TorrentRef>,
}

#[derive(Deserialize)]
struct TorrentRow {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(rename = "addedDate", default)]
    added_date: i64,
}

#[derive(Deserialize)]
struct TorrentList {
    #[serde(default)]
    torrents: Vec<TorrentRow>,
}

// ============================================================================
// Client
// ============================================================================

/// Transmission JSON-RPC client.
///
/// Handles the CSRF session-id handshake transparently: a 409 response
/// carries the id to use, which is stored and the request replayed once.
pub struct TransmissionRpc {
    http: reqwest::Client,
    endpoint: RpcEndpoint,
    session_id: Mutex<Option<String>>,
    tag: AtomicU64,
}

impl TransmissionRpc {
    pub fn new(http: reqwest::Client, endpoint: RpcEndpoint) -> Self {
        Self {
            http,
            endpoint,
            session_id: Mutex::new(None),
            tag: AtomicU64::new(1),
        }
    }

    /// Create a client and verify the service answers `session-get`.
    pub async fn connect(
        http: reqwest::Client,
        endpoint: RpcEndpoint,
    ) -> Result<Self, ConnectionError> {
        let client = Self::new(http, endpoint);
        client
            .call::<IgnoredAny>("session-get", json!({ "fields": ["version"] }))
            .await
            .map_err(|source| ConnectionError {
                endpoint: client.endpoint.url.to_string(),
                source,
            })?;
        tracing::info!(endpoint = %client.endpoint.url, "Connected to Transmission");
        Ok(client)
    }

    fn current_session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn store_session_id(&self, id: String) {
        *self.session_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        arguments: serde_json::Value,
    ) -> Result<T, RpcError> {
        let tag = self.tag.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_vec(&json!({
            "method": method,
            "arguments": arguments,
            "tag": tag,
        }))
        .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

        let mut handshake_done = false;
        loop {
            let mut request = self
                .http
                .post(self.endpoint.url.as_str())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());

            if let Some(id) = self.current_session_id() {
                request = request.header(SESSION_HEADER, id);
            }
            if let Some(user) = &self.endpoint.username {
                request = request.basic_auth(
                    user,
                    self.endpoint.password.as_ref().map(|p| p.expose_secret()),
                );
            }

            let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
                .await
                .map_err(|_| RpcError::Timeout)?
                .map_err(RpcError::Network)?;

            let status = response.status();
            if status == reqwest::StatusCode::CONFLICT {
                let id = response
                    .headers()
                    .get(SESSION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                match id {
                    Some(id) if !handshake_done => {
                        tracing::debug!(method = method, "Refreshing Transmission session id");
                        self.store_session_id(id);
                        handshake_done = true;
                        continue;
                    }
                    _ => return Err(RpcError::SessionHandshake),
                }
            }
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(RpcError::Unauthorized);
            }
            if !status.is_success() {
                return Err(RpcError::HttpStatus(status.as_u16()));
            }

            let bytes = response.bytes().await.map_err(RpcError::Network)?;
            let envelope: RpcResponse = serde_json::from_slice(&bytes)
                .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

            if envelope.result != "success" {
                return Err(RpcError::Remote(envelope.result));
            }

            return serde_json::from_value(envelope.arguments)
                .map_err(|e| RpcError::InvalidResponse(e.to_string()));
        }
    }
}

#[async_trait]
impl TorrentClient for TransmissionRpc {
    async fn add_torrent(
        &self,
        resource: &ResolvedResource,
        options: &AddOptions,
    ) -> Result<SubmittedDownload, SubmissionError> {
        let mut arguments = serde_json::Map::new();
        match resource {
            ResolvedResource::DirectLink(url) => {
                arguments.insert("filename".into(), json!(url));
            }
            ResolvedResource::FetchedFile(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|source| SubmissionError::ReadFile {
                        path: path.clone(),
                        source,
                    })?;
                let metainfo = base64::engine::general_purpose::STANDARD.encode(bytes);
                arguments.insert("metainfo".into(), json!(metainfo));
            }
        }
        if let Some(dir) = &options.download_dir {
            arguments.insert("download-dir".into(), json!(dir));
        }
        arguments.insert("paused".into(), json!(options.paused));

        let result: AddResult = self
            .call("torrent-add", serde_json::Value::Object(arguments))
            .await?;

        let (torrent, duplicate) = match (result.added, result.duplicate) {
            (Some(t), _) => (t, false),
            (None, Some(t)) => (t, true),
            (None, None) => {
                return Err(RpcError::InvalidResponse(
                    "torrent-add returned neither torrent-added nor torrent-duplicate".into(),
                )
                .into())
            }
        };

        Ok(SubmittedDownload {
            id: torrent.id,
            name: torrent.name,
            hash: torrent.hash,
            duplicate,
        })
    }

    async fn list_torrents(&self) -> Result<Vec<TorrentSummary>, RpcError> {
        let list: TorrentList = self
            .call(
                "torrent-get",
                json!({ "fields": ["id", "name", "addedDate"] }),
            )
            .await?;

        Ok(list
            .torrents
            .into_iter()
            .map(|row| TorrentSummary {
                id: row.id,
                name: row.name,
                added: DateTime::from_timestamp(row.added_date, 0).unwrap_or_default(),
            })
            .collect())
    }

    async fn reannounce_torrent(&self, id: i64) -> Result<(), RpcError> {
        self.call::<IgnoredAny>("torrent-reannounce", json!({ "ids": [id] }))
            .await
            .map(|_| ())
    }
}
