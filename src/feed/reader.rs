use crate::feed::parser::{parse_feed, FeedEntry};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Feed Source
// ============================================================================

/// How an entry's resource reference is handed to Transmission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveMode {
    /// Pass the URL through; Transmission fetches it itself.
    #[default]
    Direct,
    /// Download the resource locally first and submit the file.
    Download,
    /// Direct for obvious torrent URLs, download for everything else.
    Auto,
}

/// One configured feed plus its fetch options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub url: String,
    /// Sent as `User-Agent` for the feed and any resource downloads.
    pub user_agent: Option<String>,
    pub resolve: ResolveMode,
}

impl FeedSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: None,
            resolve: ResolveMode::default(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a feed could not be turned into entries.
#[derive(Debug, Error)]
pub enum FeedErrorKind {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// A feed that could not be retrieved or parsed. Never fatal for a cycle.
#[derive(Debug, Error)]
#[error("Error reading feed '{url}': {kind}")]
pub struct FeedError {
    pub url: String,
    #[source]
    pub kind: FeedErrorKind,
}

// ============================================================================
// Reader
// ============================================================================

/// Fetches one feed source into a complete batch of entries.
#[async_trait]
pub trait FeedReader: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> Result<Vec<FeedEntry>, FeedError>;
}

/// [`FeedReader`] over HTTP with retry on rate limiting and server errors.
#[derive(Clone)]
pub struct HttpFeedReader {
    client: reqwest::Client,
    backoff_base: Duration,
}

impl HttpFeedReader {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            backoff_base: Duration::from_secs(2),
        }
    }

    /// Override the first backoff delay (doubled per retry).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    async fn fetch_bytes(&self, source: &FeedSource) -> Result<Vec<u8>, FeedErrorKind> {
        let mut retry_count = 0;

        loop {
            let mut request = self.client.get(&source.url);
            if let Some(agent) = &source.user_agent {
                request = request.header(reqwest::header::USER_AGENT, agent);
            }

            let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
                .await
                .map_err(|_| FeedErrorKind::Timeout)?
                .map_err(FeedErrorKind::Network)?;

            let status = response.status();
            let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status.is_server_error();

            if retryable {
                if retry_count >= MAX_RETRIES {
                    return Err(if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        FeedErrorKind::RateLimited(MAX_RETRIES)
                    } else {
                        FeedErrorKind::HttpStatus(status.as_u16())
                    });
                }

                let delay = self.backoff_base * 2u32.pow(retry_count);
                tracing::warn!(
                    feed = %source.url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Feed request failed, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx errors fail immediately
            if !status.is_success() {
                return Err(FeedErrorKind::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, MAX_FEED_SIZE).await {
                Ok(bytes) => return Ok(bytes),
                Err(BodyError::Incomplete { expected, received })
                    if retry_count < MAX_RETRIES =>
                {
                    let delay = self.backoff_base * 2u32.pow(retry_count);
                    tracing::debug!(
                        feed = %source.url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl FeedReader for HttpFeedReader {
    async fn fetch(&self, source: &FeedSource) -> Result<Vec<FeedEntry>, FeedError> {
        let result: Result<Vec<FeedEntry>, FeedErrorKind> = async {
            let bytes = self.fetch_bytes(source).await?;
            parse_feed(&bytes).map_err(|e| FeedErrorKind::Parse(e.to_string()))
        }
        .await;

        match result {
            Ok(entries) => {
                tracing::info!(feed = %source.url, entries = entries.len(), "Reading feed");
                Ok(entries)
            }
            Err(kind) => Err(FeedError {
                url: source.url.clone(),
                kind,
            }),
        }
    }
}

/// Why a response body could not be read in full.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("Request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("Response too large")]
    TooLarge,
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: usize },
}

impl From<BodyError> for FeedErrorKind {
    fn from(e: BodyError) -> Self {
        match e {
            BodyError::Network(e) => FeedErrorKind::Network(e),
            BodyError::TooLarge => FeedErrorKind::ResponseTooLarge,
            BodyError::Incomplete { expected, received } => {
                FeedErrorKind::IncompleteResponse { expected, received }
            }
        }
    }
}

/// Read a response body, enforcing a size cap and Content-Length completeness.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, BodyError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(BodyError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BodyError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(BodyError::Incomplete {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
