use crate::feed::{read_limited_bytes, BodyError};
use crate::util::sanitize_filename;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, USER_AGENT};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MAX_TORRENT_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Failures while fetching a resource to a local file.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    #[error("Response too large")]
    ResponseTooLarge,
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<BodyError> for DownloadError {
    fn from(e: BodyError) -> Self {
        match e {
            BodyError::Network(e) => DownloadError::Network(e),
            BodyError::TooLarge => DownloadError::ResponseTooLarge,
            BodyError::Incomplete { expected, received } => {
                DownloadError::IncompleteResponse { expected, received }
            }
        }
    }
}

/// Fetch `url` into `dir`, naming the file from the response.
///
/// The name comes from `Content-Disposition` when present, then the last URL
/// path segment, then a digest of the URL; `.torrent` is appended when the
/// name has no such extension. The body lands in a temporary sibling first
/// and is renamed into place, so the final path never holds a partial file.
pub async fn fetch_to_file(
    client: &reqwest::Client,
    url: &Url,
    user_agent: Option<&str>,
    dir: &Path,
) -> Result<PathBuf, DownloadError> {
    let mut request = client.get(url.as_str());
    if let Some(agent) = user_agent {
        request = request.header(USER_AGENT, agent);
    }

    let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
        .await
        .map_err(|_| DownloadError::Timeout)?
        .map_err(DownloadError::Network)?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus(response.status().as_u16()));
    }

    let name = filename_from_headers(response.headers())
        .or_else(|| filename_from_url(url))
        .unwrap_or_else(|| format!("{:x}", Sha256::digest(url.as_str().as_bytes())));
    let name = with_torrent_extension(name);

    let bytes = read_limited_bytes(response, MAX_TORRENT_SIZE).await?;

    let path = dir.join(&name);
    write_atomically(dir, &path, &bytes)?;

    tracing::debug!(url = %url, path = %path.display(), bytes = bytes.len(), "Fetched resource to file");
    Ok(path)
}

fn write_atomically(dir: &Path, dst: &Path, content: &[u8]) -> Result<(), DownloadError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| DownloadError::Io { path, source }
    };

    std::fs::create_dir_all(dir).map_err(io_err(dir))?;

    // Unpredictable temp name so concurrent or stale temps never collide
    use std::time::{SystemTime, UNIX_EPOCH};
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("part.{:016x}", random_suffix));

    let result = (|| {
        let mut temp_file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        temp_file.write_all(content)?;
        temp_file.sync_all()?;
        drop(temp_file);

        #[cfg(windows)]
        if dst.exists() {
            std::fs::remove_file(dst)?;
        }

        std::fs::rename(&temp_path, dst)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_err(dst)(e));
    }
    Ok(())
}

fn filename_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    filename_from_content_disposition(value)
}

/// Extract the file name from a `Content-Disposition` value.
///
/// `filename*=charset'lang'percent-encoded` (RFC 5987) wins over `filename=`.
pub(crate) fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;

    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = strip_prefix_ignore_case(part, "filename*=") {
            let encoded = encoded.trim_matches('"');
            let raw = encoded.rfind('\'').map_or(encoded, |idx| &encoded[idx + 1..]);
            if let Ok(decoded) = urlencoding::decode(raw) {
                if let Some(name) = sanitize_filename(&decoded) {
                    return Some(name);
                }
            }
        } else if let Some(name) = strip_prefix_ignore_case(part, "filename=") {
            plain = sanitize_filename(name.trim_matches('"'));
        }
    }

    plain
}

fn filename_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last).ok()?;
    sanitize_filename(&decoded)
}

fn with_torrent_extension(name: String) -> String {
    if name.to_ascii_lowercase().ends_with(".torrent") {
        name
    } else {
        format!("{name}.torrent")
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
