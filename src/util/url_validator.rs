use thiserror::Error;
use url::Url;

/// Errors that can occur while classifying a resource URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme Transmission cannot fetch.
    #[error("Unsupported scheme: {0} (only http/https/magnet allowed)")]
    UnsupportedScheme(String),
    /// An http(s) URL without a host.
    #[error("URL has no host")]
    MissingHost,
}

/// A resource reference that Transmission can be handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUrl {
    /// `http` or `https` URL to a .torrent (or a page serving one).
    Http(Url),
    /// `magnet:` URI, passed through verbatim.
    Magnet(String),
}

impl ResourceUrl {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceUrl::Http(url) => url.as_str(),
            ResourceUrl::Magnet(uri) => uri,
        }
    }
}

/// Classify a resource reference from a feed entry.
///
/// Accepts absolute `http`/`https` URLs with a host, and `magnet:` URIs.
/// Everything else (relative references, `file://`, `ftp://`, ...) is rejected
/// since the remote service could not retrieve it.
///
/// ```
/// use feedrelay::util::{validate_resource_url, ResourceUrl};
///
/// let url = validate_resource_url("https://example.com/a.torrent").unwrap();
/// assert!(matches!(url, ResourceUrl::Http(_)));
///
/// assert!(validate_resource_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_resource_url(url_str: &str) -> Result<ResourceUrl, UrlValidationError> {
    let trimmed = url_str.trim();
    let url = Url::parse(trimmed)?;

    match url.scheme() {
        "magnet" => Ok(ResourceUrl::Magnet(trimmed.to_string())),
        "http" | "https" => {
            if url.host_str().map_or(true, str::is_empty) {
                return Err(UrlValidationError::MissingHost);
            }
            Ok(ResourceUrl::Http(url))
        }
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}
