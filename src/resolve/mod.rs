//! Turns a feed entry into something Transmission can be handed.
//!
//! An entry's resource reference is either passed through as a URL
//! ([`ResolvedResource::DirectLink`]) or fetched to a local file first
//! ([`ResolvedResource::FetchedFile`]). The choice follows the feed's
//! [`ResolveMode`]:
//!
//! | reference            | `direct`   | `download` | `auto`                         |
//! |----------------------|------------|------------|--------------------------------|
//! | `magnet:`            | link       | link       | link                           |
//! | `http(s)` `.torrent` | link       | file       | link                           |
//! | other `http(s)`      | link       | file       | file                           |
//! | missing / other      | error      | error      | error                          |

mod download;

pub use download::{fetch_to_file, DownloadError};

use crate::feed::{FeedEntry, FeedSource, ResolveMode, ResourceRef};
use crate::util::{validate_resource_url, ResourceUrl, UrlValidationError};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// A concrete resource ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedResource {
    /// URL (http(s) or magnet) that the remote service retrieves itself.
    DirectLink(String),
    /// Torrent file already materialized on local disk.
    FetchedFile(PathBuf),
}

impl std::fmt::Display for ResolvedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedResource::DirectLink(url) => f.write_str(url),
            ResolvedResource::FetchedFile(path) => write!(f, "{}", path.display()),
        }
    }
}

/// An entry that could not be resolved. Fails only that entry.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Entry has no resource reference")]
    MissingResource,

    #[error("Unusable resource reference '{url}': {source}")]
    Unusable {
        url: String,
        #[source]
        source: UrlValidationError,
    },

    #[error("Fetching '{url}' failed: {source}")]
    Download {
        url: String,
        #[source]
        source: DownloadError,
    },
}

/// What to do with a reference, decided before any network access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Plan {
    Link(String),
    Fetch(Url),
}

/// Pick link vs. fetch for a reference under the given mode.
pub(crate) fn plan(mode: ResolveMode, resource: &ResourceRef) -> Result<Plan, ResolutionError> {
    let classified =
        validate_resource_url(&resource.url).map_err(|source| ResolutionError::Unusable {
            url: resource.url.clone(),
            source,
        })?;

    Ok(match (classified, mode) {
        (ResourceUrl::Magnet(uri), _) => Plan::Link(uri),
        (ResourceUrl::Http(url), ResolveMode::Direct) => Plan::Link(url.into()),
        (ResourceUrl::Http(url), ResolveMode::Download) => Plan::Fetch(url),
        (ResourceUrl::Http(url), ResolveMode::Auto) => {
            if resource.looks_like_torrent() {
                Plan::Link(url.into())
            } else {
                Plan::Fetch(url)
            }
        }
    })
}

/// Resolves entries into submittable resources.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(
        &self,
        source: &FeedSource,
        entry: &FeedEntry,
    ) -> Result<ResolvedResource, ResolutionError>;
}

/// [`Resolver`] that downloads over HTTP into a staging directory.
#[derive(Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
    staging_dir: PathBuf,
}

impl HttpResolver {
    pub fn new(client: reqwest::Client, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            staging_dir: staging_dir.into(),
        }
    }
}

#[async_trait]
impl Resolver for HttpResolver {
    async fn resolve(
        &self,
        source: &FeedSource,
        entry: &FeedEntry,
    ) -> Result<ResolvedResource, ResolutionError> {
        let resource = entry
            .resource
            .as_ref()
            .ok_or(ResolutionError::MissingResource)?;

        match plan(source.resolve, resource)? {
            Plan::Link(url) => Ok(ResolvedResource::DirectLink(url)),
            Plan::Fetch(url) => {
                let path = fetch_to_file(
                    &self.client,
                    &url,
                    source.user_agent.as_deref(),
                    &self.staging_dir,
                )
                .await
                .map_err(|source| ResolutionError::Download {
                    url: url.to_string(),
                    source,
                })?;
                Ok(ResolvedResource::FetchedFile(path))
            }
        }
    }
}
