use feed_rs::model::Entry;
use feed_rs::parser;
use sha2::{Digest, Sha256};

/// Media type advertised by torrent enclosures.
pub const TORRENT_MEDIA_TYPE: &str = "application/x-bittorrent";

/// Where an entry says its downloadable resource lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub url: String,
    pub media_type: Option<String>,
    pub length: Option<u64>,
}

impl ResourceRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            media_type: None,
            length: None,
        }
    }

    /// True when the reference advertises itself as a torrent file,
    /// either by media type or by a `.torrent` path.
    pub fn looks_like_torrent(&self) -> bool {
        if self
            .media_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(TORRENT_MEDIA_TYPE))
        {
            return true;
        }
        let path = self.url.split(['?', '#']).next().unwrap_or("");
        path.to_ascii_lowercase().ends_with(".torrent")
    }
}

/// One item of a parsed feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Stable key across polls; the entry's canonical link when it has one.
    pub identifier: String,
    pub title: String,
    pub resource: Option<ResourceRef>,
}

/// Parse RSS/Atom bytes into entries, preserving feed order.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedEntry>, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;
    Ok(feed.entries.into_iter().map(into_entry).collect())
}

fn into_entry(entry: Entry) -> FeedEntry {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let link = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .map(|l| l.href.trim().to_string())
        .filter(|h| !h.is_empty());

    let resource = enclosure(&entry).or_else(|| {
        // Torrent feeds commonly put the .torrent or magnet URL in <link>
        link.as_ref()
            .map(|href| ResourceRef::new(href.clone()))
            .filter(|r| r.looks_like_torrent() || r.url.starts_with("magnet:"))
    });

    let existing_id = if entry.id.is_empty() {
        None
    } else {
        Some(entry.id.as_str())
    };
    let identifier = generate_identifier(link.as_deref(), existing_id, &title);

    FeedEntry {
        identifier,
        title,
        resource,
    }
}

/// First enclosure of the entry: RSS `<enclosure>` (surfaced by feed-rs as
/// media content) or an Atom `rel="enclosure"` link.
fn enclosure(entry: &Entry) -> Option<ResourceRef> {
    let media = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|c| {
            c.url.as_ref().map(|url| ResourceRef {
                url: url.to_string(),
                media_type: c.content_type.as_ref().map(|m| m.to_string()),
                length: c.size,
            })
        });

    media.or_else(|| {
        entry
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some("enclosure"))
            .map(|l| ResourceRef {
                url: l.href.trim().to_string(),
                media_type: l.media_type.clone(),
                length: l.length,
            })
    })
}

fn generate_identifier(link: Option<&str>, existing: Option<&str>, title: &str) -> String {
    let candidate = link
        .into_iter()
        .chain(existing)
        .map(single_line)
        .find(|id| !id.is_empty());
    if let Some(id) = candidate {
        return id;
    }

    let hash = Sha256::digest(title.as_bytes());
    format!("{:x}", hash)
}

/// Join the lines of a raw identifier with single spaces. The seen file
/// stores one identifier per line.
fn single_line(raw: &str) -> String {
    raw.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
