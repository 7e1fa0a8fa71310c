//! Utility functions shared by the resolver and logging paths.
//!
//! - **URL classification**: which resource references Transmission can be handed
//! - **Text**: control-character stripping and file name sanitizing
//!
//! # Examples
//!
//! ```
//! use feedrelay::util::{sanitize_filename, validate_resource_url};
//!
//! let url = validate_resource_url("magnet:?xt=urn:btih:abc").unwrap();
//! assert_eq!(url.as_str(), "magnet:?xt=urn:btih:abc");
//!
//! assert_eq!(sanitize_filename("a/b.torrent").as_deref(), Some("a_b.torrent"));
//! ```

mod text;
mod url_validator;

pub use text::{sanitize_filename, strip_control_chars};
pub use url_validator::{validate_resource_url, ResourceUrl, UrlValidationError};
