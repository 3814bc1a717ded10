//! Source URI normalization
//!
//! Two feed URIs are considered equal when scheme, host, port and path match,
//! case-insensitively. Query strings and fragments are ignored, trailing
//! slashes are trimmed, and a trailing OData `$metadata` segment is dropped so
//! a service document matches the feed root it describes.

use std::fmt;
use url::Url;

const ODATA_METADATA_SUFFIX: &str = "$metadata";

/// Comparable identity of a feed URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedUri {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
}

impl NormalizedUri {
    /// Normalize a raw URI string, `None` if it is not an absolute URI
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = strip_odata_metadata(raw.trim_end_matches('/'));

        let url = if trimmed.starts_with('/') {
            Url::parse(&format!("file://{}", trimmed)).ok()?
        } else {
            Url::parse(trimmed).ok()?
        };

        Some(Self::from_url(&url))
    }

    /// Normalize an already parsed URL
    pub fn from_url(url: &Url) -> Self {
        let path = strip_odata_metadata(url.path().trim_end_matches('/'));

        Self {
            scheme: url.scheme().to_ascii_lowercase(),
            host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            port: url.port_or_known_default(),
            path: path.trim_end_matches('/').to_lowercase(),
        }
    }

    /// Compare a raw URI against this one
    pub fn matches(&self, raw: &str) -> bool {
        NormalizedUri::parse(raw).is_some_and(|other| &other == self)
    }
}

impl fmt::Display for NormalizedUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.path)
    }
}

/// Drop a trailing `$metadata` segment and the slashes before it
fn strip_odata_metadata(uri: &str) -> &str {
    let len = uri.len();
    if len >= ODATA_METADATA_SUFFIX.len()
        && uri.is_char_boundary(len - ODATA_METADATA_SUFFIX.len())
        && uri[len - ODATA_METADATA_SUFFIX.len()..].eq_ignore_ascii_case(ODATA_METADATA_SUFFIX)
    {
        uri[..len - ODATA_METADATA_SUFFIX.len()].trim_end_matches('/')
    } else {
        uri
    }
}

/// Determine if the scheme, server and path of two URIs are identical
pub fn uri_equals(left: &str, right: &str) -> bool {
    match (NormalizedUri::parse(left), NormalizedUri::parse(right)) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}
