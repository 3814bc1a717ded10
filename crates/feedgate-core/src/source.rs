//! Package source definitions and the source list seam

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{CoreError, Result};
use crate::uri::NormalizedUri;

/// A named endpoint serving package metadata and content
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSource {
    /// Display name, unique within a source list
    pub name: String,

    /// Feed URL (http(s), file:// or an absolute path)
    pub url: String,

    /// Username for the settings credential provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Secret paired with `username`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl PackageSource {
    /// Create a source, validating the URL shape
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let url = url.into();
        SourceKind::detect(&url)?;

        Ok(Self {
            name,
            url,
            username: None,
            password: None,
        })
    }

    /// Attach stored credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Transport family of this source
    pub fn kind(&self) -> Result<SourceKind> {
        SourceKind::detect(&self.url)
    }

    pub fn is_http(&self) -> bool {
        matches!(self.kind(), Ok(SourceKind::Http))
    }

    pub fn is_local(&self) -> bool {
        matches!(self.kind(), Ok(SourceKind::Local))
    }

    /// Filesystem root for local sources
    pub fn local_path(&self) -> Option<PathBuf> {
        if !self.is_local() {
            return None;
        }
        let path = strip_scheme(&self.url, "file://").unwrap_or(&self.url);
        Some(PathBuf::from(path))
    }

    /// Normalized identity of this source, `None` for unparsable URLs
    pub fn normalized_url(&self) -> Option<NormalizedUri> {
        NormalizedUri::parse(&self.url)
    }

    /// Both username and secret are present and non-empty
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.username, &self.password),
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty()
        )
    }
}

impl fmt::Debug for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageSource")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Source transport family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Remote feed reached over HTTP(S)
    Http,
    /// Folder on the local filesystem
    Local,
}

impl SourceKind {
    /// Detect the source kind from its URL
    pub fn detect(url: &str) -> Result<Self> {
        if strip_scheme(url, "http://").is_some() || strip_scheme(url, "https://").is_some() {
            Ok(SourceKind::Http)
        } else if strip_scheme(url, "file://").is_some() || url.starts_with('/') {
            Ok(SourceKind::Local)
        } else {
            Err(CoreError::InvalidSourceUrl {
                url: url.to_string(),
                reason: "URL must start with http://, https://, file://, or /".to_string(),
            })
        }
    }
}

/// Remainder of `url` after `scheme`, which matches in any case
fn strip_scheme<'a>(url: &'a str, scheme: &str) -> Option<&'a str> {
    let prefix = url.get(..scheme.len())?;
    prefix
        .eq_ignore_ascii_case(scheme)
        .then(|| &url[scheme.len()..])
}

/// Supplies the ordered list of configured package sources
///
/// Implementations are read-only from this crate's point of view; reloading
/// is the host's business.
pub trait PackageSourceProvider: Send + Sync {
    fn load_package_sources(&self) -> Vec<PackageSource>;
}

/// Fixed, in-memory source list
#[derive(Debug, Clone, Default)]
pub struct StaticSourceProvider {
    sources: Vec<PackageSource>,
}

impl StaticSourceProvider {
    pub fn new(sources: Vec<PackageSource>) -> Self {
        Self { sources }
    }
}

impl PackageSourceProvider for StaticSourceProvider {
    fn load_package_sources(&self) -> Vec<PackageSource> {
        self.sources.clone()
    }
}
