//! Service index: the capability document of a v3 feed
//!
//! The document lists base URIs per service type. Other providers consult it
//! to decide whether a source supports their protocol.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, SourceError};
use crate::http::HttpSourceResource;
use crate::provider::{ProviderDescriptor, ResourceProvider, matched, not_matched};
use crate::repository::SourceRepository;
use crate::resource::{AnyResource, Resource};

/// Well-known service types
pub mod service_types {
    pub const PACKAGE_BASE_ADDRESS: &str = "PackageBaseAddress";
    pub const SEARCH_QUERY_SERVICE: &str = "SearchQueryService";
    pub const SEARCH_AUTOCOMPLETE_SERVICE: &str = "SearchAutocompleteService";
    pub const REGISTRATIONS_BASE_URL: &str = "RegistrationsBaseUrl";
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TypeField {
    One(String),
    Many(Vec<String>),
}

impl TypeField {
    fn iter(&self) -> impl Iterator<Item = &str> {
        let slice = match self {
            TypeField::One(single) => std::slice::from_ref(single),
            TypeField::Many(many) => many.as_slice(),
        };
        slice.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceEntry {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type")]
    types: TypeField,
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceIndexDocument {
    version: String,
    #[serde(default)]
    resources: Vec<ServiceEntry>,
}

/// Parsed service index of one source
#[derive(Debug, Clone)]
pub struct ServiceIndexResource {
    version: String,
    entries: Vec<ServiceEntry>,
}

impl Resource for ServiceIndexResource {}

impl ServiceIndexResource {
    /// Parse a service index document fetched from `url`
    pub fn parse(url: &str, bytes: &[u8]) -> Result<Self> {
        let document: ServiceIndexDocument =
            serde_json::from_slice(bytes).map_err(|e| SourceError::InvalidServiceIndex {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let major = document.version.split('.').next().unwrap_or_default();
        if major != "3" {
            return Err(SourceError::InvalidServiceIndex {
                url: url.to_string(),
                message: format!("unsupported version '{}'", document.version),
            });
        }

        Ok(Self {
            version: document.version,
            entries: document.resources,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Base URIs registered for `service_type`, in document order
    ///
    /// Matches the bare type and versioned forms such as
    /// `SearchQueryService/3.0.0-beta`. Entries with an unparsable `@id`
    /// are skipped.
    pub fn service_entry_uris(&self, service_type: &str) -> Vec<Url> {
        let mut uris: Vec<Url> = Vec::new();
        for entry in &self.entries {
            if !entry.types.iter().any(|t| type_matches(t, service_type)) {
                continue;
            }
            match Url::parse(&entry.id) {
                Ok(uri) if !uris.contains(&uri) => uris.push(uri),
                Ok(_) => {}
                Err(e) => tracing::debug!(id = %entry.id, error = %e, "skipping service entry with invalid @id"),
            }
        }
        uris
    }

    pub fn has_service(&self, service_type: &str) -> bool {
        !self.service_entry_uris(service_type).is_empty()
    }
}

fn type_matches(declared: &str, wanted: &str) -> bool {
    match declared.strip_prefix(wanted) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Fetches the service index for sources that point at one
pub struct ServiceIndexResourceProvider {
    descriptor: ProviderDescriptor,
}

impl ServiceIndexResourceProvider {
    pub const NAME: &'static str = "ServiceIndexResourceProvider";

    pub fn new() -> Self {
        Self {
            descriptor: ProviderDescriptor::new::<ServiceIndexResource>(Self::NAME),
        }
    }
}

impl Default for ServiceIndexResourceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProvider for ServiceIndexResourceProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn try_create(
        &self,
        source: &SourceRepository,
        token: &CancellationToken,
    ) -> Result<Option<AnyResource>> {
        let package_source = source.source();
        if !package_source.is_http() {
            return not_matched();
        }

        let url = Url::parse(&package_source.url)?;
        if !url.path().to_ascii_lowercase().ends_with(".json") {
            return not_matched();
        }

        let Some(http) = source.get_resource::<HttpSourceResource>(token).await? else {
            return not_matched();
        };

        let bytes = http.get_bytes(&url, token).await?;
        let index = ServiceIndexResource::parse(url.as_str(), &bytes)?;
        tracing::debug!(
            source = %package_source.url,
            version = index.version(),
            entries = index.entries.len(),
            "loaded service index"
        );
        matched(index)
    }
}

/// Shared step of service-index-driven providers: the base URIs for
/// `service_type`, or `None` when the source has no index or no such entry
pub(crate) async fn discover(
    source: &SourceRepository,
    service_type: &str,
    token: &CancellationToken,
) -> Result<Option<(Vec<Url>, Arc<HttpSourceResource>)>> {
    let Some(index) = source.get_resource::<ServiceIndexResource>(token).await? else {
        return Ok(None);
    };
    let uris = index.service_entry_uris(service_type);
    if uris.is_empty() {
        return Ok(None);
    }
    let Some(http) = source.get_resource::<HttpSourceResource>(token).await? else {
        return Ok(None);
    };
    Ok(Some((uris, http)))
}
