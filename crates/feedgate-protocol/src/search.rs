//! Package search backed by the search query service

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, SourceError};
use crate::http::HttpSourceResource;
use crate::provider::{ProviderDescriptor, ResourceProvider, matched, not_matched};
use crate::repository::SourceRepository;
use crate::resource::{AnyResource, Resource};
use crate::service_index::{discover, service_types};

/// Search across the endpoints a service index advertises
pub struct PackageSearchResource {
    endpoints: Vec<Url>,
    http: Arc<HttpSourceResource>,
}

impl Resource for PackageSearchResource {}

impl PackageSearchResource {
    pub fn new(endpoints: Vec<Url>, http: Arc<HttpSourceResource>) -> Self {
        Self { endpoints, http }
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    pub fn query_url(endpoint: &Url, term: &str, skip: usize, take: usize, prerelease: bool) -> Url {
        let mut url = endpoint.clone();
        url.query_pairs_mut()
            .append_pair("q", term)
            .append_pair("skip", &skip.to_string())
            .append_pair("take", &take.to_string())
            .append_pair("prerelease", if prerelease { "true" } else { "false" });
        url
    }

    /// Raw search payload
    ///
    /// Endpoints are tried in order; a failure moves on to the next one and
    /// the last error is returned if all fail.
    pub async fn search_raw(
        &self,
        term: &str,
        skip: usize,
        take: usize,
        prerelease: bool,
        token: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            let url = Self::query_url(endpoint, term, skip, take, prerelease);
            match self.http.get_json(&url, token).await {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "search endpoint failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SourceError::Network {
            message: "no search endpoints".to_string(),
        }))
    }
}

pub struct PackageSearchResourceProvider {
    descriptor: ProviderDescriptor,
}

impl PackageSearchResourceProvider {
    pub const NAME: &'static str = "PackageSearchResourceProvider";

    pub fn new() -> Self {
        Self {
            descriptor: ProviderDescriptor::new::<PackageSearchResource>(Self::NAME),
        }
    }
}

impl Default for PackageSearchResourceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProvider for PackageSearchResourceProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn try_create(
        &self,
        source: &SourceRepository,
        token: &CancellationToken,
    ) -> Result<Option<AnyResource>> {
        match discover(source, service_types::SEARCH_QUERY_SERVICE, token).await? {
            Some((endpoints, http)) => matched(PackageSearchResource::new(endpoints, http)),
            None => not_matched(),
        }
    }
}
