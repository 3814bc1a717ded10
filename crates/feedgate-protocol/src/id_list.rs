//! Package id listing backed by the autocomplete service

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Result;
use crate::http::HttpSourceResource;
use crate::provider::{ProviderDescriptor, ResourceProvider, matched, not_matched};
use crate::repository::SourceRepository;
use crate::resource::{AnyResource, Resource};
use crate::service_index::{discover, service_types};

/// Lists package ids matching a prefix
pub struct IdListResource {
    base: Url,
    http: Arc<HttpSourceResource>,
}

impl Resource for IdListResource {}

impl IdListResource {
    pub fn new(base: Url, http: Arc<HttpSourceResource>) -> Self {
        Self { base, http }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn ids_url(&self, prefix: &str, take: usize) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("q", prefix)
            .append_pair("take", &take.to_string())
            .append_pair("prerelease", "true");
        url
    }

    /// Raw autocomplete payload for `prefix`
    pub async fn fetch(&self, prefix: &str, take: usize, token: &CancellationToken) -> Result<serde_json::Value> {
        self.http.get_json(&self.ids_url(prefix, take), token).await
    }
}

pub struct IdListResourceProvider {
    descriptor: ProviderDescriptor,
}

impl IdListResourceProvider {
    pub const NAME: &'static str = "IdListResourceProvider";

    pub fn new() -> Self {
        Self {
            descriptor: ProviderDescriptor::new::<IdListResource>(Self::NAME),
        }
    }
}

impl Default for IdListResourceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProvider for IdListResourceProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn try_create(
        &self,
        source: &SourceRepository,
        token: &CancellationToken,
    ) -> Result<Option<AnyResource>> {
        match discover(source, service_types::SEARCH_AUTOCOMPLETE_SERVICE, token).await? {
            Some((mut uris, http)) => matched(IdListResource::new(uris.remove(0), http)),
            None => not_matched(),
        }
    }
}
