//! HTTP transport for package sources
//!
//! Key behaviors:
//! - Credentials are asked from the credential provider on 401/407 and then
//!   sent preemptively on later requests to the same source
//! - A 401 after sending credentials re-asks with `retrying = true`
//! - NEVER sends source credentials after a cross-origin redirect

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, LOCATION, PROXY_AUTHORIZATION, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use url::Url;

use feedgate_core::{CredentialProvider, CredentialType, Credentials};

use crate::error::{Result, SourceError};
use crate::provider::{ProviderDescriptor, ResourceProvider, matched, not_matched};
use crate::repository::SourceRepository;
use crate::resource::{AnyResource, Resource};

const MAX_REDIRECTS: u32 = 10;
const MAX_AUTH_ATTEMPTS: u32 = 3;

/// Performs GET requests on behalf of resources
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get_bytes(&self, url: &Url, token: &CancellationToken) -> Result<Vec<u8>>;
}

/// Check if two URLs are same-origin (for redirect safety)
pub fn same_origin(left: &Url, right: &Url) -> bool {
    left.scheme() == right.scheme()
        && left.host() == right.host()
        && left.port_or_known_default() == right.port_or_known_default()
}

/// reqwest-backed transport for one package source
pub struct HttpSource {
    source_url: Url,
    client: reqwest::Client,
    credential_provider: Arc<dyn CredentialProvider>,
    proxy: Option<Url>,
    /// Last credentials the source accepted
    credentials: RwLock<Option<Credentials>>,
    proxy_credentials: RwLock<Option<Credentials>>,
}

impl HttpSource {
    pub fn new(
        source_url: Url,
        client: reqwest::Client,
        credential_provider: Arc<dyn CredentialProvider>,
        proxy: Option<Url>,
    ) -> Self {
        Self {
            source_url,
            client,
            credential_provider,
            proxy,
            credentials: RwLock::new(None),
            proxy_credentials: RwLock::new(None),
        }
    }

    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    /// Build the client shared by every source
    ///
    /// Automatic redirects are disabled; they are followed manually so that
    /// credentials never leak to another origin.
    pub fn build_client(proxy: Option<&Url>) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(100));

        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }

        builder.build().map_err(|e| SourceError::Network {
            message: e.to_string(),
        })
    }

    /// GET `url`, handling redirects and authentication challenges
    pub async fn get(&self, url: &Url, token: &CancellationToken) -> Result<reqwest::Response> {
        let mut current = url.clone();
        let mut redirects = 0;
        let mut auth_attempts = 0;
        let mut proxy_attempts = 0;

        loop {
            let mut request = self.client.get(current.clone());

            // What this request carries; a challenge rejects exactly these.
            let sent = if same_origin(&self.source_url, &current) {
                self.credentials.read().await.clone()
            } else {
                if self.credentials.read().await.is_some() {
                    tracing::warn!(
                        "Request to {} leaves the origin of {} - credentials not forwarded",
                        current,
                        self.source_url
                    );
                }
                None
            };
            if let Some(creds) = &sent {
                request = request.header(AUTHORIZATION, creds.auth_header());
            }
            let sent_proxy = self.proxy_credentials.read().await.clone();
            if let Some(creds) = &sent_proxy {
                request = request.header(PROXY_AUTHORIZATION, creds.auth_header());
            }

            let response = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(SourceError::Cancelled),
                response = request.send() => response?,
            };
            let status = response.status();

            if status.is_redirection() {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(SourceError::Network {
                        message: format!("Too many redirects (max {})", MAX_REDIRECTS),
                    });
                }

                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| SourceError::Network {
                        message: "Redirect without Location header".to_string(),
                    })?;

                current = current.join(location)?;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                if !same_origin(&self.source_url, &current) {
                    return Err(SourceError::AuthRequired {
                        url: current.to_string(),
                    });
                }
                auth_attempts += 1;
                if auth_attempts > MAX_AUTH_ATTEMPTS
                    || !self
                        .refresh_credentials(CredentialType::RequestCredentials, sent)
                        .await
                {
                    return Err(SourceError::AuthRequired {
                        url: current.to_string(),
                    });
                }
                continue;
            }

            if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
                proxy_attempts += 1;
                if proxy_attempts > MAX_AUTH_ATTEMPTS
                    || !self
                        .refresh_credentials(CredentialType::ProxyCredentials, sent_proxy)
                        .await
                {
                    return Err(SourceError::ProxyAuthRequired {
                        url: current.to_string(),
                    });
                }
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);

                return Err(SourceError::RateLimited { retry_after });
            }

            if !status.is_success() {
                return Err(SourceError::Http {
                    status: status.as_u16(),
                    message: format!("Request to {} failed", current),
                });
            }

            return Ok(response);
        }
    }

    /// Ask the credential provider again after a challenge rejected `sent`
    ///
    /// Returns false when the provider has nothing (more) to offer. If another
    /// request already replaced the rejected credentials, those are retried
    /// without asking the provider.
    async fn refresh_credentials(&self, credential_type: CredentialType, sent: Option<Credentials>) -> bool {
        let slot = match credential_type {
            CredentialType::RequestCredentials => &self.credentials,
            CredentialType::ProxyCredentials => &self.proxy_credentials,
        };

        let mut current = slot.write().await;
        if current.is_some() && *current != sent {
            return true;
        }

        let fresh = self.credential_provider.get_credentials(
            &self.source_url,
            self.proxy.as_ref(),
            credential_type,
            sent.is_some(),
        );

        match fresh {
            Some(creds) if sent.as_ref() != Some(&creds) => {
                *current = Some(creds);
                true
            }
            Some(_) => {
                tracing::debug!(source = %self.source_url, "credential provider returned rejected credentials again");
                *current = None;
                false
            }
            None => {
                *current = None;
                false
            }
        }
    }
}

#[async_trait]
impl HttpTransport for HttpSource {
    async fn get_bytes(&self, url: &Url, token: &CancellationToken) -> Result<Vec<u8>> {
        let response = self.get(url, token).await?;
        let bytes = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SourceError::Cancelled),
            bytes = response.bytes() => bytes.map_err(|e| SourceError::Network {
                message: e.to_string(),
            })?,
        };
        Ok(bytes.to_vec())
    }
}

/// Transport bound to one source
pub struct HttpSourceResource {
    transport: Arc<dyn HttpTransport>,
}

impl Resource for HttpSourceResource {}

impl HttpSourceResource {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub async fn get_bytes(&self, url: &Url, token: &CancellationToken) -> Result<Vec<u8>> {
        self.transport.get_bytes(url, token).await
    }

    /// GET `url` and deserialize the JSON payload
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url, token: &CancellationToken) -> Result<T> {
        let bytes = self.get_bytes(url, token).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Produces an [`HttpSourceResource`] for http(s) sources
pub struct HttpSourceResourceProvider {
    descriptor: ProviderDescriptor,
    client: reqwest::Client,
    credential_provider: Arc<dyn CredentialProvider>,
    proxy: Option<Url>,
}

impl HttpSourceResourceProvider {
    pub const NAME: &'static str = "HttpSourceResourceProvider";

    pub fn new(credential_provider: Arc<dyn CredentialProvider>) -> Result<Self> {
        Self::with_proxy(credential_provider, None)
    }

    pub fn with_proxy(credential_provider: Arc<dyn CredentialProvider>, proxy: Option<Url>) -> Result<Self> {
        Ok(Self {
            descriptor: ProviderDescriptor::new::<HttpSourceResource>(Self::NAME),
            client: HttpSource::build_client(proxy.as_ref())?,
            credential_provider,
            proxy,
        })
    }
}

#[async_trait]
impl ResourceProvider for HttpSourceResourceProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn try_create(
        &self,
        source: &SourceRepository,
        _token: &CancellationToken,
    ) -> Result<Option<AnyResource>> {
        let package_source = source.source();
        if !package_source.is_http() {
            return not_matched();
        }

        let source_url = Url::parse(&package_source.url).map_err(|e| SourceError::InvalidUrl {
            url: package_source.url.clone(),
            reason: e.to_string(),
        })?;

        let http = HttpSource::new(
            source_url,
            self.client.clone(),
            self.credential_provider.clone(),
            self.proxy.clone(),
        );
        matched(HttpSourceResource::new(Arc::new(http)))
    }
}
