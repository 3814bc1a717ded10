//! Credential providers for package sources
//!
//! Credentials are produced by an ordered [`CredentialChain`]. The first link
//! is normally a [`SettingsCredentialProvider`] answering from the credentials
//! stored next to each package source; later links (interactive prompts,
//! plugins, keychains) are only asked when the stored ones don't apply.
//!
//! The transport calls [`CredentialProvider::get_credentials`] on every
//! authentication challenge. When credentials it already sent were rejected it
//! calls again with `retrying = true`; stored credentials are never returned
//! on that path.

use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::error::{CoreError, Result};
use crate::source::{PackageSource, PackageSourceProvider};
use crate::uri::NormalizedUri;

/// Username and secret pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `Authorization` header value for basic auth
    pub fn auth_header(&self) -> String {
        let encoded = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            format!("{}:{}", self.username, self.password),
        );
        format!("Basic {}", encoded)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What the credentials are for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialType {
    /// Credentials for the feed itself
    RequestCredentials,
    /// Credentials for an authenticating proxy
    ProxyCredentials,
}

/// Something that can produce credentials for a URI
pub trait CredentialProvider: Send + Sync {
    /// Credentials for `uri`, or `None` when this provider has nothing to offer
    fn get_credentials(
        &self,
        uri: &Url,
        proxy: Option<&Url>,
        credential_type: CredentialType,
        retrying: bool,
    ) -> Option<Credentials>;
}

/// Provider that never has credentials (anonymous access only)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn get_credentials(
        &self,
        _uri: &Url,
        _proxy: Option<&Url>,
        _credential_type: CredentialType,
        _retrying: bool,
    ) -> Option<Credentials> {
        None
    }
}

/// Host-supplied message templates
///
/// Templates are interpolated with the username only, through the
/// `{username}` placeholder.
#[derive(Debug, Clone)]
pub struct CredentialMessages {
    pub using_saved_credentials: String,
}

impl Default for CredentialMessages {
    fn default() -> Self {
        Self {
            using_saved_credentials: "Using saved credentials for user '{username}'".to_string(),
        }
    }
}

impl CredentialMessages {
    pub fn using_saved_credentials(&self, username: &str) -> String {
        self.using_saved_credentials.replace("{username}", username)
    }
}

/// Stored credential for one source
#[derive(Clone)]
pub struct CredentialEntry {
    pub uri: NormalizedUri,
    pub credentials: Credentials,
}

impl fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("uri", &self.uri.to_string())
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Credentials taken from the source list, keyed by normalized URI
///
/// Only sources with both a non-empty username and secret are kept. Order is
/// preserved; when several sources normalize to the same URI the first one
/// wins.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    entries: Vec<CredentialEntry>,
}

impl CredentialStore {
    pub fn from_sources(sources: &[PackageSource]) -> Self {
        let entries = sources
            .iter()
            .filter(|source| source.has_credentials())
            .filter_map(|source| {
                let uri = source.normalized_url()?;
                let username = source.username.clone()?;
                let password = source.password.clone()?;
                Some(CredentialEntry {
                    uri,
                    credentials: Credentials::new(username, password),
                })
            })
            .collect();

        Self { entries }
    }

    /// First stored credential whose source matches `uri`
    pub fn find(&self, uri: &Url) -> Option<&Credentials> {
        let wanted = NormalizedUri::from_url(uri);
        self.entries
            .iter()
            .find(|entry| entry.uri == wanted)
            .map(|entry| &entry.credentials)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Answers from credentials stored alongside the configured package sources
///
/// Works on a snapshot of the source list taken at construction.
#[derive(Debug, Clone)]
pub struct SettingsCredentialProvider {
    store: CredentialStore,
    messages: CredentialMessages,
}

impl SettingsCredentialProvider {
    pub fn new(sources: &dyn PackageSourceProvider) -> Self {
        Self::with_messages(sources, CredentialMessages::default())
    }

    pub fn with_messages(sources: &dyn PackageSourceProvider, messages: CredentialMessages) -> Self {
        Self {
            store: CredentialStore::from_sources(&sources.load_package_sources()),
            messages,
        }
    }
}

impl CredentialProvider for SettingsCredentialProvider {
    fn get_credentials(
        &self,
        uri: &Url,
        _proxy: Option<&Url>,
        credential_type: CredentialType,
        retrying: bool,
    ) -> Option<Credentials> {
        // A retry means the stored credentials were already rejected.
        if retrying || credential_type != CredentialType::RequestCredentials {
            return None;
        }

        let credentials = self.store.find(uri)?;
        tracing::info!(
            username = %credentials.username,
            "{}",
            self.messages.using_saved_credentials(&credentials.username)
        );
        Some(credentials.clone())
    }
}

/// Ordered list of credential providers, first answer wins
#[derive(Clone)]
pub struct CredentialChain {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl CredentialChain {
    pub fn builder() -> CredentialChainBuilder {
        CredentialChainBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for CredentialChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialChain")
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl CredentialProvider for CredentialChain {
    fn get_credentials(
        &self,
        uri: &Url,
        proxy: Option<&Url>,
        credential_type: CredentialType,
        retrying: bool,
    ) -> Option<Credentials> {
        self.providers
            .iter()
            .find_map(|provider| provider.get_credentials(uri, proxy, credential_type, retrying))
    }
}

/// Builder for a settings-first [`CredentialChain`]
#[derive(Default)]
pub struct CredentialChainBuilder {
    sources: Option<Arc<dyn PackageSourceProvider>>,
    messages: CredentialMessages,
    inner: Vec<Arc<dyn CredentialProvider>>,
}

impl CredentialChainBuilder {
    /// Source list the settings provider reads stored credentials from
    pub fn sources(mut self, sources: Arc<dyn PackageSourceProvider>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn messages(mut self, messages: CredentialMessages) -> Self {
        self.messages = messages;
        self
    }

    /// Append a provider consulted after the settings provider
    pub fn then(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.inner.push(provider);
        self
    }

    pub fn build(self) -> Result<CredentialChain> {
        let sources = self
            .sources
            .ok_or_else(|| CoreError::configuration("credential chain requires a package source provider"))?;

        if self.inner.is_empty() {
            return Err(CoreError::configuration(
                "credential chain requires at least one inner credential provider",
            ));
        }

        let settings = SettingsCredentialProvider::with_messages(sources.as_ref(), self.messages);
        let mut providers: Vec<Arc<dyn CredentialProvider>> = Vec::with_capacity(self.inner.len() + 1);
        providers.push(Arc::new(settings));
        providers.extend(self.inner);

        Ok(CredentialChain { providers })
    }
}
