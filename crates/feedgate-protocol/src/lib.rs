//! Feedgate Protocol - resource discovery for package sources
//!
//! A source's capabilities are exposed as typed *resources* (version listing,
//! search, the service index, the HTTP transport itself). Resources are
//! built by *providers*, tried in a fixed priority order per resource type,
//! and cached per source by [`SourceRepository`].
//!
//! ## Key Features
//!
//! - **Ordered providers**: `before`/`after` constraints resolved once into a
//!   stable order; cycles are rejected at startup
//! - **Single-flight cache**: concurrent callers share one resolution attempt;
//!   successes and absences are cached, failures stay retryable
//! - **Service index discovery**: v3 providers reuse the cached index and fall
//!   back gracefully when a capability is missing
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use feedgate_core::{CredentialChain, NoCredentials, PackageSource, SourceConfig};
//! use feedgate_protocol::{FindPackageByIdResource, SourceRepository, default_registry};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(SourceConfig::load()?);
//! let credentials = CredentialChain::builder()
//!     .sources(config.clone())
//!     .then(Arc::new(NoCredentials))
//!     .build()?;
//! let registry = Arc::new(default_registry(Arc::new(credentials))?);
//!
//! let source = PackageSource::new("nuget.org", "https://api.nuget.org/v3/index.json")?;
//! let repo = SourceRepository::new(source, registry);
//!
//! let token = CancellationToken::new();
//! if let Some(find) = repo.get_resource::<FindPackageByIdResource>(&token).await? {
//!     let versions = find.get_all_versions("Newtonsoft.Json", &token).await?;
//!     println!("{:?}", versions);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod resource;
pub mod provider;
pub mod registry;
pub mod repository;
pub mod http;
pub mod service_index;
pub mod id_list;
pub mod search;
pub mod find_by_id;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use feedgate_core::CredentialProvider;

// Re-exports for convenience
pub use error::{Result, SourceError};
pub use resource::{AnyResource, Resource, ResourceType, downcast, erase};
pub use provider::{ProviderDescriptor, ResourceProvider, matched, not_matched};
pub use registry::{RegistryBuilder, ResourceProviderRegistry};
pub use repository::{SourceRepository, SourceRepositoryProvider};
pub use http::{HttpSource, HttpSourceResource, HttpSourceResourceProvider, HttpTransport, same_origin};
pub use service_index::{ServiceIndexResource, ServiceIndexResourceProvider, service_types};
pub use id_list::{IdListResource, IdListResourceProvider};
pub use search::{PackageSearchResource, PackageSearchResourceProvider};
pub use find_by_id::{
    FindPackageByIdResource, HttpFileSystemFindPackageByIdProvider,
    LocalFolderFindPackageByIdProvider, RemoteV2FindPackageByIdProvider,
};

/// Registry with every built-in provider
///
/// `credentials` answers authentication challenges from http sources.
pub fn default_registry(credentials: Arc<dyn CredentialProvider>) -> Result<ResourceProviderRegistry> {
    registry_builder(credentials).and_then(RegistryBuilder::build)
}

/// Builder preloaded with every built-in provider, for hosts adding their own
pub fn registry_builder(credentials: Arc<dyn CredentialProvider>) -> Result<RegistryBuilder> {
    Ok(ResourceProviderRegistry::builder()
        .register(Arc::new(HttpSourceResourceProvider::new(credentials)?))
        .register(Arc::new(ServiceIndexResourceProvider::new()))
        .register(Arc::new(IdListResourceProvider::new()))
        .register(Arc::new(PackageSearchResourceProvider::new()))
        .register(Arc::new(LocalFolderFindPackageByIdProvider::new()))
        .register(Arc::new(HttpFileSystemFindPackageByIdProvider::new()))
        .register(Arc::new(RemoteV2FindPackageByIdProvider::new())))
}
