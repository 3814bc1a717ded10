//! Resource provider trait and descriptor
//!
//! A provider knows how to build one resource type for a source, if the
//! source supports it. Providers are stateless with respect to sources and
//! shared across every repository; per-source state lives in the repository
//! cache.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::repository::SourceRepository;
use crate::resource::{AnyResource, Resource, ResourceType, erase};

/// Name, produced type and ordering constraints of a provider
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    resource_type: ResourceType,
    name: String,
    before: Vec<String>,
    after: Vec<String>,
}

impl ProviderDescriptor {
    /// Descriptor for a provider of `T`
    pub fn new<T: Resource>(name: impl Into<String>) -> Self {
        Self {
            resource_type: ResourceType::of::<T>(),
            name: name.into(),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Run this provider before the named one
    pub fn before(mut self, name: impl Into<String>) -> Self {
        self.before.push(name.into());
        self
    }

    /// Run this provider after the named one
    pub fn after(mut self, name: impl Into<String>) -> Self {
        self.after.push(name.into());
        self
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn before_names(&self) -> &[String] {
        &self.before
    }

    pub fn after_names(&self) -> &[String] {
        &self.after
    }
}

/// Builds one resource type for a source
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Try to create the resource for `source`
    ///
    /// `Ok(None)` means the source lacks this capability and the next
    /// provider should be tried. Errors abort the whole resolution attempt.
    async fn try_create(
        &self,
        source: &SourceRepository,
        token: &CancellationToken,
    ) -> Result<Option<AnyResource>>;
}

/// Successful `try_create` outcome
pub fn matched<T: Resource>(resource: T) -> Result<Option<AnyResource>> {
    Ok(Some(erase(resource)))
}

/// `try_create` outcome for a source without the capability
pub fn not_matched() -> Result<Option<AnyResource>> {
    Ok(None)
}
