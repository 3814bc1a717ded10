//! Source repository: lazily resolved, cached resources for one source
//!
//! Every resource type has one cache slot per repository:
//!
//! - **resolved**: a resource or a definitive "not supported" answer, never
//!   re-resolved for the lifetime of the repository
//! - **in flight**: a shared future that every concurrent caller awaits, so a
//!   type is resolved by at most one provider walk at a time
//! - **empty**: nothing yet, or the last attempt failed or was cancelled
//!
//! The in-flight future writes its own outcome back into the slot, so the
//! result is recorded even when every caller stopped waiting for it.
//!
//! While a provider waits on another type, the repository records a
//! waits-on edge between the two attempts. Joining an attempt that already
//! waits, directly or transitively, on the joiner is a dependency cycle and
//! fails with a configuration error instead of deadlocking.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use feedgate_core::{NormalizedUri, PackageSource, PackageSourceProvider};

use crate::error::{Result, SourceError};
use crate::registry::ResourceProviderRegistry;
use crate::resource::{AnyResource, Resource, ResourceType, downcast};

type Resolution = std::result::Result<Option<AnyResource>, Arc<SourceError>>;
type InFlight = Shared<BoxFuture<'static, Resolution>>;

enum Slot {
    Resolved(Option<AnyResource>),
    InFlight(InFlight),
}

/// `(waiting, awaited)` pairs between in-flight attempts
type WaitEdges = std::sync::Mutex<Vec<(ResourceType, ResourceType)>>;

struct RepositoryInner {
    source: PackageSource,
    registry: Arc<ResourceProviderRegistry>,
    slots: Mutex<HashMap<ResourceType, Slot>>,
    /// Locked only while `slots` is held, or alone to drop an edge
    waits: WaitEdges,
}

/// Removes its waits-on edge when the wait ends, however it ends
struct WaitGuard {
    inner: Arc<RepositoryInner>,
    edge: (ResourceType, ResourceType),
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        let mut waits = self.inner.waits.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = waits.iter().position(|e| *e == self.edge) {
            waits.swap_remove(pos);
        }
    }
}

/// Resources of one package source
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct SourceRepository {
    inner: Arc<RepositoryInner>,
    /// Types being resolved by the provider walk this handle was given to
    resolving: Arc<Vec<ResourceType>>,
}

impl SourceRepository {
    pub fn new(source: PackageSource, registry: Arc<ResourceProviderRegistry>) -> Self {
        Self {
            inner: Arc::new(RepositoryInner {
                source,
                registry,
                slots: Mutex::new(HashMap::new()),
                waits: std::sync::Mutex::new(Vec::new()),
            }),
            resolving: Arc::new(Vec::new()),
        }
    }

    pub fn source(&self) -> &PackageSource {
        &self.inner.source
    }

    pub fn registry(&self) -> &ResourceProviderRegistry {
        &self.inner.registry
    }

    /// Resource `T` for this source, `None` if no provider supports it
    pub async fn get_resource<T: Resource>(&self, token: &CancellationToken) -> Result<Option<Arc<T>>> {
        let resource_type = ResourceType::of::<T>();
        match self.get_resource_of(resource_type, token).await? {
            Some(resource) => downcast::<T>(resource).map(Some).ok_or_else(|| {
                SourceError::configuration(format!(
                    "cached resource does not match requested type {}",
                    resource_type
                ))
            }),
            None => Ok(None),
        }
    }

    /// Type-erased form of [`get_resource`](Self::get_resource)
    pub async fn get_resource_of(
        &self,
        resource_type: ResourceType,
        token: &CancellationToken,
    ) -> Result<Option<AnyResource>> {
        if self.resolving.contains(&resource_type) {
            let chain: Vec<_> = self.resolving.iter().map(|t| t.name()).collect();
            return Err(SourceError::configuration(format!(
                "{} depends on itself while resolving for {} ({} -> {})",
                resource_type,
                self.inner.source.url,
                chain.join(" -> "),
                resource_type
            )));
        }

        let (in_flight, joined, _wait) = {
            let mut slots = self.inner.slots.lock().await;
            let (in_flight, joined) = match slots.get(&resource_type) {
                Some(Slot::Resolved(resource)) => return Ok(resource.clone()),
                Some(Slot::InFlight(in_flight)) => {
                    if let Some(cycle) = self.waits_on_us(resource_type) {
                        return Err(SourceError::configuration(format!(
                            "{} depends on itself while resolving for {} ({})",
                            resource_type,
                            self.inner.source.url,
                            cycle
                        )));
                    }
                    tracing::trace!(
                        source = %self.inner.source.url,
                        resource_type = resource_type.name(),
                        "joining in-flight resolution"
                    );
                    (in_flight.clone(), true)
                }
                None => {
                    let in_flight = self.clone().resolve(resource_type, token.clone()).boxed().shared();
                    slots.insert(resource_type, Slot::InFlight(in_flight.clone()));
                    (in_flight, false)
                }
            };
            (in_flight, joined, self.record_wait(resource_type))
        };

        // The attempt observes its starter's token. A joiner's token only
        // ends its own wait.
        let outcome = if joined {
            tokio::select! {
                biased;
                outcome = in_flight => outcome,
                _ = token.cancelled() => Err(Arc::new(SourceError::Cancelled)),
            }
        } else {
            in_flight.await
        };

        outcome.map_err(|cause| SourceError::ResourceResolution {
            source_url: self.inner.source.url.clone(),
            resource_type: resource_type.name(),
            cause,
        })
    }

    /// Whether `T` has a settled cache slot (resource or absence)
    pub async fn is_resolved<T: Resource>(&self) -> bool {
        let slots = self.inner.slots.lock().await;
        matches!(slots.get(&ResourceType::of::<T>()), Some(Slot::Resolved(_)))
    }

    /// One resolution attempt; records its outcome in the slot
    async fn resolve(self, resource_type: ResourceType, token: CancellationToken) -> Resolution {
        let outcome = self.walk_providers(resource_type, &token).await;

        let mut slots = self.inner.slots.lock().await;
        match &outcome {
            Ok(resource) => {
                slots.insert(resource_type, Slot::Resolved(resource.clone()));
            }
            Err(_) => {
                slots.remove(&resource_type);
            }
        }

        outcome.map_err(Arc::new)
    }

    async fn walk_providers(
        &self,
        resource_type: ResourceType,
        token: &CancellationToken,
    ) -> Result<Option<AnyResource>> {
        let scope = self.nested(resource_type);

        for provider in self.inner.registry.resolve_order(resource_type) {
            let name = provider.descriptor().name();
            if token.is_cancelled() {
                return Err(SourceError::Cancelled);
            }

            tracing::trace!(
                source = %self.inner.source.url,
                resource_type = resource_type.name(),
                provider = name,
                "trying provider"
            );

            let created = tokio::select! {
                biased;
                _ = token.cancelled() => Err(SourceError::Cancelled),
                created = provider.try_create(&scope, token) => created,
            };

            match created {
                Ok(Some(resource)) => {
                    if !resource_type.is_instance(&resource) {
                        return Err(SourceError::configuration(format!(
                            "provider '{}' declared {} but produced a different type",
                            name, resource_type
                        )));
                    }
                    tracing::debug!(
                        source = %self.inner.source.url,
                        resource_type = resource_type.name(),
                        provider = name,
                        "resource resolved"
                    );
                    return Ok(Some(resource));
                }
                Ok(None) => continue,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        source = %self.inner.source.url,
                        resource_type = resource_type.name(),
                        provider = name,
                        error = %e,
                        "resource provider failed"
                    );
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            source = %self.inner.source.url,
            resource_type = resource_type.name(),
            "no provider supports this source"
        );
        Ok(None)
    }

    /// Whether the in-flight attempt for `awaited` transitively waits on an
    /// attempt this handle is part of; returns the cycle for the error
    ///
    /// Called with `slots` held so edges cannot change underneath.
    fn waits_on_us(&self, awaited: ResourceType) -> Option<String> {
        let waits = self.inner.waits.lock().unwrap_or_else(PoisonError::into_inner);

        let mut path = vec![awaited];
        let mut stack = vec![(awaited, 0usize)];
        while let Some((at, depth)) = stack.pop() {
            path.truncate(depth);
            path.push(at);
            if self.resolving.contains(&at) {
                let mut cycle: Vec<_> = self.resolving.iter().map(|t| t.name()).collect();
                let start = self.resolving.iter().position(|t| *t == at).unwrap_or(0);
                cycle.drain(..start);
                cycle.extend(path.iter().map(|t| t.name()));
                return Some(cycle.join(" -> "));
            }
            // edges form no cycle, so the walk terminates
            for (_, next) in waits.iter().filter(|(from, _)| *from == at) {
                stack.push((*next, depth + 1));
            }
        }
        None
    }

    /// Record that the attempt owning this handle now waits on `awaited`
    fn record_wait(&self, awaited: ResourceType) -> Option<WaitGuard> {
        let waiting = *self.resolving.last()?;
        let edge = (waiting, awaited);
        self.inner
            .waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(edge);
        Some(WaitGuard {
            inner: self.inner.clone(),
            edge,
        })
    }

    /// Handle passed to providers while `resource_type` is being resolved
    fn nested(&self, resource_type: ResourceType) -> SourceRepository {
        let mut resolving = Vec::with_capacity(self.resolving.len() + 1);
        resolving.extend(self.resolving.iter().copied());
        resolving.push(resource_type);

        SourceRepository {
            inner: self.inner.clone(),
            resolving: Arc::new(resolving),
        }
    }
}

impl fmt::Debug for SourceRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRepository")
            .field("source", &self.inner.source)
            .field("resolving", &self.resolving)
            .finish()
    }
}

/// Creates one repository per source and hands out the same one afterwards
pub struct SourceRepositoryProvider {
    registry: Arc<ResourceProviderRegistry>,
    sources: Arc<dyn PackageSourceProvider>,
    repositories: Mutex<HashMap<String, SourceRepository>>,
}

impl SourceRepositoryProvider {
    pub fn new(registry: Arc<ResourceProviderRegistry>, sources: Arc<dyn PackageSourceProvider>) -> Self {
        Self {
            registry,
            sources,
            repositories: Mutex::new(HashMap::new()),
        }
    }

    /// Repository for `source`, shared by every source with the same identity
    pub async fn create_repository(&self, source: PackageSource) -> SourceRepository {
        let key = source
            .normalized_url()
            .as_ref()
            .map(NormalizedUri::to_string)
            .unwrap_or_else(|| source.url.clone());

        let mut repositories = self.repositories.lock().await;
        repositories
            .entry(key)
            .or_insert_with(|| SourceRepository::new(source, self.registry.clone()))
            .clone()
    }

    /// Repositories for every configured source, in source-list order
    pub async fn get_repositories(&self) -> Vec<SourceRepository> {
        let mut repositories = Vec::new();
        for source in self.sources.load_package_sources() {
            repositories.push(self.create_repository(source).await);
        }
        repositories
    }
}
