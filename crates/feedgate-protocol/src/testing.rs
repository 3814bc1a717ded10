//! Stub providers and transports for unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, SourceError};
use crate::http::HttpTransport;
use crate::provider::{ProviderDescriptor, ResourceProvider, matched};
use crate::repository::SourceRepository;
use crate::resource::{AnyResource, Resource, erase};

/// Resource used by stub providers, tagged with the provider that built it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing(pub String);
impl Resource for Listing {}

/// Second resource type for cross-type tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog(pub String);
impl Resource for Catalog {}

type Behavior = Box<dyn Fn(usize) -> Result<Option<AnyResource>> + Send + Sync>;

/// Provider with scripted outcomes that counts its invocations
pub struct StubProvider {
    descriptor: ProviderDescriptor,
    calls: AtomicUsize,
    delay: Option<Duration>,
    behavior: Behavior,
}

impl StubProvider {
    pub fn new(descriptor: ProviderDescriptor, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            calls: AtomicUsize::new(0),
            delay: None,
            behavior,
        })
    }

    /// Always matches with a `Listing` named after the provider
    pub fn listing(name: &str) -> Arc<Self> {
        let tag = name.to_string();
        Self::new(
            ProviderDescriptor::new::<Listing>(name),
            Box::new(move |_| matched(Listing(tag.clone()))),
        )
    }

    pub fn not_matching(name: &str) -> Arc<Self> {
        Self::new(ProviderDescriptor::new::<Listing>(name), Box::new(|_| Ok(None)))
    }

    /// Fails with a network error on the first call, matches afterwards
    pub fn flaky(name: &str) -> Arc<Self> {
        let tag = name.to_string();
        Self::new(
            ProviderDescriptor::new::<Listing>(name),
            Box::new(move |call| {
                if call == 0 {
                    Err(SourceError::Network {
                        message: "connection reset".to_string(),
                    })
                } else {
                    matched(Listing(tag.clone()))
                }
            }),
        )
    }

    pub fn slow(descriptor: ProviderDescriptor, delay: Duration, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            calls: AtomicUsize::new(0),
            delay: Some(delay),
            behavior,
        })
    }

    pub fn slow_listing(name: &str, delay: Duration) -> Arc<Self> {
        let tag = name.to_string();
        Arc::new(Self {
            descriptor: ProviderDescriptor::new::<Listing>(name),
            calls: AtomicUsize::new(0),
            delay: Some(delay),
            behavior: Box::new(move |_| matched(Listing(tag.clone()))),
        })
    }

    pub fn slow_failing(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ProviderDescriptor::new::<Listing>(name),
            calls: AtomicUsize::new(0),
            delay: Some(delay),
            behavior: Box::new(|_| {
                Err(SourceError::Http {
                    status: 503,
                    message: "unavailable".to_string(),
                })
            }),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceProvider for StubProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn try_create(
        &self,
        _source: &SourceRepository,
        _token: &CancellationToken,
    ) -> Result<Option<AnyResource>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.behavior)(call)
    }
}

/// Provider of `T` that first resolves `D` from the same repository
pub struct DependentProvider<T, D> {
    descriptor: ProviderDescriptor,
    delay: Option<Duration>,
    build: fn(Option<Arc<D>>) -> T,
    _marker: PhantomData<fn() -> D>,
}

impl<T: Resource, D: Resource> DependentProvider<T, D> {
    pub fn new(name: &str, build: fn(Option<Arc<D>>) -> T) -> Arc<Self> {
        Self::slow(name, Duration::ZERO, build)
    }

    /// Sleeps before asking for `D`, so concurrent callers overlap
    pub fn slow(name: &str, delay: Duration, build: fn(Option<Arc<D>>) -> T) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ProviderDescriptor::new::<T>(name),
            delay: (!delay.is_zero()).then_some(delay),
            build,
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<T: Resource, D: Resource> ResourceProvider for DependentProvider<T, D> {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn try_create(
        &self,
        source: &SourceRepository,
        token: &CancellationToken,
    ) -> Result<Option<AnyResource>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let dependency = source.get_resource::<D>(token).await?;
        Ok(Some(erase((self.build)(dependency))))
    }
}

/// In-memory transport keyed by URL, recording every request
#[derive(Default)]
pub struct StubTransport {
    responses: HashMap<String, std::result::Result<Vec<u8>, u16>>,
    requests: Mutex<Vec<String>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(url.to_string(), Ok(body.into()));
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(url.to_string(), Err(status));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn get_bytes(&self, url: &Url, _token: &CancellationToken) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.responses.get(url.as_str()) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(status)) => Err(SourceError::Http {
                status: *status,
                message: format!("Request to {} failed", url),
            }),
            None => Err(SourceError::Http {
                status: 404,
                message: format!("Request to {} failed", url),
            }),
        }
    }
}
