//! Version listing and download of a single package id
//!
//! Three providers compete for this resource, tried in this order:
//!
//! - local folders (`{root}/{id}/{version}/{id}.{version}.nupkg`)
//! - flat containers advertised by the service index
//! - legacy OData feeds, for any http source that is not a service index

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, SourceError};
use crate::http::HttpSourceResource;
use crate::id_list::IdListResource;
use crate::provider::{ProviderDescriptor, ResourceProvider, matched, not_matched};
use crate::repository::SourceRepository;
use crate::resource::{AnyResource, Resource};
use crate::service_index::{discover, service_types};

#[derive(Debug, Deserialize)]
struct VersionList {
    versions: Vec<String>,
}

/// Lists and downloads versions of one package id
pub enum FindPackageByIdResource {
    /// v3 flat container, one or more mirrored base addresses
    FlatContainer {
        base_addresses: Vec<Url>,
        http: Arc<HttpSourceResource>,
        id_list: Option<Arc<IdListResource>>,
    },
    /// Legacy v2 feed
    ODataFeed {
        feed_url: Url,
        http: Arc<HttpSourceResource>,
    },
    LocalFolder { root: PathBuf },
}

impl Resource for FindPackageByIdResource {}

impl FindPackageByIdResource {
    pub fn kind(&self) -> &'static str {
        match self {
            FindPackageByIdResource::FlatContainer { .. } => "flat-container",
            FindPackageByIdResource::ODataFeed { .. } => "odata",
            FindPackageByIdResource::LocalFolder { .. } => "local",
        }
    }

    /// Location of the package archive
    ///
    /// Flat containers use the first base address; ids and versions are
    /// lowercased there and in local folders.
    pub fn package_url(&self, id: &str, version: &str) -> Result<Url> {
        check_segment(id)?;
        check_segment(version)?;
        match self {
            FindPackageByIdResource::FlatContainer { base_addresses, .. } => {
                let base = base_addresses.first().ok_or_else(|| {
                    SourceError::configuration("flat container without base address")
                })?;
                flat_container_package_url(base, id, version)
            }
            FindPackageByIdResource::ODataFeed { feed_url, .. } => {
                append_segments(feed_url, &["package", id, version])
            }
            FindPackageByIdResource::LocalFolder { root } => {
                let path = local_package_path(root, id, version);
                Url::from_file_path(&path).map_err(|_| SourceError::InvalidUrl {
                    url: path.display().to_string(),
                    reason: "not an absolute path".to_string(),
                })
            }
        }
    }

    /// All published versions of `id`; unknown ids yield an empty list
    pub async fn get_all_versions(&self, id: &str, token: &CancellationToken) -> Result<Vec<String>> {
        check_segment(id)?;
        match self {
            FindPackageByIdResource::FlatContainer {
                base_addresses, http, ..
            } => {
                let mut last_error = None;
                for base in base_addresses {
                    let url = append_segments(base, &[&id.to_lowercase(), "index.json"])?;
                    match http.get_json::<VersionList>(&url, token).await {
                        Ok(list) => return Ok(list.versions),
                        Err(SourceError::Http { status: 404, .. }) => return Ok(Vec::new()),
                        Err(e) if e.is_cancelled() => return Err(e),
                        Err(e) => {
                            tracing::warn!(base = %base, error = %e, "flat container request failed");
                            last_error = Some(e);
                        }
                    }
                }
                Err(last_error.unwrap_or_else(|| {
                    SourceError::configuration("flat container without base address")
                }))
            }
            FindPackageByIdResource::ODataFeed { feed_url, .. } => Err(SourceError::Unsupported {
                operation: "version listing",
                source_url: feed_url.to_string(),
            }),
            FindPackageByIdResource::LocalFolder { root } => local_versions(root, id).await,
        }
    }

    /// Package archive bytes
    pub async fn download_package(&self, id: &str, version: &str, token: &CancellationToken) -> Result<Vec<u8>> {
        match self {
            FindPackageByIdResource::FlatContainer { http, .. }
            | FindPackageByIdResource::ODataFeed { http, .. } => {
                let url = self.package_url(id, version)?;
                tracing::debug!(url = %url, "downloading package");
                http.get_bytes(&url, token).await
            }
            FindPackageByIdResource::LocalFolder { root } => {
                check_segment(id)?;
                check_segment(version)?;
                Ok(tokio::fs::read(local_package_path(root, id, version)).await?)
            }
        }
    }

    /// Raw id listing for `prefix`, when the source offers one
    pub async fn search_ids(&self, prefix: &str, take: usize, token: &CancellationToken) -> Result<serde_json::Value> {
        match self {
            FindPackageByIdResource::FlatContainer {
                id_list: Some(id_list),
                ..
            } => id_list.fetch(prefix, take, token).await,
            _ => Err(SourceError::Unsupported {
                operation: "id listing",
                source_url: self.location(),
            }),
        }
    }

    fn location(&self) -> String {
        match self {
            FindPackageByIdResource::FlatContainer { base_addresses, .. } => base_addresses
                .first()
                .map(Url::to_string)
                .unwrap_or_default(),
            FindPackageByIdResource::ODataFeed { feed_url, .. } => feed_url.to_string(),
            FindPackageByIdResource::LocalFolder { root } => root.display().to_string(),
        }
    }
}

/// Reject ids and versions that would leave the feed root or alter the URL
fn check_segment(value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        "empty"
    } else if value.contains("..") {
        "contains '..'"
    } else if value
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_control())
    {
        "contains a reserved character"
    } else {
        return Ok(());
    };

    Err(SourceError::InvalidPackage {
        value: value.to_string(),
        reason,
    })
}

/// `base` with `segments` appended as percent-encoded path segments
fn append_segments(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SourceError::InvalidUrl {
            url: base.to_string(),
            reason: "cannot be a base URL".to_string(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn flat_container_package_url(base: &Url, id: &str, version: &str) -> Result<Url> {
    let id = id.to_lowercase();
    let version = version.to_lowercase();
    let file = format!("{}.{}.nupkg", id, version);
    append_segments(base, &[&id, &version, &file])
}

fn local_package_path(root: &Path, id: &str, version: &str) -> PathBuf {
    let id = id.to_lowercase();
    let version = version.to_lowercase();
    root.join(&id)
        .join(&version)
        .join(format!("{}.{}.nupkg", id, version))
}

async fn local_versions(root: &Path, id: &str) -> Result<Vec<String>> {
    let id = id.to_lowercase();
    let dir = root.join(&id);

    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut versions = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let version = entry.file_name().to_string_lossy().into_owned();
        let archive = entry.path().join(format!("{}.{}.nupkg", id, version));
        if tokio::fs::try_exists(&archive).await? {
            versions.push(version);
        }
    }
    versions.sort();
    Ok(versions)
}

/// Serves local folder sources
pub struct LocalFolderFindPackageByIdProvider {
    descriptor: ProviderDescriptor,
}

impl LocalFolderFindPackageByIdProvider {
    pub const NAME: &'static str = "LocalFolderFindPackageByIdProvider";

    pub fn new() -> Self {
        Self {
            descriptor: ProviderDescriptor::new::<FindPackageByIdResource>(Self::NAME)
                .before(HttpFileSystemFindPackageByIdProvider::NAME),
        }
    }
}

impl Default for LocalFolderFindPackageByIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProvider for LocalFolderFindPackageByIdProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn try_create(
        &self,
        source: &SourceRepository,
        _token: &CancellationToken,
    ) -> Result<Option<AnyResource>> {
        match source.source().local_path() {
            Some(root) => matched(FindPackageByIdResource::LocalFolder { root }),
            None => not_matched(),
        }
    }
}

/// Flat container discovered through the service index
pub struct HttpFileSystemFindPackageByIdProvider {
    descriptor: ProviderDescriptor,
}

impl HttpFileSystemFindPackageByIdProvider {
    pub const NAME: &'static str = "HttpFileSystemFindPackageByIdProvider";

    pub fn new() -> Self {
        Self {
            descriptor: ProviderDescriptor::new::<FindPackageByIdResource>(Self::NAME)
                .before(RemoteV2FindPackageByIdProvider::NAME),
        }
    }
}

impl Default for HttpFileSystemFindPackageByIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProvider for HttpFileSystemFindPackageByIdProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn try_create(
        &self,
        source: &SourceRepository,
        token: &CancellationToken,
    ) -> Result<Option<AnyResource>> {
        let Some((base_addresses, http)) =
            discover(source, service_types::PACKAGE_BASE_ADDRESS, token).await?
        else {
            return not_matched();
        };
        let id_list = source.get_resource::<IdListResource>(token).await?;

        matched(FindPackageByIdResource::FlatContainer {
            base_addresses,
            http,
            id_list,
        })
    }
}

/// Fallback for http sources that are not service indexes
pub struct RemoteV2FindPackageByIdProvider {
    descriptor: ProviderDescriptor,
}

impl RemoteV2FindPackageByIdProvider {
    pub const NAME: &'static str = "RemoteV2FindPackageByIdProvider";

    pub fn new() -> Self {
        Self {
            descriptor: ProviderDescriptor::new::<FindPackageByIdResource>(Self::NAME),
        }
    }
}

impl Default for RemoteV2FindPackageByIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProvider for RemoteV2FindPackageByIdProvider {
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
        let feed_url = Url::parse(&package_source.url)?;
        if feed_url.path().to_ascii_lowercase().ends_with(".json") {
            return not_matched();
        }
        let Some(http) = source.get_resource::<HttpSourceResource>(token).await? else {
            return not_matched();
        };

        matched(FindPackageByIdResource::ODataFeed { feed_url, http })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id_list::IdListResourceProvider;
    use crate::registry::ResourceProviderRegistry;
    use crate::service_index::ServiceIndexResourceProvider;
    use crate::service_index::tests::{INDEX, StubHttpProvider};
    use crate::testing::StubTransport;
    use feedgate_core::PackageSource;

    fn registry(transport: Arc<StubTransport>) -> Arc<ResourceProviderRegistry> {
        // registered in reverse priority; ordering comes from the constraints
        let registry = ResourceProviderRegistry::builder()
            .register(Arc::new(RemoteV2FindPackageByIdProvider::new()))
            .register(Arc::new(HttpFileSystemFindPackageByIdProvider::new()))
            .register(Arc::new(LocalFolderFindPackageByIdProvider::new()))
            .register(StubHttpProvider::new(transport))
            .register(Arc::new(ServiceIndexResourceProvider::new()))
            .register(Arc::new(IdListResourceProvider::new()))
            .build()
            .unwrap();
        Arc::new(registry)
    }

    async fn resolve(url: &str, transport: Arc<StubTransport>) -> Result<Option<Arc<FindPackageByIdResource>>> {
        let repo = SourceRepository::new(PackageSource::new("feed", url).unwrap(), registry(transport));
        repo.get_resource::<FindPackageByIdResource>(&CancellationToken::new())
            .await
    }

    #[test]
    fn test_provider_order() {
        let registry = registry(Arc::new(StubTransport::new()));
        assert_eq!(
            registry.provider_names(crate::resource::ResourceType::of::<FindPackageByIdResource>()),
            vec![
                LocalFolderFindPackageByIdProvider::NAME,
                HttpFileSystemFindPackageByIdProvider::NAME,
                RemoteV2FindPackageByIdProvider::NAME,
            ]
        );
    }

    #[tokio::test]
    async fn test_service_index_source_gets_flat_container() {
        let transport = Arc::new(
            StubTransport::new()
                .with_body("https://feed.test/index.json", INDEX)
                .with_body(
                    "https://api.feed.test/v3-flatcontainer/newtonsoft.json/index.json",
                    r#"{"versions":["12.0.3","13.0.1"]}"#,
                )
                .with_body(
                    "https://api.feed.test/v3-flatcontainer/newtonsoft.json/13.0.1/newtonsoft.json.13.0.1.nupkg",
                    b"PK\x03\x04".to_vec(),
                ),
        );
        let token = CancellationToken::new();
        let resource = resolve("https://feed.test/index.json", transport).await.unwrap().unwrap();
        assert_eq!(resource.kind(), "flat-container");

        let versions = resource.get_all_versions("Newtonsoft.Json", &token).await.unwrap();
        assert_eq!(versions, vec!["12.0.3", "13.0.1"]);

        let archive = resource
            .download_package("Newtonsoft.Json", "13.0.1", &token)
            .await
            .unwrap();
        assert_eq!(archive, b"PK\x03\x04");
    }

    #[tokio::test]
    async fn test_flat_container_unknown_id_has_no_versions() {
        let transport = Arc::new(StubTransport::new().with_body("https://feed.test/index.json", INDEX));
        let resource = resolve("https://feed.test/index.json", transport).await.unwrap().unwrap();

        let versions = resource
            .get_all_versions("missing", &CancellationToken::new())
            .await
            .unwrap();
        assert!(versions.is_empty());
    }

    #[tokio::test]
    async fn test_flat_container_carries_id_list() {
        let transport = Arc::new(
            StubTransport::new()
                .with_body("https://feed.test/index.json", INDEX)
                .with_body(
                    "https://auto.feed.test/autocomplete?q=xunit&take=3&prerelease=true",
                    r#"{"data":["xunit","xunit.core","xunit.assert"]}"#,
                ),
        );
        let resource = resolve("https://feed.test/index.json", transport).await.unwrap().unwrap();

        let payload = resource
            .search_ids("xunit", 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload["data"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn test_index_without_base_address_falls_back_to_nothing() {
        // a service index source never matches the OData fallback
        let transport = Arc::new(StubTransport::new().with_body(
            "https://feed.test/index.json",
            r#"{"version":"3.0.0","resources":[{"@id":"https://s.test/q","@type":"SearchQueryService"}]}"#,
        ));
        assert!(resolve("https://feed.test/index.json", transport).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_v2_source_gets_odata_feed() {
        let transport = Arc::new(
            StubTransport::new().with_body("https://legacy.test/api/v2/package/Foo/1.0.0", b"nupkg".to_vec()),
        );
        let token = CancellationToken::new();
        let resource = resolve("https://legacy.test/api/v2/", transport.clone()).await.unwrap().unwrap();
        assert_eq!(resource.kind(), "odata");

        let archive = resource.download_package("Foo", "1.0.0", &token).await.unwrap();
        assert_eq!(archive, b"nupkg");

        let err = resource.get_all_versions("Foo", &token).await.unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"version listing is not supported by https://legacy.test/api/v2/"
        );
        assert!(matches!(
            resource.search_ids("Fo", 5, &token).await,
            Err(SourceError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_folder_lists_and_reads_packages() {
        let dir = tempfile::tempdir().unwrap();
        for version in ["1.0.0", "2.0.0-beta"] {
            let folder = dir.path().join("contoso.lib").join(version);
            std::fs::create_dir_all(&folder).unwrap();
            std::fs::write(folder.join(format!("contoso.lib.{}.nupkg", version)), version).unwrap();
        }
        // incomplete extraction, no archive
        std::fs::create_dir_all(dir.path().join("contoso.lib").join("3.0.0")).unwrap();

        let token = CancellationToken::new();
        let url = dir.path().to_str().unwrap();
        let resource = resolve(url, Arc::new(StubTransport::new())).await.unwrap().unwrap();
        assert_eq!(resource.kind(), "local");

        let versions = resource.get_all_versions("Contoso.Lib", &token).await.unwrap();
        assert_eq!(versions, vec!["1.0.0", "2.0.0-beta"]);

        let archive = resource.download_package("Contoso.Lib", "1.0.0", &token).await.unwrap();
        assert_eq!(archive, b"1.0.0");

        assert!(resource.get_all_versions("other", &token).await.unwrap().is_empty());
    }

    #[test]
    fn test_package_urls() {
        let http = Arc::new(HttpSourceResource::new(Arc::new(StubTransport::new())));
        let flat = FindPackageByIdResource::FlatContainer {
            base_addresses: vec![Url::parse("https://api.feed.test/flat/").unwrap()],
            http: http.clone(),
            id_list: None,
        };
        assert_eq!(
            flat.package_url("Serilog", "3.1.0-RC").unwrap().as_str(),
            "https://api.feed.test/flat/serilog/3.1.0-rc/serilog.3.1.0-rc.nupkg"
        );

        let odata = FindPackageByIdResource::ODataFeed {
            feed_url: Url::parse("https://legacy.test/api/v2").unwrap(),
            http,
        };
        assert_eq!(
            odata.package_url("Serilog", "3.1.0").unwrap().as_str(),
            "https://legacy.test/api/v2/package/Serilog/3.1.0"
        );
    }

    #[test]
    fn test_package_urls_reject_path_and_query_characters() {
        let http = Arc::new(HttpSourceResource::new(Arc::new(StubTransport::new())));
        let flat = FindPackageByIdResource::FlatContainer {
            base_addresses: vec![Url::parse("https://api.feed.test/flat/").unwrap()],
            http: http.clone(),
            id_list: None,
        };
        let odata = FindPackageByIdResource::ODataFeed {
            feed_url: Url::parse("https://legacy.test/api/v2/").unwrap(),
            http,
        };

        for (id, version) in [("../evil", "1.0.0"), ("a/b", "1.0.0"), ("x?y#z", "1.0.0"), ("Serilog", "..")] {
            for resource in [&flat, &odata] {
                let err = resource.package_url(id, version).unwrap_err();
                assert!(
                    matches!(err, SourceError::InvalidPackage { .. }),
                    "{} {} on {}: {}",
                    id,
                    version,
                    resource.kind(),
                    err
                );
            }
        }

        // a trailing slash on the feed does not double up
        assert_eq!(
            odata.package_url("Serilog", "3.1.0").unwrap().as_str(),
            "https://legacy.test/api/v2/package/Serilog/3.1.0"
        );
    }

    #[tokio::test]
    async fn test_local_folder_stays_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("feed");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(dir.path().join("secret").join("1.0.0")).unwrap();
        std::fs::write(
            dir.path().join("secret").join("1.0.0").join("secret.1.0.0.nupkg"),
            b"private",
        )
        .unwrap();

        let local = FindPackageByIdResource::LocalFolder { root };
        let token = CancellationToken::new();

        let err = local.get_all_versions("../secret", &token).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidPackage { .. }));
        let err = local.download_package("..", "1.0.0", &token).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidPackage { .. }));
        let err = local.download_package("secret", "1.0.0\\..", &token).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidPackage { .. }));
    }
}
