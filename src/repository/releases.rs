//! Release version table: version tag -> mirror path segment

use std::sync::{Arc, RwLock};
use std::time::Duration;

use indexmap::IndexMap;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{DEFAULT_VERSION_PATH, RELEASE_API_TIMEOUT_MS};
use crate::repository::clock::Clock;
use crate::repository::error::RepositoryError;

/// Version tag -> mirror path segment, in release API order
pub type VersionMap = IndexMap<String, String>;

/// Response from the release API
#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    #[serde(rename = "repodata-tags", default)]
    repodata_tags: VersionMap,
}

/// Trait for fetching the version table from a release service
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn fetch_version_map(&self) -> Result<VersionMap, RepositoryError>;
}

/// Release source backed by the release information HTTP endpoint
pub struct ReleaseApi {
    client: reqwest::Client,
    url: String,
}

impl ReleaseApi {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("repodata-query")
                .timeout(Duration::from_millis(RELEASE_API_TIMEOUT_MS))
                .build()
                .expect("Failed to create HTTP client"),
            url: url.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ReleaseSource for ReleaseApi {
    async fn fetch_version_map(&self) -> Result<VersionMap, RepositoryError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RepositoryError::network(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RepositoryError::HttpStatus {
                url: self.url.clone(),
                status,
            });
        }

        let release: ReleaseResponse = response
            .json()
            .await
            .map_err(|e| RepositoryError::InvalidResponse(e.to_string()))?;

        Ok(release.repodata_tags)
    }
}

struct CachedVersions {
    versions: VersionMap,
    fetched_at: i64,
}

/// Caches the version table and maps version tags to mirror paths
pub struct VersionResolver {
    source: Arc<dyn ReleaseSource>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    cached: RwLock<Option<CachedVersions>>,
}

impl VersionResolver {
    pub fn new(source: Arc<dyn ReleaseSource>, clock: Arc<dyn Clock>, ttl_ms: i64) -> Self {
        Self {
            source,
            clock,
            ttl_ms,
            cached: RwLock::new(None),
        }
    }

    fn fresh_cached(&self) -> Option<VersionMap> {
        let now = self.clock.now_ms();
        let cached = self.cached.read().ok()?;
        cached
            .as_ref()
            .filter(|c| now - c.fetched_at < self.ttl_ms)
            .map(|c| c.versions.clone())
    }

    /// Current version table. Never fails: on any fetch error a still-fresh
    /// table is returned, else an empty one.
    pub async fn resolve_versions(&self) -> VersionMap {
        if let Some(versions) = self.fresh_cached() {
            return versions;
        }

        match self.source.fetch_version_map().await {
            Ok(versions) => {
                debug!("Fetched {} release version tags", versions.len());
                if let Ok(mut cached) = self.cached.write() {
                    *cached = Some(CachedVersions {
                        versions: versions.clone(),
                        fetched_at: self.clock.now_ms(),
                    });
                }
                versions
            }
            Err(e) => {
                warn!("Failed to fetch release versions: {}", e);
                // Another request may have refreshed the table meanwhile
                self.fresh_cached().unwrap_or_default()
            }
        }
    }

    /// Mirror path segment for a version tag.
    ///
    /// No tag -> `current`; a known tag -> its mapped path; an unknown tag is
    /// used verbatim. The release API is only consulted when a tag is given.
    pub async fn resolve_path(&self, version_tag: Option<&str>) -> String {
        let Some(tag) = version_tag else {
            return DEFAULT_VERSION_PATH.to_string();
        };

        self.resolve_versions()
            .await
            .get(tag)
            .cloned()
            .unwrap_or_else(|| tag.to_string())
    }
}
