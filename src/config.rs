use serde::Deserialize;
use std::path::{Path, PathBuf};

// =============================================================================
// Time-related constants
// =============================================================================

/// Freshness window for cached package indices in milliseconds (2 hours)
pub const DEFAULT_INDEX_TTL_MS: i64 = 2 * 60 * 60 * 1000;

/// Freshness window for the release version table in milliseconds (1 hour)
pub const DEFAULT_VERSIONS_TTL_MS: i64 = 60 * 60 * 1000;

/// Timeout for the release API request in milliseconds (5 seconds)
pub const RELEASE_API_TIMEOUT_MS: u64 = 5_000;

/// Timeout for repomd.xml and primary metadata transfers in milliseconds (120 seconds)
pub const METADATA_TIMEOUT_MS: u64 = 120_000;

// =============================================================================
// Search and layout constants
// =============================================================================

/// Shortest query accepted by the search engine
pub const MIN_QUERY_LENGTH: usize = 2;

/// Mirror path segment used when no version tag is requested
pub const DEFAULT_VERSION_PATH: &str = "current";

/// Cache key prefix used when no version tag is requested
pub const LATEST_VERSION_TAG: &str = "latest";

const DEFAULT_BASE_URL: &str = "http://localhost/repos";
const DEFAULT_RELEASE_API_URL: &str = "http://localhost/api/releases";

const DEFAULT_REPOSITORIES: &[&str] = &[
    "rhel-8-for-x86_64-baseos-rpms",
    "rhel-8-for-x86_64-appstream-rpms",
    "rhel-9-for-x86_64-baseos-rpms",
    "rhel-9-for-x86_64-appstream-rpms",
    "rhel-8-epel-rpms",
    "rhel-9-epel-rpms",
    "codeready-builder-for-rhel-8-x86_64-rpms",
    "codeready-builder-for-rhel-9-x86_64-rpms",
];

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryConfig {
    pub mirror: MirrorConfig,
    pub cache: CacheConfig,
    /// Repositories searched when a query names no repository
    pub repositories: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            mirror: MirrorConfig::default(),
            cache: CacheConfig::default(),
            repositories: DEFAULT_REPOSITORIES.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Mirror endpoints
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorConfig {
    /// Root of the versioned mirror layout (`{baseUrl}/{versionPath}/{repo}`)
    pub base_url: String,
    /// Endpoint returning the `repodata-tags` JSON document
    pub release_api_url: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            release_api_url: DEFAULT_RELEASE_API_URL.to_string(),
        }
    }
}

/// Cache-related configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Package index freshness window in milliseconds
    pub index_ttl_ms: i64,
    /// Version table freshness window in milliseconds
    pub versions_ttl_ms: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            index_ttl_ms: DEFAULT_INDEX_TTL_MS,
            versions_ttl_ms: DEFAULT_VERSIONS_TTL_MS,
        }
    }
}

impl QueryConfig {
    /// Load configuration from an optional JSON file, then apply
    /// `REPO_BASE_URL` / `RELEASE_API_URL` from the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str(&content)?
            }
            None => Self::default(),
        };

        Ok(config.with_overrides(
            std::env::var("REPO_BASE_URL").ok(),
            std::env::var("RELEASE_API_URL").ok(),
        ))
    }

    fn with_overrides(mut self, base_url: Option<String>, release_api_url: Option<String>) -> Self {
        if let Some(base_url) = base_url.filter(|v| !v.is_empty()) {
            self.mirror.base_url = base_url;
        }
        if let Some(release_api_url) = release_api_url.filter(|v| !v.is_empty()) {
            self.mirror.release_api_url = release_api_url;
        }
        self
    }
}

/// Returns the path to the data directory for repodata-query.
/// Uses $XDG_DATA_HOME/repodata-query if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/repodata-query,
/// or ./repodata-query if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the index cache database.
pub fn db_path() -> PathBuf {
    data_dir().join("indices.db")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("repodata-query.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("repodata-query")
}
