//! Request and response shapes of the search contract

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metadata::types::PackageRecord;

/// Request validation failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("Query must be at least {min} characters, got {actual}")]
    QueryTooShort { min: usize, actual: usize },
}

/// A search request as received from the front-end
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub package: String,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub exact_match: bool,
}

impl SearchRequest {
    pub fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            ..Self::default()
        }
    }

    pub fn repo(mut self, repo: &str) -> Self {
        self.repo = Some(repo.to_string());
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn exact(mut self, exact_match: bool) -> Self {
        self.exact_match = exact_match;
        self
    }
}

/// Matches contributed by one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RepoHits {
    /// Exact mode: the single package whose name equals the query
    Exact { package: PackageRecord },
    /// Substring mode: every package whose name contains the query
    Substring {
        matches: Vec<PackageRecord>,
        #[serde(rename = "matchCount")]
        match_count: usize,
    },
}

/// Result entry for one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoResult {
    pub repo: String,
    #[serde(flatten)]
    pub hits: RepoHits,
    /// Version tag used, or `latest`
    pub version_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub query: String,
    pub exact_match: bool,
    pub results: Vec<RepoResult>,
}
