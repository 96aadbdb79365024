//! Multi-repository package search

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::{LATEST_VERSION_TAG, MIN_QUERY_LENGTH};
use crate::metadata::types::PackageIndex;
use crate::repository::cache::IndexStore;
use crate::repository::mirror::Mirror;
use crate::repository::releases::VersionResolver;
use crate::search::types::{RepoHits, RepoResult, SearchError, SearchRequest, SearchResponse};

/// Fans a query out over repositories, reading indices cache-first
pub struct SearchEngine<S: IndexStore> {
    store: Arc<S>,
    mirror: Arc<dyn Mirror>,
    versions: Arc<VersionResolver>,
    repositories: Vec<String>,
}

impl<S: IndexStore> SearchEngine<S> {
    pub fn new(
        store: Arc<S>,
        mirror: Arc<dyn Mirror>,
        versions: Arc<VersionResolver>,
        repositories: Vec<String>,
    ) -> Self {
        Self {
            store,
            mirror,
            versions,
            repositories,
        }
    }

    /// Repositories searched when a request names none
    pub fn repositories(&self) -> &[String] {
        &self.repositories
    }

    /// Run a search. Only request validation can fail; every per-repository
    /// failure just leaves that repository out of the results.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let query = request.package.trim();
        let length = query.chars().count();
        if length < MIN_QUERY_LENGTH {
            return Err(SearchError::QueryTooShort {
                min: MIN_QUERY_LENGTH,
                actual: length,
            });
        }

        let needle = query.to_lowercase();
        let version_tag = request.version.as_deref();
        let targets: Vec<&str> = match &request.repo {
            Some(repo) => vec![repo.as_str()],
            None => self.repositories.iter().map(String::as_str).collect(),
        };

        debug!(
            "Searching {} repositories for {:?} (exact: {})",
            targets.len(),
            needle,
            request.exact_match
        );

        // join_all keeps caller order regardless of completion order
        let indices = join_all(
            targets
                .iter()
                .map(|repo| self.repo_packages(repo, version_tag)),
        )
        .await;

        let results: Vec<RepoResult> = targets
            .iter()
            .zip(indices)
            .filter_map(|(repo, index)| {
                let hits = if request.exact_match {
                    match_exact(&index, &needle)
                } else {
                    match_substring(&index, &needle)
                }?;
                Some(RepoResult {
                    repo: repo.to_string(),
                    hits,
                    version_tag: version_tag.unwrap_or(LATEST_VERSION_TAG).to_string(),
                })
            })
            .collect();

        info!(
            "Query {:?} matched in {} of {} repositories",
            query,
            results.len(),
            targets.len()
        );

        Ok(SearchResponse {
            query: request.package.clone(),
            exact_match: request.exact_match,
            results,
        })
    }

    /// Package index for one repository, cache first.
    ///
    /// Any failure (network, missing or unsupported metadata, parse errors,
    /// cache errors) degrades to an empty index.
    pub async fn repo_packages(&self, repository: &str, version_tag: Option<&str>) -> PackageIndex {
        match self.store.get(repository, version_tag) {
            Ok(Some(index)) => return index,
            Ok(None) => {}
            Err(e) => warn!(
                "Cache read failed for {} ({}): {}",
                repository,
                version_tag.unwrap_or(LATEST_VERSION_TAG),
                e
            ),
        }

        let version_path = self.versions.resolve_path(version_tag).await;

        match self.mirror.fetch_index(&version_path, repository).await {
            Ok(index) => {
                if let Err(e) = self.store.put(repository, version_tag, &index) {
                    error!(
                        "Failed to cache index for {} ({}): {}",
                        repository,
                        version_tag.unwrap_or(LATEST_VERSION_TAG),
                        e
                    );
                }
                index
            }
            Err(e) => {
                error!(
                    "Failed to fetch packages for {} (version {}, path {}): {}",
                    repository,
                    version_tag.unwrap_or(LATEST_VERSION_TAG),
                    version_path,
                    e
                );
                PackageIndex::new()
            }
        }
    }
}

fn match_exact(index: &PackageIndex, needle: &str) -> Option<RepoHits> {
    index
        .get(needle)
        .map(|record| RepoHits::Exact {
            package: record.clone(),
        })
}

fn match_substring(index: &PackageIndex, needle: &str) -> Option<RepoHits> {
    let matches: Vec<_> = index
        .iter()
        .filter(|(name, _)| name.contains(needle))
        .map(|(_, record)| record.clone())
        .collect();

    if matches.is_empty() {
        return None;
    }

    Some(RepoHits::Substring {
        match_count: matches.len(),
        matches,
    })
}
