//! Mirror access: locate primary metadata and stream it into a package index

use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::METADATA_TIMEOUT_MS;
use crate::metadata::decompress::StreamDecoder;
use crate::metadata::primary::PrimaryParser;
use crate::metadata::repomd::{PrimaryFormat, PrimaryLocation, find_primary_href};
use crate::metadata::types::PackageIndex;
use crate::repository::error::RepositoryError;

/// Trait for fetching package indices from a repository mirror
#[async_trait::async_trait]
pub trait Mirror: Send + Sync {
    /// Fetch and parse the package index of `repository` under the mirror
    /// path segment `version_path`.
    async fn fetch_index(
        &self,
        version_path: &str,
        repository: &str,
    ) -> Result<PackageIndex, RepositoryError>;
}

/// Mirror implementation for the `{base}/{version}/{repo}/repodata` layout
pub struct HttpMirror {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMirror {
    /// Creates a new HttpMirror rooted at `base_url`
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("repodata-query")
                .timeout(Duration::from_millis(METADATA_TIMEOUT_MS))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Base path for a mirror path segment (`{base_url}/{version_path}`)
    pub fn base_path(&self, version_path: &str) -> String {
        format!("{}/{}", self.base_url, version_path.trim_matches('/'))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, RepositoryError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RepositoryError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RepositoryError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        Ok(response)
    }

    async fn get_text(&self, url: &str) -> Result<String, RepositoryError> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| RepositoryError::network(url, e))
    }

    /// Read `{base_path}/{repository}/repodata/repomd.xml` and resolve the
    /// primary metadata location.
    ///
    /// Any failure to fetch repomd.xml is reported as `MetadataNotFound`,
    /// with the transport error kept as the reason.
    pub async fn locate_primary(
        &self,
        base_path: &str,
        repository: &str,
    ) -> Result<PrimaryLocation, RepositoryError> {
        let repo_url = format!("{}/{}", base_path.trim_end_matches('/'), repository);
        let repomd_url = format!("{}/repodata/repomd.xml", repo_url);

        let body = self.get_text(&repomd_url).await.map_err(|e| {
            RepositoryError::MetadataNotFound {
                url: repomd_url.clone(),
                reason: e.to_string(),
            }
        })?;

        let href = find_primary_href(&body).ok_or_else(|| RepositoryError::MetadataNotFound {
            url: repomd_url.clone(),
            reason: "no primary location entry".to_string(),
        })?;

        let location = PrimaryLocation::resolve(&repo_url, &href);
        debug!("Primary metadata for {} at {}", repository, location.url);
        Ok(location)
    }

    /// Stream the primary file, decompressing and parsing chunk by chunk.
    pub async fn fetch_primary(
        &self,
        location: &PrimaryLocation,
    ) -> Result<PackageIndex, RepositoryError> {
        if let PrimaryFormat::Unsupported(format) = &location.format {
            return Err(RepositoryError::UnsupportedFormat(format!(
                "{} ({})",
                format, location.href
            )));
        }

        let url = location.url.as_str();
        let mut body = self.get(url).await?.bytes_stream();
        let mut decoder = StreamDecoder::new();
        let mut parser = PrimaryParser::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| RepositoryError::network(url, e))?;
            let decoded = decoder.feed(&chunk)?;
            parser.feed(&decoded);
        }
        parser.feed(&decoder.finish()?);

        if decoder.total_out() == 0 {
            return Err(RepositoryError::EmptyStream {
                url: url.to_string(),
            });
        }
        if decoder.skipped_chunks() > 0 {
            warn!(
                "{} corrupted chunks skipped while decoding {}",
                decoder.skipped_chunks(),
                url
            );
        }

        let index = parser.finish()?;
        info!(
            "Parsed {} packages from {} ({} bytes decompressed)",
            index.len(),
            url,
            decoder.total_out()
        );
        Ok(index)
    }
}

#[async_trait::async_trait]
impl Mirror for HttpMirror {
    async fn fetch_index(
        &self,
        version_path: &str,
        repository: &str,
    ) -> Result<PackageIndex, RepositoryError> {
        let base_path = self.base_path(version_path);
        let location = self.locate_primary(&base_path, repository).await?;
        self.fetch_primary(&location).await
    }
}
