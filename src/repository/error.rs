use thiserror::Error;

use crate::metadata::decompress::DecodeError;
use crate::metadata::primary::ParseError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Per-repository pipeline failures
///
/// None of these reach the search caller; the pipeline boundary turns each
/// into an empty index for the affected repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected status {status} for {url}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Primary metadata not found in {url}: {reason}")]
    MetadataNotFound { url: String, reason: String },

    #[error("Unsupported metadata format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to parse metadata: {0}")]
    MetadataParse(#[from] ParseError),

    #[error("Stream decompressed to nothing: {url}")]
    EmptyStream { url: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RepositoryError {
    pub(crate) fn network(url: &str, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.to_string(),
            source,
        }
    }
}

impl From<DecodeError> for RepositoryError {
    fn from(error: DecodeError) -> Self {
        match error {
            DecodeError::UnsupportedFormat { .. } => Self::UnsupportedFormat(error.to_string()),
            DecodeError::Finished => Self::InvalidResponse(error.to_string()),
        }
    }
}
