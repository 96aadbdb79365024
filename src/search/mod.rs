//! Package search across repositories
//!
//! - [`engine`]: cache-then-fetch fan-out and matching
//! - [`types`]: request, response and validation error

pub mod engine;
pub mod types;

pub use engine::SearchEngine;
pub use types::{RepoHits, RepoResult, SearchError, SearchRequest, SearchResponse};
