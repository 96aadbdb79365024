//! Repository access layer: fetching, caching and version resolution
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Releases   │────▶│   Mirror    │────▶│    Cache    │
//! │(tag → path) │     │(repomd, gz) │     │  (sqlite)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: SQLite-based package index cache with TTL
//! - [`clock`]: injectable time source for freshness checks
//! - [`error`]: Error types for cache and repository operations
//! - [`mirror`]: repomd.xml lookup and streamed primary metadata
//! - [`releases`]: release API client and version tag resolution

pub mod cache;
pub mod clock;
pub mod error;
pub mod mirror;
pub mod releases;
