//! Repository metadata formats
//!
//! Everything here is I/O free: callers push bytes in and get typed results
//! out, which keeps the formats testable without a network layer.
//!
//! # Modules
//!
//! - [`decompress`]: gzip / XZ detection and push-style decompression
//! - [`primary`]: incremental `<package>` parser for primary metadata
//! - [`repomd`]: primary location lookup in `repomd.xml`
//! - [`types`]: `PackageRecord`, `PackageVersion` and `PackageIndex`

pub mod decompress;
pub mod primary;
pub mod repomd;
pub mod types;
