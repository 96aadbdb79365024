//! Common types for parsed repository metadata

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Package index of one repository: lowercase package name -> record
///
/// A `BTreeMap` keeps substring matches in a stable, name-sorted order.
pub type PackageIndex = BTreeMap<String, PackageRecord>;

/// EVR triple taken from the `<version epoch="" ver="" rel=""/>` attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
}

/// A single `<package>` entry from primary metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Package name as published (e.g., "bash", "NetworkManager")
    pub name: String,
    /// Absent when the package element carried no `<version>`
    pub version: Option<PackageVersion>,
    pub arch: Option<String>,
    /// Empty when the package element carried no `<summary>`
    #[serde(default)]
    pub summary: String,
    pub description: Option<String>,
    /// Raw `<size>` attributes (`package`, `installed`, `archive`)
    pub size: Option<BTreeMap<String, String>>,
}

impl PackageRecord {
    /// Key under which this record is stored in a [`PackageIndex`]
    pub fn index_key(&self) -> String {
        self.name.to_lowercase()
    }
}
