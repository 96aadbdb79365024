use std::sync::Arc;

use tempfile::TempDir;

use repodata_query::metadata::primary::parse_primary;
use repodata_query::repository::cache::{IndexCache, IndexStore};
use repodata_query::repository::clock::ManualClock;

const TTL_MS: i64 = 7_200_000;

const PRIMARY: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" packages="2">
<package type="rpm">
  <name>NetworkManager</name>
  <arch>x86_64</arch>
  <version epoch="1" ver="1.46.0" rel="8.el9"/>
  <summary>Network connection manager and user applications</summary>
</package>
<package type="rpm">
  <name>bash</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="5.1.8" rel="6.el9"/>
  <summary>The GNU Bourne Again shell</summary>
</package>
</metadata>"#;

#[test]
fn parsed_index_survives_cache_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let cache = IndexCache::with_clock(
        &temp_dir.path().join("indices.db"),
        TTL_MS,
        Arc::new(ManualClock::new(0)),
    )
    .unwrap();
    let index = parse_primary(PRIMARY).unwrap();

    cache.put("baseos", None, &index).unwrap();

    let saved = cache.get("baseos", None).unwrap().unwrap();
    assert_eq!(saved, index);
    assert_eq!(saved["networkmanager"].name, "NetworkManager");
}

#[test]
fn versioned_and_latest_entries_are_separate() {
    let temp_dir = TempDir::new().unwrap();
    let cache = IndexCache::with_clock(
        &temp_dir.path().join("indices.db"),
        TTL_MS,
        Arc::new(ManualClock::new(0)),
    )
    .unwrap();
    let index = parse_primary(PRIMARY).unwrap();

    cache.put("baseos", Some("9.4"), &index).unwrap();

    assert!(cache.get("baseos", Some("9.4")).unwrap().is_some());
    assert!(cache.get("baseos", None).unwrap().is_none());
    assert!(cache.get("appstream", Some("9.4")).unwrap().is_none());
}

#[test]
fn entries_persist_across_reopen_until_ttl() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("indices.db");
    let clock = Arc::new(ManualClock::new(0));
    let index = parse_primary(PRIMARY).unwrap();

    {
        let cache = IndexCache::with_clock(&db_path, TTL_MS, clock.clone()).unwrap();
        cache.put("baseos", None, &index).unwrap();
    }

    let cache = IndexCache::with_clock(&db_path, TTL_MS, clock.clone()).unwrap();
    clock.set(7_199_000);
    assert_eq!(cache.get("baseos", None).unwrap(), Some(index));

    clock.set(7_201_000);
    assert_eq!(cache.get("baseos", None).unwrap(), None);
    assert_eq!(cache.updated_at("baseos", None).unwrap(), Some(0));
}
