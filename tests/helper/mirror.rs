//! Mirror fixtures: repomd.xml / primary bodies served from mockito

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use mockito::{Mock, ServerGuard};
use tempfile::TempDir;

use repodata_query::repository::cache::IndexCache;
use repodata_query::repository::clock::ManualClock;
use repodata_query::repository::mirror::HttpMirror;
use repodata_query::repository::releases::{ReleaseApi, VersionResolver};
use repodata_query::search::SearchEngine;

pub const INDEX_TTL_MS: i64 = 7_200_000;
pub const VERSIONS_TTL_MS: i64 = 3_600_000;

/// One `<package>` element of a primary metadata fixture
pub struct Pkg<'a> {
    pub name: &'a str,
    pub epoch: &'a str,
    pub ver: &'a str,
    pub rel: &'a str,
    pub arch: &'a str,
    pub summary: &'a str,
}

impl<'a> Pkg<'a> {
    pub fn named(name: &'a str) -> Self {
        Self {
            name,
            epoch: "0",
            ver: "1.0",
            rel: "1.el9",
            arch: "x86_64",
            summary: "",
        }
    }
}

pub fn repomd(href: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
  <revision>1715000000</revision>
  <data type="filelists">
    <location href="repodata/def-filelists.xml.gz"/>
  </data>
  <data type="primary">
    <checksum type="sha256">abc</checksum>
    <location href="{href}"/>
    <size>1234</size>
  </data>
</repomd>"#
    )
}

pub fn primary(packages: &[Pkg]) -> String {
    let mut xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata xmlns=\"http://linux.duke.edu/metadata/common\" xmlns:rpm=\"http://linux.duke.edu/metadata/rpm\" packages=\"{}\">\n",
        packages.len()
    );
    for pkg in packages {
        xml.push_str(&format!(
            r#"<package type="rpm">
  <name>{}</name>
  <arch>{}</arch>
  <version epoch="{}" ver="{}" rel="{}"/>
  <summary>{}</summary>
  <size package="1024" installed="4096" archive="4200"/>
  <format>
    <rpm:provides>
      <rpm:entry name="{}" flags="EQ" epoch="{}" ver="{}" rel="{}"/>
    </rpm:provides>
  </format>
</package>
"#,
            pkg.name,
            pkg.arch,
            pkg.epoch,
            pkg.ver,
            pkg.rel,
            pkg.summary,
            pkg.name,
            pkg.epoch,
            pkg.ver,
            pkg.rel
        ));
    }
    xml.push_str("</metadata>\n");
    xml
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Serve `repomd.xml` plus a gzip primary for `{version_path}/{repo}`
pub async fn serve_repo(
    server: &mut ServerGuard,
    version_path: &str,
    repo: &str,
    packages: &[Pkg<'_>],
) -> (Mock, Mock) {
    serve_repo_times(server, version_path, repo, packages, 1).await
}

/// Same as [`serve_repo`], expecting each file to be requested `hits` times
pub async fn serve_repo_times(
    server: &mut ServerGuard,
    version_path: &str,
    repo: &str,
    packages: &[Pkg<'_>],
    hits: usize,
) -> (Mock, Mock) {
    let repomd_mock = server
        .mock(
            "GET",
            format!("/{}/{}/repodata/repomd.xml", version_path, repo).as_str(),
        )
        .with_status(200)
        .with_body(repomd("repodata/abc-primary.xml.gz"))
        .expect(hits)
        .create_async()
        .await;
    let primary_mock = server
        .mock(
            "GET",
            format!("/{}/{}/repodata/abc-primary.xml.gz", version_path, repo).as_str(),
        )
        .with_status(200)
        .with_body(gzip(primary(packages).as_bytes()))
        .expect(hits)
        .create_async()
        .await;
    (repomd_mock, primary_mock)
}

/// Search engine wired to a mockito mirror, a temporary cache and a manual clock
pub struct TestEngine {
    pub engine: SearchEngine<IndexCache>,
    pub clock: Arc<ManualClock>,
    _temp_dir: TempDir,
}

pub fn engine(server: &ServerGuard, repositories: &[&str]) -> TestEngine {
    let temp_dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let store = Arc::new(
        IndexCache::with_clock(
            &temp_dir.path().join("indices.db"),
            INDEX_TTL_MS,
            clock.clone(),
        )
        .unwrap(),
    );
    let versions = Arc::new(VersionResolver::new(
        Arc::new(ReleaseApi::new(&format!("{}/releases", server.url()))),
        clock.clone(),
        VERSIONS_TTL_MS,
    ));
    let engine = SearchEngine::new(
        store,
        Arc::new(HttpMirror::new(&server.url())),
        versions,
        repositories.iter().map(|r| r.to_string()).collect(),
    );

    TestEngine {
        engine,
        clock,
        _temp_dir: temp_dir,
    }
}
