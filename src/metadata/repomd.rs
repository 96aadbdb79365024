//! `repomd.xml` parsing: locate the primary metadata file of a repository

use std::sync::LazyLock;

use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use regex::Regex;

/// Namespace of `<repomd>` documents produced by createrepo
const REPO_NAMESPACE: &[u8] = b"http://linux.duke.edu/metadata/repo";

static XMLNS_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\sxmlns(:[A-Za-z0-9_.-]+)?\s*=\s*("[^"]*"|'[^']*')"#)
        .expect("xmlns pattern is valid")
});

/// Container format of the primary metadata, judged from the href
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryFormat {
    /// Compressed XML (`.xml.gz` / `.xml.xz`) that can be streamed
    Xml,
    /// Anything else, e.g. `primary.sqlite.bz2`
    Unsupported(String),
}

impl PrimaryFormat {
    pub fn from_href(href: &str) -> Self {
        if href.ends_with(".xml.gz") || href.ends_with(".xml.xz") {
            Self::Xml
        } else {
            let suffix = href
                .rsplit('/')
                .next()
                .and_then(|file| file.split_once('.'))
                .map(|(_, ext)| ext.to_string())
                .unwrap_or_default();
            Self::Unsupported(suffix)
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Xml)
    }
}

/// Where a repository's primary metadata lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryLocation {
    /// The `href` exactly as written in repomd.xml
    pub href: String,
    /// Fully resolved URL of the primary file
    pub url: String,
    pub format: PrimaryFormat,
}

impl PrimaryLocation {
    /// Resolve `href` for the repository rooted at `repo_url`.
    ///
    /// Absolute URLs are used as-is. `repodata/...` paths are relative to the
    /// repository root; bare file names are relative to its `repodata/`
    /// directory.
    pub fn resolve(repo_url: &str, href: &str) -> Self {
        let repo_url = repo_url.trim_end_matches('/');
        let url = if reqwest::Url::parse(href).is_ok() {
            href.to_string()
        } else {
            let relative = href.trim_start_matches("./").trim_start_matches('/');
            if relative.starts_with("repodata/") {
                format!("{}/{}", repo_url, relative)
            } else {
                format!("{}/repodata/{}", repo_url, relative)
            }
        };

        Self {
            href: href.to_string(),
            url,
            format: PrimaryFormat::from_href(href),
        }
    }
}

/// Extract the `href` of `<data type="primary"><location/></data>`.
///
/// Namespace-aware matching is tried first; if the document uses a different
/// or missing namespace, all `xmlns` declarations are stripped and the
/// document is matched on plain element names.
pub fn find_primary_href(repomd: &str) -> Option<String> {
    scan(repomd, true).or_else(|| {
        let stripped = XMLNS_DECLARATION.replace_all(repomd, "");
        scan(&stripped, false)
    })
}

fn scan(xml: &str, namespaced: bool) -> Option<String> {
    let mut reader = NsReader::from_str(xml);
    let mut in_primary = false;

    loop {
        let (resolved, event) = match reader.read_resolved_event() {
            Ok((ResolveResult::Bound(Namespace(ns)), event)) => (Some(ns.to_vec()), event),
            Ok((_, event)) => (None, event),
            Err(_) => return None,
        };

        let matches = |tag: &BytesStart, name: &[u8]| {
            if namespaced {
                resolved.as_deref() == Some(REPO_NAMESPACE) && tag.local_name().as_ref() == name
            } else {
                tag.name().as_ref() == name
            }
        };

        match event {
            Event::Start(ref tag) | Event::Empty(ref tag) if matches(tag, b"data") => {
                in_primary = attribute(tag, b"type").as_deref() == Some("primary");
            }
            Event::Start(ref tag) | Event::Empty(ref tag)
                if in_primary && matches(tag, b"location") =>
            {
                if let Some(href) = attribute(tag, b"href") {
                    return Some(href);
                }
            }
            Event::End(ref tag) if tag.local_name().as_ref() == b"data" => in_primary = false,
            Event::Eof => return None,
            _ => {}
        }
    }
}

fn attribute(tag: &BytesStart, key: &[u8]) -> Option<String> {
    tag.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.into_owned())
}
