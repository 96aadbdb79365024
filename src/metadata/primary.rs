//! Incremental parser for `primary.xml` package metadata
//!
//! Decompressed bytes are pushed in with [`PrimaryParser::feed`] as they
//! arrive. Only complete markup is handed to the XML reader; an unfinished
//! tail is carried over to the next chunk. Each `<package>` element is folded
//! into a [`PackageRecord`] as soon as it closes and its working state is
//! dropped, so memory per record stays constant regardless of document size.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metadata::types::{PackageIndex, PackageRecord, PackageVersion};

/// Upper bound on carried-over bytes when no markup boundary shows up
const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// Error type for primary metadata parsing
#[derive(Debug, Error)]
pub enum ParseError {
    /// The stream contained no XML elements at all
    #[error("Metadata stream contained no XML elements")]
    Empty,

    /// The stream was invalid before any element could be read
    #[error("Malformed metadata: {0}")]
    Malformed(String),
}

/// Package fields populated from direct children of `<package>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Version,
    Arch,
    Summary,
    Description,
    Size,
}

impl Field {
    fn from_tag(local_name: &[u8]) -> Option<Self> {
        match local_name {
            b"name" => Some(Self::Name),
            b"version" => Some(Self::Version),
            b"arch" => Some(Self::Arch),
            b"summary" => Some(Self::Summary),
            b"description" => Some(Self::Description),
            b"size" => Some(Self::Size),
            _ => None,
        }
    }
}

/// In-progress record for the currently open `<package>` element
#[derive(Debug, Default)]
struct PackageAccumulator {
    /// Element nesting below `<package>`
    depth: usize,
    /// Field whose text is being collected, with the text so far
    capture: Option<(Field, String)>,
    name: Option<String>,
    version: Option<PackageVersion>,
    arch: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    size: Option<BTreeMap<String, String>>,
}

impl PackageAccumulator {
    fn open(&mut self, tag: &BytesStart, empty: bool) {
        let field = match self.depth {
            0 => Field::from_tag(tag.local_name().as_ref()),
            _ => None,
        };

        if let Some(field) = field {
            match field {
                Field::Version => self.version = Some(version_from_attributes(tag)),
                Field::Size => self.size = Some(attribute_map(tag)),
                _ => {}
            }
            if empty {
                self.set_text(field, String::new());
            } else {
                self.capture = Some((field, String::new()));
            }
        }

        if !empty {
            self.depth += 1;
        }
    }

    /// Returns true when this closes the `<package>` element itself
    fn close(&mut self) -> bool {
        if self.depth == 0 {
            return true;
        }

        self.depth -= 1;
        if self.depth == 0 {
            if let Some((field, text)) = self.capture.take() {
                self.set_text(field, text);
            }
        }
        false
    }

    fn push_text(&mut self, text: &str) {
        if let Some((_, buffer)) = self.capture.as_mut() {
            buffer.push_str(text);
        }
    }

    fn set_text(&mut self, field: Field, text: String) {
        let text = text.trim().to_string();
        match field {
            Field::Name => self.name = Some(text).filter(|n| !n.is_empty()),
            Field::Arch => self.arch = Some(text),
            Field::Summary => self.summary = Some(text),
            Field::Description => self.description = Some(text),
            // Attribute-only elements
            Field::Version | Field::Size => {}
        }
    }

    fn into_record(self) -> Option<PackageRecord> {
        let name = self.name?;
        Some(PackageRecord {
            name,
            version: self.version,
            arch: self.arch,
            summary: self.summary.unwrap_or_default(),
            description: self.description,
            size: self.size,
        })
    }
}

#[derive(Debug, Default)]
enum ParserState {
    #[default]
    Idle,
    InPackage(PackageAccumulator),
}

/// Streaming `<package>` extractor
#[derive(Debug, Default)]
pub struct PrimaryParser {
    pending: Vec<u8>,
    state: ParserState,
    index: PackageIndex,
    /// Set once any element has been read
    started: bool,
    /// Structural failure before the first element; further input is ignored
    failure: Option<String>,
    skipped_chunks: usize,
}

impl PrimaryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of packages emitted so far
    pub fn package_count(&self) -> usize {
        self.index.len()
    }

    /// Number of chunks dropped after a syntax error
    pub fn skipped_chunks(&self) -> usize {
        self.skipped_chunks
    }

    /// Bytes of working state held outside the emitted index: the carried-over
    /// tail plus the open record, if any.
    pub fn retained_bytes(&self) -> usize {
        let record = match &self.state {
            ParserState::Idle => 0,
            ParserState::InPackage(acc) => {
                [&acc.name, &acc.arch, &acc.summary, &acc.description]
                    .into_iter()
                    .map(|f| f.as_ref().map_or(0, String::len))
                    .sum::<usize>()
                    + acc.capture.as_ref().map_or(0, |(_, text)| text.len())
            }
        };
        self.pending.capacity() + record
    }

    /// Push the next chunk of decompressed XML.
    pub fn feed(&mut self, chunk: &[u8]) {
        if chunk.is_empty() || self.failure.is_some() {
            return;
        }

        self.pending.extend_from_slice(chunk);

        // Everything up to the last '>' is complete markup, or text that will
        // be continued by the next chunk.
        let Some(boundary) = self.pending.iter().rposition(|&b| b == b'>') else {
            if self.pending.len() > MAX_PENDING_BYTES {
                warn!(
                    "Dropping {} bytes without any markup boundary",
                    self.pending.len()
                );
                self.pending.clear();
                self.skipped_chunks += 1;
            }
            return;
        };

        let buffer = std::mem::take(&mut self.pending);
        let consumed = self.consume(&buffer[..=boundary]);
        self.pending = buffer;
        self.pending.drain(..consumed);
        self.pending.shrink_to(MAX_PENDING_BYTES.min(self.pending.len() * 2));
    }

    /// Finish the stream and return the completed index.
    pub fn finish(self) -> Result<PackageIndex, ParseError> {
        if let Some(reason) = self.failure {
            return Err(ParseError::Malformed(reason));
        }
        if !self.started {
            return Err(ParseError::Empty);
        }
        if let ParserState::InPackage(acc) = &self.state {
            warn!(
                "Stream ended inside <package> {:?}; dropping partial record",
                acc.name
            );
        }
        if self.pending.iter().any(|b| !b.is_ascii_whitespace()) {
            debug!("Ignoring {} trailing bytes", self.pending.len());
        }
        if self.skipped_chunks > 0 {
            warn!(
                "Parsed {} packages with {} chunks skipped",
                self.index.len(),
                self.skipped_chunks
            );
        }

        Ok(self.index)
    }

    /// Parse `data`, returning how many bytes were fully consumed.
    fn consume(&mut self, data: &[u8]) -> usize {
        let mut reader = Reader::from_reader(data);
        reader.check_end_names(false);

        let mut consumed = 0;
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => return consumed,
                // Text running up to the cut point ends in a literal '>' and
                // may continue in the next chunk; parse it once, later.
                Ok(Event::Text(_)) if reader.buffer_position() >= data.len() => {
                    return consumed;
                }
                Ok(event) => {
                    self.handle(event);
                    consumed = reader.buffer_position();
                }
                // Markup cut off by the chunk boundary; retry with more data
                Err(quick_xml::Error::UnexpectedEof(_)) => return consumed,
                Err(e) => {
                    if !self.started {
                        warn!("Metadata stream is not valid XML: {}", e);
                        self.failure = Some(e.to_string());
                    } else {
                        warn!(
                            "Skipping malformed chunk at offset {}: {}",
                            reader.buffer_position(),
                            e
                        );
                        self.skipped_chunks += 1;
                        // The open record cannot be trusted past this point
                        self.state = ParserState::Idle;
                    }
                    return data.len();
                }
            }
        }
    }

    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.open(&tag, false),
            Event::Empty(tag) => self.open(&tag, true),
            Event::End(tag) => {
                let ParserState::InPackage(acc) = &mut self.state else {
                    return;
                };
                if acc.depth == 0 && tag.local_name().as_ref() != b"package" {
                    return;
                }
                if acc.close() {
                    self.emit();
                }
            }
            Event::Text(text) => {
                if let ParserState::InPackage(acc) = &mut self.state {
                    match text.unescape() {
                        Ok(text) => acc.push_text(&text),
                        Err(_) => acc.push_text(&String::from_utf8_lossy(&text)),
                    }
                }
            }
            Event::CData(data) => {
                if let ParserState::InPackage(acc) = &mut self.state {
                    acc.push_text(&String::from_utf8_lossy(&data));
                }
            }
            _ => {}
        }
    }

    fn open(&mut self, tag: &BytesStart, empty: bool) {
        self.started = true;
        let is_package = tag.local_name().as_ref() == b"package";

        if let ParserState::InPackage(acc) = &mut self.state {
            if !is_package {
                acc.open(tag, empty);
                return;
            }
            warn!(
                "<package> opened before the previous one closed; discarding {:?}",
                acc.name
            );
        }

        if is_package {
            self.state = ParserState::InPackage(PackageAccumulator::default());
            if empty {
                self.emit();
            }
        }
    }

    /// Finalize the open record and drop its working state.
    fn emit(&mut self) {
        let ParserState::InPackage(acc) = std::mem::take(&mut self.state) else {
            return;
        };

        // A package without a name is dropped silently
        if let Some(record) = acc.into_record() {
            self.index.insert(record.index_key(), record);
        }
    }
}

/// Parse a complete decompressed primary document in one call.
pub fn parse_primary(data: &[u8]) -> Result<PackageIndex, ParseError> {
    let mut parser = PrimaryParser::new();
    parser.feed(data);
    parser.finish()
}

fn version_from_attributes(tag: &BytesStart) -> PackageVersion {
    let mut version = PackageVersion::default();
    for (key, value) in attributes(tag) {
        match key.as_str() {
            "epoch" => version.epoch = Some(value),
            "ver" => version.ver = Some(value),
            "rel" => version.rel = Some(value),
            _ => {}
        }
    }
    version
}

fn attribute_map(tag: &BytesStart) -> BTreeMap<String, String> {
    attributes(tag).collect()
}

fn attributes<'a>(tag: &'a BytesStart<'a>) -> impl Iterator<Item = (String, String)> + 'a {
    tag.attributes().flatten().filter_map(|attr| {
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().ok()?.into_owned();
        Some((key, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="3">
<package type="rpm">
  <name>bash</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="5.1.8" rel="6.el9"/>
  <checksum type="sha256" pkgid="YES">abc</checksum>
  <summary>The GNU Bourne Again shell</summary>
  <description>The GNU Bourne Again shell (Bash) is a shell &amp; command language interpreter.</description>
  <size package="1771417" installed="7738634" archive="7756664"/>
  <format>
    <rpm:license>GPLv3+</rpm:license>
    <rpm:provides>
      <rpm:entry name="bash" flags="EQ" epoch="0" ver="5.1.8" rel="6.el9"/>
    </rpm:provides>
  </format>
</package>
<package type="rpm">
  <name>bash-completion</name>
  <arch>noarch</arch>
  <version epoch="1" ver="2.11" rel="4.el9"/>
  <summary>Programmable completion for Bash</summary>
</package>
<package type="rpm">
  <name>dash</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="0.5.11" rel="1.el9"/>
</package>
</metadata>
"#;

    fn parse_in_chunks(data: &[u8], chunk_size: usize) -> PackageIndex {
        let mut parser = PrimaryParser::new();
        for chunk in data.chunks(chunk_size) {
            parser.feed(chunk);
        }
        parser.finish().unwrap()
    }

    #[test]
    fn parse_primary_extracts_all_fields() {
        let index = parse_primary(PRIMARY.as_bytes()).unwrap();

        assert_eq!(index.len(), 3);
        let bash = &index["bash"];
        assert_eq!(
            bash,
            &PackageRecord {
                name: "bash".to_string(),
                version: Some(PackageVersion {
                    epoch: Some("0".to_string()),
                    ver: Some("5.1.8".to_string()),
                    rel: Some("6.el9".to_string()),
                }),
                arch: Some("x86_64".to_string()),
                summary: "The GNU Bourne Again shell".to_string(),
                description: Some(
                    "The GNU Bourne Again shell (Bash) is a shell & command language interpreter."
                        .to_string()
                ),
                size: Some(BTreeMap::from([
                    ("archive".to_string(), "7756664".to_string()),
                    ("installed".to_string(), "7738634".to_string()),
                    ("package".to_string(), "1771417".to_string()),
                ])),
            }
        );
    }

    #[test]
    fn missing_elements_stay_absent_except_summary() {
        let index = parse_primary(PRIMARY.as_bytes()).unwrap();
        let dash = &index["dash"];

        assert_eq!(dash.summary, "");
        assert_eq!(dash.description, None);
        assert_eq!(dash.size, None);
    }

    #[test]
    fn nested_format_entries_do_not_overwrite_package_fields() {
        let index = parse_primary(PRIMARY.as_bytes()).unwrap();

        // rpm:entry carries ver/rel too; only the direct <version> child counts
        assert_eq!(
            index["bash"].version.as_ref().and_then(|v| v.ver.clone()),
            Some("5.1.8".to_string())
        );
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(17)]
    #[case(64)]
    #[case(4096)]
    fn chunk_boundaries_do_not_change_the_result(#[case] chunk_size: usize) {
        let expected = parse_primary(PRIMARY.as_bytes()).unwrap();

        assert_eq!(parse_in_chunks(PRIMARY.as_bytes(), chunk_size), expected);
    }

    #[test]
    fn index_keys_are_lowercased_names() {
        let xml = r#"<metadata>
<package><name>NetworkManager</name></package>
<package><name>PyYAML</name></package>
</metadata>"#;

        let index = parse_primary(xml.as_bytes()).unwrap();

        for (key, record) in &index {
            assert_eq!(key, &record.name.to_lowercase());
        }
        assert!(index.contains_key("networkmanager"));
        assert!(index.contains_key("pyyaml"));
    }

    #[test]
    fn later_duplicate_name_wins() {
        let xml = r#"<metadata>
<package><name>Foo</name><arch>i686</arch></package>
<package><name>foo</name><arch>x86_64</arch></package>
</metadata>"#;

        let index = parse_primary(xml.as_bytes()).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index["foo"].arch.as_deref(), Some("x86_64"));
    }

    #[rstest]
    #[case("<metadata><package><arch>noarch</arch></package></metadata>")]
    #[case("<metadata><package><name>  </name></package></metadata>")]
    #[case("<metadata><package/></metadata>")]
    fn package_without_name_is_dropped(#[case] xml: &str) {
        let index = parse_primary(xml.as_bytes()).unwrap();

        assert!(index.is_empty());
    }

    #[test]
    fn prefixed_tags_are_matched_by_local_name() {
        let xml = r#"<c:metadata xmlns:c="http://linux.duke.edu/metadata/common">
<c:package><c:name>zsh</c:name><c:summary>Z shell</c:summary></c:package>
</c:metadata>"#;

        let index = parse_primary(xml.as_bytes()).unwrap();

        assert_eq!(index["zsh"].summary, "Z shell");
    }

    #[test]
    fn text_containing_angle_bracket_survives_chunking() {
        let xml = r#"<metadata><package><name>arrow</name><summary>maps a -> b</summary></package></metadata>"#;

        let index = parse_in_chunks(xml.as_bytes(), 5);

        assert_eq!(index["arrow"].summary, "maps a -> b");
    }

    #[test]
    fn angle_bracket_at_chunk_end_is_not_repeated() {
        let mut parser = PrimaryParser::new();
        parser.feed(b"<metadata><package><name>py</name><summary>needs python >= 3");
        parser.feed(b".9</summary></package></metadata>");

        let index = parser.finish().unwrap();

        assert_eq!(index["py"].summary, "needs python >= 3.9");
    }

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(13)]
    fn description_with_many_angle_brackets_survives_chunking(#[case] chunk_size: usize) {
        let xml = "<metadata><package><name>cmp</name>\
                   <description>a > b >> c >>> d</description></package></metadata>";

        let index = parse_in_chunks(xml.as_bytes(), chunk_size);

        assert_eq!(
            index["cmp"].description.as_deref(),
            Some("a > b >> c >>> d")
        );
    }

    #[test]
    fn cdata_text_is_captured() {
        let xml = r#"<metadata><package><name>cdata</name><description><![CDATA[uses <tags> inside]]></description></package></metadata>"#;

        let index = parse_in_chunks(xml.as_bytes(), 8);

        assert_eq!(
            index["cdata"].description.as_deref(),
            Some("uses <tags> inside")
        );
    }

    #[test]
    fn parsing_is_idempotent() {
        let first = parse_in_chunks(PRIMARY.as_bytes(), 11);
        let second = parse_in_chunks(PRIMARY.as_bytes(), 11);

        assert_eq!(first, second);
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"   \n".as_slice())]
    #[case(b"just some text".as_slice())]
    fn stream_without_elements_is_empty_error(#[case] data: &[u8]) {
        assert!(matches!(parse_primary(data), Err(ParseError::Empty)));
    }

    #[test]
    fn immediately_invalid_stream_is_malformed_error() {
        let result = parse_primary(b"<!oops><metadata></metadata>");

        assert!(matches!(result, Err(ParseError::Malformed(_))));
    }

    #[test]
    fn malformed_chunk_after_start_is_skipped() {
        let mut parser = PrimaryParser::new();
        parser.feed(b"<metadata><package><name>good</name></package>");
        parser.feed(b"<package><name>broken</name><!oops></package>");
        parser.feed(b"<package><name>after</name></package></metadata>");

        assert_eq!(parser.skipped_chunks(), 1);
        let index = parser.finish().unwrap();
        assert!(index.contains_key("good"));
        assert!(index.contains_key("after"));
        assert!(!index.contains_key("broken"));
    }

    #[test]
    fn working_state_stays_bounded_for_large_streams() {
        const PACKAGES: usize = 20_000;
        const CHUNK: usize = 1024;

        let mut parser = PrimaryParser::new();
        parser.feed(b"<metadata>");

        let mut peak = 0;
        let mut buffer = Vec::new();
        for i in 0..PACKAGES {
            buffer.extend_from_slice(
                format!(
                    "<package type=\"rpm\"><name>pkg-{i}</name><arch>x86_64</arch>\
                     <version epoch=\"0\" ver=\"1.{i}\" rel=\"1\"/>\
                     <summary>Synthetic package {i}</summary></package>\n"
                )
                .as_bytes(),
            );
            while buffer.len() >= CHUNK {
                let chunk: Vec<u8> = buffer.drain(..CHUNK).collect();
                parser.feed(&chunk);
                peak = peak.max(parser.retained_bytes());
            }
        }
        buffer.extend_from_slice(b"</metadata>");
        parser.feed(&buffer);

        // Working state is bounded by a couple of chunks, not by N
        assert!(peak < 4 * CHUNK, "retained {} bytes", peak);
        assert_eq!(parser.package_count(), PACKAGES);
        assert_eq!(parser.finish().unwrap().len(), PACKAGES);
    }
}
