//! Push-style decompression of primary metadata streams
//!
//! The container format is detected from the leading bytes of the stream,
//! never from the file name. Chunks are fed in arrival order and the
//! decompressed bytes for each chunk are returned immediately, so nothing
//! beyond the decoder's own window is held in memory.

use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const XZ_MAGIC: [u8; 6] = [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];

/// Decompression-related errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported compression signature: {signature:02x?}")]
    UnsupportedFormat { signature: Vec<u8> },

    #[error("Decoder already finished")]
    Finished,
}

/// Supported container formats for primary metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Gzip member (`1f 8b`)
    Gzip,
    /// XZ/LZMA2 container (`fd 37 7a 58 5a 00`)
    Xz,
}

impl CompressionFormat {
    /// Detect the container format from magic bytes
    ///
    /// Returns `None` when the data does not start with a known signature,
    /// including when it is too short to hold one.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.starts_with(&GZIP_MAGIC) {
            Some(Self::Gzip)
        } else if data.starts_with(&XZ_MAGIC) {
            Some(Self::Xz)
        } else {
            None
        }
    }

    /// True when `data` is a strict prefix of a known signature, i.e. more
    /// bytes are needed before a decision can be made.
    fn is_partial_magic(data: &[u8]) -> bool {
        !data.is_empty()
            && ((data.len() < GZIP_MAGIC.len() && GZIP_MAGIC.starts_with(data))
                || (data.len() < XZ_MAGIC.len() && XZ_MAGIC.starts_with(data)))
    }

    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Xz => "xz",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Write-side decoder whose output accumulates in a `Vec<u8>`
enum Inflater {
    Gzip(flate2::write::GzDecoder<Vec<u8>>),
    Xz(xz2::write::XzDecoder<Vec<u8>>),
}

impl Inflater {
    fn new(format: CompressionFormat) -> Self {
        match format {
            CompressionFormat::Gzip => Self::Gzip(flate2::write::GzDecoder::new(Vec::new())),
            CompressionFormat::Xz => Self::Xz(xz2::write::XzDecoder::new(Vec::new())),
        }
    }

    /// Write as much of `chunk` as the current member accepts and return the
    /// number of bytes consumed. Fewer than `chunk.len()` means the member
    /// ended inside this chunk.
    fn write_member(&mut self, chunk: &[u8]) -> io::Result<usize> {
        let mut consumed = 0;
        while consumed < chunk.len() {
            let written = match self {
                Self::Gzip(decoder) => decoder.write(&chunk[consumed..])?,
                Self::Xz(decoder) => decoder.write(&chunk[consumed..])?,
            };
            if written == 0 {
                break;
            }
            consumed += written;
        }
        Ok(consumed)
    }

    /// Push everything decoded so far into the output buffer
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Gzip(decoder) => decoder.flush(),
            Self::Xz(decoder) => decoder.flush(),
        }
    }

    fn take_output(&mut self) -> Vec<u8> {
        match self {
            Self::Gzip(decoder) => std::mem::take(decoder.get_mut()),
            Self::Xz(decoder) => std::mem::take(decoder.get_mut()),
        }
    }

    /// Finish the member, returning the remaining output and whether the
    /// member was complete and intact. The inflater must not be used again.
    fn finish(&mut self) -> (Vec<u8>, io::Result<()>) {
        match self {
            Self::Gzip(decoder) => {
                let result = decoder.try_finish();
                (std::mem::take(decoder.get_mut()), result)
            }
            Self::Xz(decoder) => match decoder.finish() {
                Ok(output) => (output, Ok(())),
                Err(e) => (std::mem::take(decoder.get_mut()), Err(e)),
            },
        }
    }
}

enum DecoderState {
    /// Collecting leading bytes until the signature can be decided.
    /// `after_member` is set once at least one member has been decoded.
    Sniffing { header: Vec<u8>, after_member: bool },
    Decoding {
        format: CompressionFormat,
        inflater: Inflater,
    },
    /// Unrecognized bytes followed a complete member; the rest is ignored
    Trailing,
    Rejected,
    Finished,
}

/// Single-pass, forward-only decoder for one metadata stream
///
/// Concatenated members (`gzip a b > c`) are decoded back to back. Zero
/// padding after a member is skipped, and any other trailing bytes are
/// ignored.
///
/// A fresh instance is required per stream.
pub struct StreamDecoder {
    state: DecoderState,
    total_out: u64,
    skipped_chunks: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Sniffing {
                header: Vec::new(),
                after_member: false,
            },
            total_out: 0,
            skipped_chunks: 0,
        }
    }

    /// Detected container format, once known
    pub fn format(&self) -> Option<CompressionFormat> {
        match self.state {
            DecoderState::Decoding { format, .. } => Some(format),
            _ => None,
        }
    }

    /// Total number of decompressed bytes produced so far
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Number of input chunks whose output was dropped after a decoder error
    pub fn skipped_chunks(&self) -> usize {
        self.skipped_chunks
    }

    /// Feed the next compressed chunk and return the bytes it decompressed to.
    ///
    /// Fails with [`DecodeError::UnsupportedFormat`] as soon as the leading
    /// bytes rule out every known signature; the stream should be abandoned.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<u8>, DecodeError> {
        match self.state {
            DecoderState::Sniffing { .. } => self.sniff(chunk),
            DecoderState::Decoding { .. } => Ok(self.inflate(chunk)),
            DecoderState::Trailing => Ok(Vec::new()),
            DecoderState::Rejected => Err(DecodeError::UnsupportedFormat {
                signature: Vec::new(),
            }),
            DecoderState::Finished => Err(DecodeError::Finished),
        }
    }

    /// Flush the decoder at end of stream and return any remaining output.
    pub fn finish(&mut self) -> Result<Vec<u8>, DecodeError> {
        match std::mem::replace(&mut self.state, DecoderState::Finished) {
            DecoderState::Sniffing {
                header,
                after_member: true,
            } => {
                if !header.is_empty() {
                    debug!("Ignoring {} trailing bytes", header.len());
                }
                Ok(Vec::new())
            }
            DecoderState::Sniffing { header, .. } if header.is_empty() => Ok(Vec::new()),
            DecoderState::Sniffing {
                header,
                after_member,
            } => {
                // Stream ended inside a signature prefix
                self.state = DecoderState::Sniffing {
                    header,
                    after_member,
                };
                Err(self.reject())
            }
            DecoderState::Decoding {
                format,
                mut inflater,
            } => {
                let (output, result) = inflater.finish();
                if let Err(e) = result {
                    warn!("Failed to finish {} stream: {}", format, e);
                }
                self.total_out += output.len() as u64;
                Ok(output)
            }
            DecoderState::Trailing => Ok(Vec::new()),
            DecoderState::Rejected => {
                self.state = DecoderState::Rejected;
                Err(DecodeError::UnsupportedFormat {
                    signature: Vec::new(),
                })
            }
            DecoderState::Finished => Err(DecodeError::Finished),
        }
    }

    fn sniff(&mut self, chunk: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let DecoderState::Sniffing {
            header,
            after_member,
        } = &mut self.state
        else {
            return Ok(Vec::new());
        };

        header.extend_from_slice(chunk);
        if *after_member {
            // Zero padding between or after members
            let padding = header.iter().take_while(|&&b| b == 0).count();
            header.drain(..padding);
        }

        if let Some(format) = CompressionFormat::from_magic_bytes(header) {
            let header = std::mem::take(header);
            debug!("Detected {} container", format);
            self.state = DecoderState::Decoding {
                format,
                inflater: Inflater::new(format),
            };
            return Ok(self.inflate(&header));
        }
        if header.is_empty() || CompressionFormat::is_partial_magic(header) {
            return Ok(Vec::new());
        }
        if *after_member {
            warn!(
                "Ignoring unrecognized data after the last member ({:02x?})",
                &header[..header.len().min(XZ_MAGIC.len())]
            );
            self.state = DecoderState::Trailing;
            return Ok(Vec::new());
        }
        Err(self.reject())
    }

    fn reject(&mut self) -> DecodeError {
        let signature = match &self.state {
            DecoderState::Sniffing { header, .. } => {
                header.iter().take(XZ_MAGIC.len()).copied().collect()
            }
            _ => Vec::new(),
        };
        self.state = DecoderState::Rejected;
        DecodeError::UnsupportedFormat { signature }
    }

    fn inflate(&mut self, chunk: &[u8]) -> Vec<u8> {
        let DecoderState::Decoding { format, inflater } = &mut self.state else {
            return Vec::new();
        };
        let format = *format;

        let result = inflater
            .write_member(chunk)
            .and_then(|consumed| inflater.flush().map(|()| consumed));

        match result {
            Ok(consumed) if consumed == chunk.len() => {
                let output = inflater.take_output();
                self.total_out += output.len() as u64;
                output
            }
            Ok(consumed) => {
                let mut output = self.end_member();
                // The member ended inside this chunk; whatever follows is
                // another member, padding or trailing junk.
                if let Ok(next) = self.sniff(&chunk[consumed..]) {
                    output.extend(next);
                }
                output
            }
            Err(e) => {
                // Mirrors occasionally serve a corrupted range; drop this
                // chunk's output and keep going. Earlier chunks were already
                // flushed to the caller.
                drop(inflater.take_output());
                self.skipped_chunks += 1;
                warn!(
                    "Skipping corrupted {} chunk of {} bytes: {}",
                    format,
                    chunk.len(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Close the current member and go back to sniffing for the next one.
    fn end_member(&mut self) -> Vec<u8> {
        let next = DecoderState::Sniffing {
            header: Vec::new(),
            after_member: true,
        };
        let DecoderState::Decoding {
            format,
            mut inflater,
        } = std::mem::replace(&mut self.state, next)
        else {
            return Vec::new();
        };

        let (output, result) = inflater.finish();
        if let Err(e) = result {
            warn!("{} member ended with an invalid trailer: {}", format, e);
        }
        self.total_out += output.len() as u64;
        debug!("End of {} member, {} bytes decoded", format, self.total_out);
        output
    }
}
