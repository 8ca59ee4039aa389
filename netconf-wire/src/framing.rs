//! RFC 6242 message framing.
//!
//! NETCONF 1.0 terminates every message with `]]>]]>`. NETCONF 1.1 splits a
//! message into length-prefixed chunks (`\n#<len>\n<data>`) closed by `\n##\n`.
//! The `<hello>` exchange always uses the 1.0 framing; the session switches the
//! codec once both hellos have been seen.

use std::fmt::Write as _;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::Capabilities;

/// The NETCONF 1.0 end-of-message marker.
pub const EOM_DELIMITER: &[u8] = b"]]>]]>";

/// The NETCONF 1.1 end-of-chunks marker.
pub const END_OF_CHUNKS: &[u8] = b"\n##\n";

/// RFC 6242 caps chunk sizes at 4294967295, which is 10 digits.
const MAX_CHUNK_SIZE_DIGITS: usize = 10;
const MAX_CHUNK_SIZE: u64 = u32::MAX as u64;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Invalid chunk header: {0:?}")]
    InvalidChunkHeader(String),
    #[error("Chunk of {size} bytes exceeds the maximum of {max}")]
    ChunkTooLarge { size: u64, max: usize },
    #[error("Message exceeds the maximum of {max} bytes")]
    MessageTooLarge { max: usize },
    #[error("Stream ended in the middle of a message ({buffered} bytes buffered)")]
    UnexpectedEof { buffered: usize },
}

/// The framing discipline in use on a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FramingMode {
    /// NETCONF 1.0, `]]>]]>` delimited.
    #[default]
    EndOfMessage,
    /// NETCONF 1.1 chunked framing.
    Chunked,
}

impl FramingMode {
    /// Chunked framing is used iff both peers advertised base:1.1.
    pub fn negotiate(local: &Capabilities, remote: &Capabilities) -> Self {
        if local.supports_base_1_1() && remote.supports_base_1_1() {
            Self::Chunked
        } else {
            Self::EndOfMessage
        }
    }
}

/// Size limits applied by the [`Codec`].
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// The largest inbound chunk accepted in chunked mode.
    pub max_chunk_size: usize,
    /// The largest inbound message accepted in either mode.
    pub max_message_size: usize,
    /// The size outbound messages are split into in chunked mode.
    pub chunk_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_chunk_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            chunk_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Default)]
enum State {
    /// Scanning for the end-of-message marker.
    #[default]
    Scanning,
    /// Waiting for a chunk header or the end-of-chunks marker.
    ChunkHeader,
    /// Reading chunk data, with the number of bytes left in the chunk.
    ChunkData(usize),
}

/// A [`Decoder`]/[`Encoder`] for whole NETCONF messages in either framing mode.
#[derive(Debug, Default)]
pub struct Codec {
    mode: FramingMode,
    limits: Limits,
    state: State,
    /// Bytes already scanned for the end-of-message marker.
    scanned: usize,
    /// Chunk data of the message being reassembled.
    message: BytesMut,
}

impl Codec {
    /// Creates a codec in end-of-message mode, as required for `<hello>`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    #[inline]
    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Switches the framing mode. Only call this between messages.
    pub fn set_mode(&mut self, mode: FramingMode) {
        self.mode = mode;
        self.state = match mode {
            FramingMode::EndOfMessage => State::Scanning,
            FramingMode::Chunked => State::ChunkHeader,
        };
        self.scanned = 0;
        self.message.clear();
    }

    /// Whether the decoder is between messages.
    fn is_idle(&self) -> bool {
        match self.state {
            State::Scanning => true,
            State::ChunkHeader => self.message.is_empty(),
            State::ChunkData(_) => false,
        }
    }

    fn decode_eom(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Error> {
        // A marker split across reads starts at most `len - 1` bytes before the
        // end of what was already scanned.
        let start = self.scanned;
        if let Some(pos) = find(&src[start..], EOM_DELIMITER) {
            let frame = src.split_to(start + pos).freeze();
            src.advance(EOM_DELIMITER.len());
            self.scanned = 0;

            tracing::trace!(size = frame.len(), "Decoded end-of-message frame");
            return Ok(Some(frame));
        }

        if src.len() > self.limits.max_message_size {
            return Err(Error::MessageTooLarge {
                max: self.limits.max_message_size,
            });
        }

        self.scanned = src.len().saturating_sub(EOM_DELIMITER.len() - 1);
        Ok(None)
    }

    fn decode_chunked(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Error> {
        loop {
            match self.state {
                State::ChunkHeader => {
                    if src.len() < 3 {
                        return Ok(None);
                    }

                    if &src[..2] != b"\n#" {
                        return Err(invalid_header(&src[..2]));
                    }

                    if src[2] == b'#' {
                        if src.len() < END_OF_CHUNKS.len() {
                            return Ok(None);
                        }
                        if src[3] != b'\n' {
                            return Err(invalid_header(&src[..4]));
                        }

                        src.advance(END_OF_CHUNKS.len());
                        let frame = self.message.split().freeze();

                        tracing::trace!(size = frame.len(), "Decoded chunked frame");
                        return Ok(Some(frame));
                    }

                    // Look for the newline ending the chunk size
                    let window = &src[2..src.len().min(3 + MAX_CHUNK_SIZE_DIGITS)];
                    let Some(digits) = window.iter().position(|b| *b == b'\n') else {
                        if window.len() > MAX_CHUNK_SIZE_DIGITS {
                            return Err(invalid_header(window));
                        }
                        return Ok(None);
                    };

                    let size = parse_chunk_size(&window[..digits])?;
                    if size > self.limits.max_chunk_size as u64 {
                        return Err(Error::ChunkTooLarge {
                            size,
                            max: self.limits.max_chunk_size,
                        });
                    }

                    let size = size as usize;
                    if self.message.len() + size > self.limits.max_message_size {
                        return Err(Error::MessageTooLarge {
                            max: self.limits.max_message_size,
                        });
                    }

                    src.advance(2 + digits + 1);
                    self.message.reserve(size);
                    self.state = State::ChunkData(size);
                }
                State::ChunkData(remaining) => {
                    if src.is_empty() {
                        return Ok(None);
                    }

                    let n = remaining.min(src.len());
                    self.message.extend_from_slice(&src[..n]);
                    src.advance(n);

                    if n == remaining {
                        self.state = State::ChunkHeader;
                    } else {
                        self.state = State::ChunkData(remaining - n);
                        return Ok(None);
                    }
                }
                State::Scanning => self.state = State::ChunkHeader,
            }
        }
    }
}

fn invalid_header(bytes: &[u8]) -> Error {
    Error::InvalidChunkHeader(String::from_utf8_lossy(bytes).into_owned())
}

/// Parses a chunk size: 1 to 4294967295 without leading zeros.
fn parse_chunk_size(digits: &[u8]) -> Result<u64, Error> {
    let valid = !digits.is_empty()
        && digits[0] != b'0'
        && digits.iter().all(u8::is_ascii_digit);
    if !valid {
        return Err(invalid_header(digits));
    }

    let size = digits
        .iter()
        .fold(0u64, |acc, d| acc * 10 + u64::from(d - b'0'));
    if size > MAX_CHUNK_SIZE {
        return Err(invalid_header(digits));
    }

    Ok(size)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl Decoder for Codec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.mode {
            FramingMode::EndOfMessage => self.decode_eom(src),
            FramingMode::Chunked => self.decode_chunked(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        // Trailing whitespace after the last 1.0 message is harmless.
        if self.mode == FramingMode::EndOfMessage && src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
        }

        if src.is_empty() && self.is_idle() {
            Ok(None)
        } else {
            Err(Error::UnexpectedEof {
                buffered: src.len() + self.message.len(),
            })
        }
    }
}

impl Encoder<Bytes> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self.mode {
            FramingMode::EndOfMessage => {
                dst.reserve(item.len() + EOM_DELIMITER.len());
                dst.put(item);
                dst.put_slice(EOM_DELIMITER);
            }
            FramingMode::Chunked => {
                let chunk_size = self.limits.chunk_size.max(1);
                let chunks = item.len().div_ceil(chunk_size);
                dst.reserve(item.len() + chunks * (3 + MAX_CHUNK_SIZE_DIGITS) + END_OF_CHUNKS.len());

                for chunk in item.chunks(chunk_size) {
                    let _ = write!(dst, "\n#{}\n", chunk.len());
                    dst.put_slice(chunk);
                }
                dst.put_slice(END_OF_CHUNKS);
            }
        }

        Ok(())
    }
}
