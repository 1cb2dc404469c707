//! Compression registry for XISF data blocks.
//!
//! # Identity rules
//! A codec is identified on disk by the leading token of the `compression`
//! attribute of the `Image` element:
//!
//! ```text
//! compression="{codec}[+sh]:{uncompressedSize}[:{itemSize}]"
//! ```
//!
//! The `+sh` suffix marks a byte-shuffled block and requires the trailing
//! item size. Tokens are matched case-sensitively, exactly as written by
//! other XISF implementations.
//!
//! # Size contract
//! LZ4 block streams do not record their decoded length, so every
//! `decompress` call receives the declared uncompressed size from the
//! header. A decoded length that disagrees with the declaration is the
//! caller's business to report; the codec returns whatever it decoded.

use std::fmt;
use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::error::{Result, XisfError};

/// Zlib and LZ4HC effort used when the caller does not pick one.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 6;

/// Suffix appended to the codec token when the block is byte-shuffled.
pub const SHUFFLE_SUFFIX: &str = "+sh";

/// Highest LZ4HC effort the encoder accepts.
pub const LZ4HC_MAX_LEVEL: i32 = 12;

const LZ4_MAX_EXPANSION: usize = 255;
/// Zlib output is preallocated up to this multiple of the input; the
/// decoder grows past it on demand.
const ZLIB_PREALLOC_RATIO: usize = 4;

// ── CompressionType ─────────────────────────────────────────────────────────

/// Runtime codec discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionType {
    #[default]
    None,
    Lz4,
    Lz4Hc,
    Zlib,
}

impl CompressionType {
    /// Token written before the `+sh` suffix. `None` has no on-disk token.
    pub fn name(self) -> &'static str {
        match self {
            CompressionType::None  => "none",
            CompressionType::Lz4   => "lz4",
            CompressionType::Lz4Hc => "lz4hc",
            CompressionType::Zlib  => "zlib",
        }
    }

    /// Parse an on-disk token (without the `+sh` suffix).
    pub fn from_token(s: &str) -> Option<Self> {
        match s {
            "lz4"   => Some(CompressionType::Lz4),
            "lz4hc" => Some(CompressionType::Lz4Hc),
            "zlib"  => Some(CompressionType::Zlib),
            _       => None,
        }
    }

    /// Parse from a CLI string. Accepts `none` as well as the on-disk tokens.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(CompressionType::None),
            other  => Self::from_token(other),
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── CompressionDescriptor ───────────────────────────────────────────────────

/// Parsed form of the `compression` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionDescriptor {
    pub codec:             CompressionType,
    pub uncompressed_size: u64,
    pub shuffled:          bool,
    /// Only meaningful when `shuffled` is set.
    pub item_size:         u32,
}

impl CompressionDescriptor {
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = value.trim().split(':');
        let token = parts.next().unwrap_or_default();
        let (codec_token, shuffled) = match token.strip_suffix(SHUFFLE_SUFFIX) {
            Some(base) => (base, true),
            None       => (token, false),
        };
        let codec = CompressionType::from_token(codec_token)
            .ok_or_else(|| XisfError::UnsupportedCompression(token.to_owned()))?;

        let uncompressed_size = parts
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| XisfError::InvalidFormat(
                format!("compression attribute '{value}' has no valid uncompressed size")))?;

        let item_size = if shuffled {
            parts
                .next()
                .and_then(|s| s.parse::<u32>().ok())
                .filter(|&k| k > 0)
                .ok_or_else(|| XisfError::InvalidFormat(
                    format!("compression attribute '{value}' has no valid item size")))?
        } else {
            0
        };

        Ok(Self { codec, uncompressed_size, shuffled, item_size })
    }

    /// Codec token as written on disk, e.g. `lz4+sh`.
    pub fn codec_name(&self) -> String {
        if self.shuffled {
            format!("{}{}", self.codec.name(), SHUFFLE_SUFFIX)
        } else {
            self.codec.name().to_owned()
        }
    }

    /// Attribute value, e.g. `zlib+sh:131072:2`.
    pub fn to_attribute(&self) -> String {
        if self.shuffled {
            format!("{}:{}:{}", self.codec_name(), self.uncompressed_size, self.item_size)
        } else {
            format!("{}:{}", self.codec_name(), self.uncompressed_size)
        }
    }
}

// ── Error type ──────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{codec} compression error: {message}")]
    Compression { codec: CompressionType, message: String },
    #[error("{codec} decompression error: {message}")]
    Decompression { codec: CompressionType, message: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ─────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn compression_type(&self) -> CompressionType;
    fn compress(&self, data: &[u8], level: i32) -> std::result::Result<Vec<u8>, CodecError>;
    fn decompress(
        &self,
        data: &[u8],
        uncompressed_size: usize,
    ) -> std::result::Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn compression_type(&self) -> CompressionType { CompressionType::None }
    fn compress(&self, data: &[u8], _: i32) -> std::result::Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
    fn decompress(&self, data: &[u8], _: usize) -> std::result::Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
}

/// Raw LZ4 block stream, no size prefix.
pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn compression_type(&self) -> CompressionType { CompressionType::Lz4 }
    fn compress(&self, data: &[u8], _: i32) -> std::result::Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::block::compress(data))
    }
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> std::result::Result<Vec<u8>, CodecError> {
        lz4_decompress(CompressionType::Lz4, data, uncompressed_size)
    }
}

/// LZ4 high-compression. The encoder searches harder for matches; the
/// output is an ordinary LZ4 block and decodes with the fast decoder.
pub struct Lz4HcCodec;
impl Codec for Lz4HcCodec {
    fn compression_type(&self) -> CompressionType { CompressionType::Lz4Hc }
    fn compress(&self, data: &[u8], level: i32) -> std::result::Result<Vec<u8>, CodecError> {
        let mode = lz4::block::CompressionMode::HIGHCOMPRESSION(level.clamp(1, LZ4HC_MAX_LEVEL));
        lz4::block::compress(data, Some(mode), false).map_err(|e| CodecError::Compression {
            codec: CompressionType::Lz4Hc,
            message: e.to_string(),
        })
    }
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> std::result::Result<Vec<u8>, CodecError> {
        lz4_decompress(CompressionType::Lz4Hc, data, uncompressed_size)
    }
}

fn lz4_decompress(
    codec: CompressionType,
    data: &[u8],
    uncompressed_size: usize,
) -> std::result::Result<Vec<u8>, CodecError> {
    // A literal-free LZ4 sequence expands at most 255x, so no valid block
    // decodes past this. Larger declarations are only trusted up to it.
    let limit = data.len().saturating_mul(LZ4_MAX_EXPANSION).saturating_add(LZ4_MAX_EXPANSION);
    lz4_flex::block::decompress(data, uncompressed_size.min(limit))
        .map_err(|e| CodecError::Decompression { codec, message: e.to_string() })
}

/// zlib container around DEFLATE.
pub struct ZlibCodec;
impl Codec for ZlibCodec {
    fn compression_type(&self) -> CompressionType { CompressionType::Zlib }
    fn compress(&self, data: &[u8], level: i32) -> std::result::Result<Vec<u8>, CodecError> {
        let level = level.clamp(0, 9) as u32;
        let mut enc = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
        enc.write_all(data).map_err(|e| CodecError::Compression {
            codec: CompressionType::Zlib,
            message: e.to_string(),
        })?;
        enc.finish().map_err(|e| CodecError::Compression {
            codec: CompressionType::Zlib,
            message: e.to_string(),
        })
    }
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> std::result::Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(uncompressed_size.min(data.len().saturating_mul(ZLIB_PREALLOC_RATIO)));
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression {
                codec: CompressionType::Zlib,
                message: e.to_string(),
            })?;
        Ok(out)
    }
}

// ── Factory ─────────────────────────────────────────────────────────────────

/// Resolve a compression type to its built-in codec.
pub fn get_codec(kind: CompressionType) -> Box<dyn Codec> {
    match kind {
        CompressionType::None  => Box::new(NoneCodec),
        CompressionType::Lz4   => Box::new(Lz4Codec),
        CompressionType::Lz4Hc => Box::new(Lz4HcCodec),
        CompressionType::Zlib  => Box::new(ZlibCodec),
    }
}
