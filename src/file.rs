//! Path-level API, the main embedding surface.
//!
//! ```no_run
//! use xisfcodec::file::{self, SaveOptions};
//! use xisfcodec::codec::CompressionType;
//! use xisfcodec::checksum::ChecksumType;
//! use xisfcodec::metadata::ImageMetaData;
//! use xisfcodec::sample::PixelData;
//!
//! let opts = SaveOptions {
//!     compression:    CompressionType::Lz4Hc,
//!     byte_shuffling: true,
//!     checksum:       ChecksumType::Sha256,
//!     ..SaveOptions::default()
//! };
//! let frame = PixelData::UInt16(vec![0; 640 * 480]);
//! file::save_image("light.xisf", 640, 480, &frame, &ImageMetaData::default(), &opts)?;
//!
//! let loaded = file::load("light.xisf", false)?;
//! assert_eq!(loaded.pixels.width, 640);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Each call opens, uses and drops its own file handle.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::block::DataBlock;
use crate::checksum::ChecksumType;
use crate::codec::{CompressionType, DEFAULT_COMPRESSION_LEVEL};
use crate::error::Result;
use crate::header::{Geometry, Header};
use crate::io_stream::{prepare_image, LoadedImage, XisfReader, XisfWriter};
use crate::metadata::ImageMetaData;
use crate::preamble::DEFAULT_ATTACHMENT_BUDGET;
use crate::sample::PixelData;

// ── SaveOptions ─────────────────────────────────────────────────────────────

/// How the data block is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    pub compression:       CompressionType,
    /// Codec effort; zlib takes 0-9, LZ4HC 1-12, LZ4 ignores it.
    pub compression_level: i32,
    /// Byte-shuffle before compressing. No effect without compression.
    pub byte_shuffling:    bool,
    pub checksum:          ChecksumType,
    /// Header bytes reserved for the attributes written after the data
    /// block is built.
    pub attachment_budget: usize,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            compression:       CompressionType::None,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            byte_shuffling:    false,
            checksum:          ChecksumType::None,
            attachment_budget: DEFAULT_ATTACHMENT_BUDGET,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────────────────

/// Load a monolithic XISF image. `is_bayered` is passed through untouched.
pub fn load<P: AsRef<Path>>(path: P, is_bayered: bool) -> Result<LoadedImage> {
    let file = File::open(path.as_ref())?;
    XisfReader::new(BufReader::new(file))?.read_image(is_bayered)
}

/// Read only the preamble and header.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<Header> {
    let file = File::open(path.as_ref())?;
    Ok(XisfReader::new(BufReader::new(file))?.header)
}

// ── Save ────────────────────────────────────────────────────────────────────

/// Write `header` and, if given, the data block it points at.
pub fn save<P: AsRef<Path>>(path: P, header: &Header, block: Option<&DataBlock>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    XisfWriter::new(BufWriter::new(file)).write(header, block)
}

/// Build header and data block for a single-channel image and write both.
/// Returns the block so callers can report what was stored.
pub fn save_image<P: AsRef<Path>>(
    path: P,
    width: u32,
    height: u32,
    data: &PixelData,
    metadata: &ImageMetaData,
    opts: &SaveOptions,
) -> Result<DataBlock> {
    let (header, block) = prepare_image(Geometry::new(width, height), data, metadata, opts)?;
    save(path, &header, Some(&block))?;
    Ok(block)
}
