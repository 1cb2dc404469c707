//! Fixed file preamble and the data-block layout plan.
//!
//! ```text
//! offset 0   8 B  signature "XISF0100"
//! offset 8   4 B  header length, u32 LE
//! offset 12  4 B  reserved, zero
//! offset 16  ..   UTF-8 XML header, then zero padding up to the data block
//! ```
//!
//! The data block starts on a multiple of [`PADDING_BLOCK_SIZE`]. Its
//! offset has to be written into the header before the header's final size
//! is known, so saving runs in two phases: [`LayoutPlan::new`] sizes the
//! header without the data attributes plus a fixed attribute budget, and
//! [`LayoutPlan::commit`] checks the final header still fits.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::error::{Result, XisfError};

pub const SIGNATURE: &[u8; 8] = b"XISF0100";
/// Signature + header length + reserved.
pub const PREAMBLE_SIZE: usize = 16;
pub const PADDING_BLOCK_SIZE: u64 = 1024;
/// Bytes reserved for the `location`, `compression` and `checksum`
/// attributes, which are only known after the data block is built. The
/// widest possible set (20-digit offsets and sizes, `lz4hc+sh`, a sha3-512
/// digest) serializes to 268 bytes.
pub const DEFAULT_ATTACHMENT_BUDGET: usize = 320;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub header_length: u32,
}

impl Preamble {
    pub fn new(header_length: u32) -> Self {
        Self { header_length }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(SIGNATURE)?;
        writer.write_u32::<LittleEndian>(self.header_length)?;
        writer.write_u32::<LittleEndian>(0)?;
        Ok(())
    }

    /// Reads and validates the signature before anything else.
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut signature = [0u8; 8];
        reader.read_exact(&mut signature).map_err(truncated)?;
        if &signature != SIGNATURE {
            return Err(XisfError::InvalidFormat(format!(
                "bad signature {:?}, expected \"XISF0100\"",
                String::from_utf8_lossy(&signature)
            )));
        }
        let header_length = reader.read_u32::<LittleEndian>().map_err(truncated)?;
        let _reserved = reader.read_u32::<LittleEndian>().map_err(truncated)?;
        Ok(Self { header_length })
    }

    /// Absolute offset of the first byte after the XML header.
    pub fn header_end(&self) -> u64 {
        PREAMBLE_SIZE as u64 + self.header_length as u64
    }
}

fn truncated(e: io::Error) -> XisfError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        XisfError::InvalidFormat("file is too short for an XISF preamble".into())
    } else {
        XisfError::Io(e)
    }
}

/// Smallest multiple of [`PADDING_BLOCK_SIZE`] that is `>= n`.
pub fn align_to_block(n: u64) -> u64 {
    n.div_ceil(PADDING_BLOCK_SIZE) * PADDING_BLOCK_SIZE
}

/// Phase one of a save: where the data block will go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutPlan {
    /// Header byte count before the data attributes are added.
    pub provisional_header_len: usize,
    pub attachment_budget:      usize,
    pub data_block_start:       u64,
}

impl LayoutPlan {
    pub fn new(provisional_header_len: usize, attachment_budget: usize) -> Self {
        let estimate = (provisional_header_len + PREAMBLE_SIZE + attachment_budget) as u64;
        let data_block_start = align_to_block(estimate);
        debug!(provisional_header_len, attachment_budget, data_block_start, "planned XISF layout");
        Self { provisional_header_len, attachment_budget, data_block_start }
    }

    /// Largest header that still ends at or before the data block.
    pub fn header_capacity(&self) -> usize {
        self.data_block_start as usize - PREAMBLE_SIZE
    }

    /// Phase two: confirm the final header fits, returning the number of
    /// zero padding bytes between header and data block.
    pub fn commit(&self, final_header_len: usize) -> Result<u64> {
        if final_header_len > self.header_capacity() {
            return Err(XisfError::InvalidState(format!(
                "header grew to {final_header_len} bytes, {} available before the data block \
                 (attachment budget {} bytes exceeded)",
                self.header_capacity(),
                self.attachment_budget
            )));
        }
        Ok(self.header_capacity() as u64 - final_header_len as u64)
    }
}
