//! Sample formats and the conversion to the 16-bit internal representation.
//!
//! Every format is decoded from little-endian bytes and narrowed to `u16`:
//!
//! | Format  | Conversion                              |
//! |---------|-----------------------------------------|
//! | UInt8   | `v * 65535 / 255`                       |
//! | UInt16  | unchanged                               |
//! | UInt32  | `v * 65535 / 2147483647`                |
//! | UInt64  | `v * 65535 / 9223372036854775807`       |
//! | Float32 | `v * 65535` (single precision)          |
//! | Float64 | `v * 65535`                             |
//!
//! The UInt32 and UInt64 divisors are the *signed* maxima. Files written by
//! existing tools depend on that scaling, so values above the signed
//! maximum saturate at 65535.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, XisfError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl SampleFormat {
    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::UInt8   => "UInt8",
            SampleFormat::UInt16  => "UInt16",
            SampleFormat::UInt32  => "UInt32",
            SampleFormat::UInt64  => "UInt64",
            SampleFormat::Float32 => "Float32",
            SampleFormat::Float64 => "Float64",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "UInt8"   => Ok(SampleFormat::UInt8),
            "UInt16"  => Ok(SampleFormat::UInt16),
            "UInt32"  => Ok(SampleFormat::UInt32),
            "UInt64"  => Ok(SampleFormat::UInt64),
            "Float32" => Ok(SampleFormat::Float32),
            "Float64" => Ok(SampleFormat::Float64),
            other     => Err(XisfError::UnsupportedSampleFormat(other.to_owned())),
        }
    }

    /// Bytes per sample; also the shuffle item size.
    pub fn item_size(self) -> usize {
        match self {
            SampleFormat::UInt8                          => 1,
            SampleFormat::UInt16                         => 2,
            SampleFormat::UInt32 | SampleFormat::Float32 => 4,
            SampleFormat::UInt64 | SampleFormat::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleFormat::Float32 | SampleFormat::Float64)
    }

    /// Decode `count` samples from `bytes` into the internal representation.
    ///
    /// Fails if `bytes` holds fewer than `count` samples; extra bytes are
    /// ignored.
    pub fn decode(self, bytes: &[u8], count: usize) -> Result<Vec<u16>> {
        let needed = count
            .checked_mul(self.item_size())
            .ok_or_else(|| XisfError::InvalidFormat("sample count overflows".into()))?;
        if bytes.len() < needed {
            return Err(XisfError::InvalidFormat(format!(
                "pixel data holds {} bytes, {} {} samples need {}",
                bytes.len(), count, self, needed
            )));
        }
        let src = &bytes[..needed];

        Ok(match self {
            SampleFormat::UInt8 => src.iter().map(|&v| from_u8(v)).collect(),
            SampleFormat::UInt16 => {
                let mut out = vec![0u16; count];
                LittleEndian::read_u16_into(src, &mut out);
                out
            }
            SampleFormat::UInt32 => {
                let mut raw = vec![0u32; count];
                LittleEndian::read_u32_into(src, &mut raw);
                raw.into_iter().map(from_u32).collect()
            }
            SampleFormat::UInt64 => {
                let mut raw = vec![0u64; count];
                LittleEndian::read_u64_into(src, &mut raw);
                raw.into_iter().map(from_u64).collect()
            }
            SampleFormat::Float32 => {
                let mut raw = vec![0f32; count];
                LittleEndian::read_f32_into(src, &mut raw);
                raw.into_iter().map(from_f32).collect()
            }
            SampleFormat::Float64 => {
                let mut raw = vec![0f64; count];
                LittleEndian::read_f64_into(src, &mut raw);
                raw.into_iter().map(from_f64).collect()
            }
        })
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Per-format conversions ──────────────────────────────────────────────────

#[inline]
fn from_u8(v: u8) -> u16 {
    (v as f64 * (u16::MAX as f64 / u8::MAX as f64)) as u16
}

#[inline]
fn from_u32(v: u32) -> u16 {
    (v as f64 * (u16::MAX as f64 / i32::MAX as f64)) as u16
}

#[inline]
fn from_u64(v: u64) -> u16 {
    (v as f64 * (u16::MAX as f64 / i64::MAX as f64)) as u16
}

#[inline]
fn from_f32(v: f32) -> u16 {
    (v * u16::MAX as f32) as u16
}

#[inline]
fn from_f64(v: f64) -> u16 {
    (v * u16::MAX as f64) as u16
}

// ── Typed save input ────────────────────────────────────────────────────────

/// A typed sample array handed to the data block builder.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl PixelData {
    pub fn sample_format(&self) -> SampleFormat {
        match self {
            PixelData::UInt8(_)   => SampleFormat::UInt8,
            PixelData::UInt16(_)  => SampleFormat::UInt16,
            PixelData::UInt32(_)  => SampleFormat::UInt32,
            PixelData::UInt64(_)  => SampleFormat::UInt64,
            PixelData::Float32(_) => SampleFormat::Float32,
            PixelData::Float64(_) => SampleFormat::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PixelData::UInt8(v)   => v.len(),
            PixelData::UInt16(v)  => v.len(),
            PixelData::UInt32(v)  => v.len(),
            PixelData::UInt64(v)  => v.len(),
            PixelData::Float32(v) => v.len(),
            PixelData::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Little-endian byte image of the samples.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len() * self.sample_format().item_size()];
        match self {
            PixelData::UInt8(v)   => out.copy_from_slice(v),
            PixelData::UInt16(v)  => LittleEndian::write_u16_into(v, &mut out),
            PixelData::UInt32(v)  => LittleEndian::write_u32_into(v, &mut out),
            PixelData::UInt64(v)  => LittleEndian::write_u64_into(v, &mut out),
            PixelData::Float32(v) => LittleEndian::write_f32_into(v, &mut out),
            PixelData::Float64(v) => LittleEndian::write_f64_into(v, &mut out),
        }
        out
    }
}

impl From<Vec<u16>> for PixelData {
    fn from(v: Vec<u16>) -> Self {
        PixelData::UInt16(v)
    }
}

// ── Decoded image ───────────────────────────────────────────────────────────

/// Single-channel image in the 16-bit internal representation, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u16>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u16>) -> Self {
        Self { width, height, data }
    }

    /// Internal bit depth, independent of the stored sample format.
    pub const BIT_DEPTH: u32 = 16;

    pub fn pixel(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y as usize * self.width as usize + x as usize).copied()
    }
}
