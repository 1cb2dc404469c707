//! Data block pipeline.
//!
//! Save: `samples -> LE bytes -> [shuffle] -> [compress] -> checksum`.
//! If compression makes the block larger than the raw bytes, the raw
//! (unshuffled) bytes are stored instead and the block is declared
//! uncompressed.
//!
//! Load: `stored bytes -> verify checksum -> [decompress] -> [unshuffle]`.
//! A checksum mismatch or a decoded size that disagrees with the header is
//! reported as a [`LoadWarning`], never as an error.

use std::fmt;

use tracing::{debug, warn};

use crate::checksum::{ChecksumDescriptor, ChecksumType};
use crate::codec::{get_codec, CompressionDescriptor, CompressionType};
use crate::error::Result;
use crate::file::SaveOptions;
use crate::sample::PixelData;
use crate::shuffle::{shuffle, unshuffle};

/// Advisory conditions raised while loading. The load still succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    ChecksumMismatch { kind: ChecksumType, expected: String, actual: String },
    SizeMismatch { declared: u64, actual: u64 },
    MetadataUnavailable(String),
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::ChecksumMismatch { kind, expected, actual } => write!(
                f, "{kind} checksum mismatch: header says {expected}, data hashes to {actual}"
            ),
            LoadWarning::SizeMismatch { declared, actual } => write!(
                f, "decompressed {actual} bytes, header declares {declared}"
            ),
            LoadWarning::MetadataUnavailable(reason) => write!(
                f, "image metadata could not be read: {reason}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    bytes:             Vec<u8>,
    uncompressed_size: u64,
    compression:       Option<CompressionDescriptor>,
    checksum:          Option<ChecksumDescriptor>,
}

impl DataBlock {
    /// Build the stored form of a typed sample array.
    pub fn encode(data: &PixelData, opts: &SaveOptions) -> Result<Self> {
        Self::encode_bytes(data.to_le_bytes(), data.sample_format().item_size(), opts)
    }

    /// Build the stored form of raw little-endian sample bytes.
    pub fn encode_bytes(raw: Vec<u8>, item_size: usize, opts: &SaveOptions) -> Result<Self> {
        let uncompressed_size = raw.len() as u64;

        let (bytes, compression) = match opts.compression {
            CompressionType::None => (raw, None),
            kind => {
                let shuffled = opts.byte_shuffling && item_size > 1;
                let packed = {
                    let input = if shuffled { shuffle(&raw, item_size) } else { raw.clone() };
                    get_codec(kind).compress(&input, opts.compression_level)?
                };
                if packed.len() > raw.len() {
                    debug!(
                        codec = %kind,
                        raw = raw.len(),
                        compressed = packed.len(),
                        "compression grew the block, storing uncompressed"
                    );
                    (raw, None)
                } else {
                    let descriptor = CompressionDescriptor {
                        codec: kind,
                        uncompressed_size,
                        shuffled,
                        item_size: if shuffled { item_size as u32 } else { 0 },
                    };
                    (packed, Some(descriptor))
                }
            }
        };

        let checksum = match opts.checksum {
            ChecksumType::None => None,
            kind               => Some(ChecksumDescriptor::compute(kind, &bytes)),
        };

        Ok(Self { bytes, uncompressed_size, compression, checksum })
    }

    /// Wrap bytes read from a file together with the header's descriptors.
    pub fn from_stored(
        bytes: Vec<u8>,
        compression: Option<CompressionDescriptor>,
        checksum: Option<ChecksumDescriptor>,
    ) -> Self {
        let uncompressed_size = compression
            .map(|c| c.uncompressed_size)
            .unwrap_or(bytes.len() as u64);
        Self { bytes, uncompressed_size, compression, checksum }
    }

    /// Verify, decompress and unshuffle. Returns the logical sample bytes
    /// and any advisory warnings.
    pub fn decode(&self) -> Result<(Vec<u8>, Vec<LoadWarning>)> {
        let mut warnings = Vec::new();

        if let Some(expected) = &self.checksum {
            if !expected.verify(&self.bytes) {
                let actual = crate::checksum::digest_hex(expected.kind, &self.bytes);
                warn!(kind = %expected.kind, expected = %expected.hex_digest, %actual, "data block checksum mismatch");
                warnings.push(LoadWarning::ChecksumMismatch {
                    kind:     expected.kind,
                    expected: expected.hex_digest.clone(),
                    actual,
                });
            }
        }

        let Some(desc) = &self.compression else {
            return Ok((self.bytes.clone(), warnings));
        };

        // The declared size is only a hint; codecs bound it by what the
        // stored bytes can expand to.
        let declared = usize::try_from(desc.uncompressed_size).unwrap_or(usize::MAX);
        let mut out = get_codec(desc.codec).decompress(&self.bytes, declared)?;
        if out.len() as u64 != desc.uncompressed_size {
            warn!(declared = desc.uncompressed_size, actual = out.len(), "decompressed size mismatch");
            warnings.push(LoadWarning::SizeMismatch {
                declared: desc.uncompressed_size,
                actual:   out.len() as u64,
            });
        }
        if desc.shuffled {
            out = unshuffle(&out, desc.item_size as usize);
        }
        Ok((out, warnings))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Bytes as written to the file.
    pub fn stored_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Bytes before compression.
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn compression(&self) -> Option<&CompressionDescriptor> {
        self.compression.as_ref()
    }

    pub fn checksum(&self) -> Option<&ChecksumDescriptor> {
        self.checksum.as_ref()
    }

    /// Effective codec token, e.g. `lz4+sh`, or `none`.
    pub fn codec_name(&self) -> String {
        self.compression
            .map(|c| c.codec_name())
            .unwrap_or_else(|| CompressionType::None.name().to_owned())
    }

    /// Effective checksum token, e.g. `sha-256`, or `none`.
    pub fn checksum_name(&self) -> &'static str {
        self.checksum
            .as_ref()
            .map(|c| c.kind.name())
            .unwrap_or(ChecksumType::None.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(compression: CompressionType, shuffle: bool, checksum: ChecksumType) -> SaveOptions {
        SaveOptions {
            compression,
            byte_shuffling: shuffle,
            checksum,
            ..SaveOptions::default()
        }
    }

    fn ramp(n: usize) -> PixelData {
        PixelData::UInt16((0..n).map(|i| (i % 4096) as u16 * 16).collect())
    }

    #[test]
    fn plain_block_is_verbatim() {
        let data = ramp(64);
        let block = DataBlock::encode(&data, &SaveOptions::default()).unwrap();
        assert_eq!(block.bytes(), data.to_le_bytes().as_slice());
        assert_eq!(block.codec_name(), "none");
        assert_eq!(block.checksum_name(), "none");
        assert_eq!(block.stored_size(), 128);
    }

    #[test]
    fn shuffled_compression_roundtrips() {
        let data = ramp(10_000);
        for kind in [CompressionType::Lz4, CompressionType::Lz4Hc, CompressionType::Zlib] {
            let block = DataBlock::encode(&data, &opts(kind, true, ChecksumType::Sha256)).unwrap();
            let desc = block.compression().unwrap();
            assert!(desc.shuffled);
            assert_eq!(desc.item_size, 2);
            assert_eq!(block.codec_name(), format!("{}+sh", kind.name()));
            assert!(block.stored_size() < block.uncompressed_size());

            let stored = DataBlock::from_stored(
                block.bytes().to_vec(),
                block.compression().copied(),
                block.checksum().cloned(),
            );
            let (bytes, warnings) = stored.decode().unwrap();
            assert!(warnings.is_empty());
            assert_eq!(bytes, data.to_le_bytes());
        }
    }

    #[test]
    fn shuffle_is_skipped_for_single_byte_samples() {
        let data = PixelData::UInt8(vec![3; 4096]);
        let block = DataBlock::encode(&data, &opts(CompressionType::Zlib, true, ChecksumType::None)).unwrap();
        assert_eq!(block.codec_name(), "zlib");
    }

    #[test]
    fn checksum_covers_stored_bytes() {
        let data = ramp(2048);
        let block = DataBlock::encode(&data, &opts(CompressionType::Zlib, false, ChecksumType::Sha1)).unwrap();
        let sum = block.checksum().unwrap();
        assert_eq!(block.checksum_name(), "sha-1");
        assert!(sum.verify(block.bytes()));
        assert!(!sum.verify(&data.to_le_bytes()));
    }

    #[test]
    fn checksum_mismatch_is_a_warning() {
        let data = ramp(256);
        let block = DataBlock::encode(&data, &opts(CompressionType::None, false, ChecksumType::Sha256)).unwrap();
        let mut bytes = block.bytes().to_vec();
        bytes[10] ^= 0xFF;
        let corrupted = DataBlock::from_stored(bytes.clone(), None, block.checksum().cloned());
        let (decoded, warnings) = corrupted.decode().unwrap();
        assert_eq!(decoded, bytes);
        assert!(matches!(warnings.as_slice(), [LoadWarning::ChecksumMismatch { kind: ChecksumType::Sha256, .. }]));
    }

    #[test]
    fn size_mismatch_is_a_warning() {
        let raw = vec![5u8; 1000];
        let packed = get_codec(CompressionType::Zlib).compress(&raw, 6).unwrap();
        let desc = CompressionDescriptor {
            codec: CompressionType::Zlib,
            uncompressed_size: 1200,
            shuffled: false,
            item_size: 0,
        };
        let (decoded, warnings) = DataBlock::from_stored(packed, Some(desc), None).decode().unwrap();
        assert_eq!(decoded, raw);
        assert_eq!(warnings, vec![LoadWarning::SizeMismatch { declared: 1200, actual: 1000 }]);
    }

    #[test]
    fn absurd_declared_size_is_a_warning() {
        let raw = vec![5u8; 1000];
        for kind in [CompressionType::Zlib, CompressionType::Lz4] {
            let packed = get_codec(kind).compress(&raw, 6).unwrap();
            let desc = CompressionDescriptor {
                codec: kind,
                uncompressed_size: u64::MAX,
                shuffled: false,
                item_size: 0,
            };
            let (decoded, warnings) = DataBlock::from_stored(packed, Some(desc), None).decode().unwrap();
            assert_eq!(decoded, raw, "{kind}");
            assert_eq!(warnings, vec![LoadWarning::SizeMismatch { declared: u64::MAX, actual: 1000 }]);
        }
    }
}
