//! Error taxonomy for loading and saving XISF files.
//!
//! Everything here aborts the current load or save. Advisory conditions
//! (checksum mismatch, decompressed-size mismatch) are reported through
//! [`crate::block::LoadWarning`] instead.

use std::io;
use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum XisfError {
    /// Bad signature, unparseable header, or a data block that cannot be
    /// located or decoded.
    #[error("Invalid XISF file: {0}")]
    InvalidFormat(String),
    #[error("Invalid image geometry: {0}")]
    InvalidGeometry(String),
    #[error("Unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),
    #[error("Unsupported compression codec: {0}")]
    UnsupportedCompression(String),
    #[error("Unsupported checksum type: {0}")]
    UnsupportedChecksum(String),
    /// The caller asked for something the current header cannot express,
    /// e.g. writing a data block without a `location`.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("XML error: {0}")]
    Xml(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, XisfError>;
