//! Data-block digests for the `checksum` attribute.
//!
//! Attribute layout: `checksum="{hashtype}:{hexdigest}"`
//!
//! The digest always covers the *stored* bytes of the block, i.e. after
//! shuffling and compression. Digests are written as lowercase hex and
//! compared case-insensitively on load.

use std::fmt;

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};

use crate::error::{Result, XisfError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChecksumType {
    #[default]
    None,
    Sha1,
    Sha256,
    Sha512,
    Sha3_256,
    Sha3_512,
}

impl ChecksumType {
    /// Canonical on-disk token.
    pub fn name(self) -> &'static str {
        match self {
            ChecksumType::None     => "none",
            ChecksumType::Sha1     => "sha-1",
            ChecksumType::Sha256   => "sha-256",
            ChecksumType::Sha512   => "sha-512",
            ChecksumType::Sha3_256 => "sha3-256",
            ChecksumType::Sha3_512 => "sha3-512",
        }
    }

    /// Parse an on-disk token. Both `sha-256` and `sha256` spellings occur
    /// in the wild.
    pub fn from_token(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha-1" | "sha1"     => Some(ChecksumType::Sha1),
            "sha-256" | "sha256" => Some(ChecksumType::Sha256),
            "sha-512" | "sha512" => Some(ChecksumType::Sha512),
            "sha3-256"           => Some(ChecksumType::Sha3_256),
            "sha3-512"           => Some(ChecksumType::Sha3_512),
            _                    => None,
        }
    }

    /// Parse from a CLI string, accepting `none`.
    pub fn from_name(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("none") {
            return Some(ChecksumType::None);
        }
        Self::from_token(s)
    }

    /// Digest length in bytes; zero for `None`.
    pub fn digest_len(self) -> usize {
        match self {
            ChecksumType::None     => 0,
            ChecksumType::Sha1     => 20,
            ChecksumType::Sha256   => 32,
            ChecksumType::Sha512   => 64,
            ChecksumType::Sha3_256 => 32,
            ChecksumType::Sha3_512 => 64,
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lowercase hex digest of `data`. Returns an empty string for `None`.
pub fn digest_hex(kind: ChecksumType, data: &[u8]) -> String {
    match kind {
        ChecksumType::None     => String::new(),
        ChecksumType::Sha1     => hex::encode(Sha1::digest(data)),
        ChecksumType::Sha256   => hex::encode(Sha256::digest(data)),
        ChecksumType::Sha512   => hex::encode(Sha512::digest(data)),
        ChecksumType::Sha3_256 => hex::encode(Sha3_256::digest(data)),
        ChecksumType::Sha3_512 => hex::encode(Sha3_512::digest(data)),
    }
}

/// Parsed form of the `checksum` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumDescriptor {
    pub kind:       ChecksumType,
    pub hex_digest: String,
}

impl ChecksumDescriptor {
    /// Digest `data` with `kind`.
    pub fn compute(kind: ChecksumType, data: &[u8]) -> Self {
        Self { kind, hex_digest: digest_hex(kind, data) }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let (token, digest) = value.trim().split_once(':').ok_or_else(|| {
            XisfError::InvalidFormat(format!("checksum attribute '{value}' has no digest"))
        })?;
        let kind = ChecksumType::from_token(token)
            .ok_or_else(|| XisfError::UnsupportedChecksum(token.to_owned()))?;
        Ok(Self { kind, hex_digest: digest.trim().to_owned() })
    }

    pub fn to_attribute(&self) -> String {
        format!("{}:{}", self.kind.name(), self.hex_digest)
    }

    /// Recompute over `data` and compare, ignoring hex case.
    pub fn verify(&self, data: &[u8]) -> bool {
        digest_hex(self.kind, data).eq_ignore_ascii_case(&self.hex_digest)
    }
}
