//! Content identifiers.
//!
//! A [`Cid`] is the SHA-256 digest of a block's encoded bytes. Two CIDs are
//! equal exactly when the blocks they name are bit-identical, so a CID can
//! be compared, hashed and copied freely but never "updated": a changed
//! block is a different CID.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::encoding::{Decode, Encode, EncodingError};

/// Length of a CID digest in bytes.
pub const CID_LEN: usize = 32;

/// A content identifier: the SHA-256 digest of a block.
///
/// `Display` renders 64 lowercase hex characters; [`FromStr`] accepts only
/// that form.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cid([u8; CID_LEN]);

impl Cid {
    /// Computes the CID of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; CID_LEN] {
        &self.0
    }

    /// Returns `true` if `bytes` hash to this CID.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        Self::of(bytes) == *self
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

/// Error returned when parsing a [`Cid`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCidError {
    #[error("expected {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid hex character {0:?}")]
    InvalidChar(char),
}

impl FromStr for Cid {
    type Err = ParseCidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.as_bytes();
        if raw.len() != CID_LEN * 2 {
            return Err(ParseCidError::InvalidLength {
                expected: CID_LEN * 2,
                actual: raw.len(),
            });
        }

        let mut digest = [0u8; CID_LEN];
        for (i, pair) in raw.chunks_exact(2).enumerate() {
            digest[i] = (hex_nibble(pair[0])? << 4) | hex_nibble(pair[1])?;
        }
        Ok(Self(digest))
    }
}

/// Lowercase only, matching `Display`, so every CID has one textual form.
fn hex_nibble(c: u8) -> Result<u8, ParseCidError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        other => Err(ParseCidError::InvalidChar(other as char)),
    }
}

impl Encode for Cid {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl Decode for Cid {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (digest, n) = <[u8; CID_LEN]>::decode_from(buf)?;
        Ok((Self(digest), n))
    }
}
