//! # Block Store
//!
//! Content-addressed, write-once storage for encoded blocks.
//!
//! A block store maps a [`Cid`] (the SHA-256 digest of a block's bytes) to
//! those bytes. Blocks are never modified; storing identical bytes twice
//! yields the same CID and is a no-op the second time. Segments write every
//! snapshot of their mapping through a block store and are addressed by the
//! CID it returns.
//!
//! ## Implementations
//!
//! - [`MemoryBlockStore`]: a hash map behind a lock; for tests and
//!   ephemeral indexes.
//! - [`FileBlockStore`]: one checksummed file per block in a directory,
//!   written atomically and read through a read-only memory map.
//!
//! ## Typed access
//!
//! The [`BlockStore`] trait moves raw bytes. `dyn BlockStore` additionally
//! offers `put` and `get`, which run values through the
//! crate's deterministic [`encoding`](crate::encoding). `get` is the
//! validating read: content that does not decode to the requested type,
//! or decodes with bytes left over, is rejected as
//! [`StoreError::Malformed`].
//!
//! ## Thread safety
//!
//! Stores are `Send + Sync` and are shared between segments through
//! `Arc<dyn BlockStore>`. Concurrent puts of the same content are safe;
//! the last durable write wins, and since the bytes are identical nobody can
//! tell which one that was.


pub mod file;
pub mod memory;

pub use file::FileBlockStore;
pub use memory::MemoryBlockStore;

use std::io;

use thiserror::Error;
use tracing::warn;

use crate::cid::Cid;
use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by block store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No block is stored under this CID.
    #[error("block not found: {0}")]
    NotFound(Cid),

    /// The block exists but does not decode to the expected shape.
    #[error("malformed block {cid}: {reason}")]
    Malformed { cid: Cid, reason: String },

    /// The on-disk frame of a block failed its CRC32 check.
    #[error("checksum mismatch in block {0}")]
    ChecksumMismatch(Cid),

    /// The on-disk frame of a block is truncated or has a bad header.
    #[error("corrupt block file {cid}: {reason}")]
    Corrupt { cid: Cid, reason: String },

    /// Block content does not hash to the CID it is stored under.
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: Cid, computed: Cid },

    /// Block payload exceeds the configured maximum.
    #[error("block of {size} bytes exceeds maximum of {max}")]
    BlockTooLarge { size: usize, max: usize },

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding a value for storage failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`FileBlockStore`].
///
/// # Example
///
/// ```rust
/// use cidtable::StoreConfig;
///
/// let config = StoreConfig {
///     sync_writes: false,
///     ..StoreConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `fsync` each block file and its directory before `put` returns.
    ///
    /// Default: `true`.
    pub sync_writes: bool,

    /// Re-hash every block read from disk and compare against its CID.
    ///
    /// The CRC32 frame check always runs; this adds end-to-end content
    /// verification.
    ///
    /// Default: `true`.
    pub verify_on_read: bool,

    /// Largest block payload accepted by `put` or returned by `get`.
    ///
    /// Default: 16 MiB. Must be ≥ 1024.
    pub max_block_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_writes: true,
            verify_on_read: true,
            max_block_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.max_block_size < 1024 {
            return Err(StoreError::InvalidConfig(
                "max_block_size must be >= 1024".into(),
            ));
        }
        if self.max_block_size > encoding::MAX_BYTE_LEN as usize {
            return Err(StoreError::InvalidConfig(format!(
                "max_block_size must be <= {}",
                encoding::MAX_BYTE_LEN
            )));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// BlockStore trait
// ------------------------------------------------------------------------------------------------

/// Content-addressed, write-once block storage.
///
/// Implementations must be deterministic: `put_block` of identical bytes
/// always returns the identical CID (namely [`Cid::of`] those bytes).
pub trait BlockStore: Send + Sync {
    /// Stores `bytes` and returns their CID. Idempotent.
    fn put_block(&self, bytes: &[u8]) -> Result<Cid, StoreError>;

    /// Returns the bytes stored under `cid`, or [`StoreError::NotFound`].
    fn get_block(&self, cid: &Cid) -> Result<Vec<u8>, StoreError>;

    /// Whether a block is stored under `cid`.
    fn has_block(&self, cid: &Cid) -> Result<bool, StoreError>;
}

impl dyn BlockStore {
    /// Encodes `value` and stores it.
    pub fn put<T: Encode + ?Sized>(&self, value: &T) -> Result<Cid, StoreError> {
        let bytes = encoding::encode_to_vec(value)?;
        self.put_block(&bytes)
    }

    /// Fetches the block at `cid` and decodes it as a `T`.
    ///
    /// The whole block must decode; anything else is
    /// [`StoreError::Malformed`].
    pub fn get<T: Decode>(&self, cid: &Cid) -> Result<T, StoreError> {
        let bytes = self.get_block(cid)?;
        encoding::decode_exact::<T>(&bytes).map_err(|e| {
            warn!(%cid, error = %e, "block does not decode to expected shape");
            StoreError::Malformed {
                cid: *cid,
                reason: e.to_string(),
            }
        })
    }
}
