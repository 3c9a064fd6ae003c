//! File-backed block store.
//!
//! Every block lives in its own file, `<dir>/<cid-hex>.blk`. Files are
//! written once and never modified.
//!
//! # On-disk layout
//!
//! ```text
//! [MAGIC "CBK0"][PAYLOAD_LEN_LE u32][PAYLOAD_BYTES][PAYLOAD_CRC32_LE u32]
//! ```
//!
//! # Write path
//!
//! 1. Skip if `<cid>.blk` already exists and passes a full frame, CRC and
//!    hash check. A damaged file is replaced by the steps below.
//! 2. Write the frame to a uniquely named `*.tmp` file.
//! 3. `fsync` the file (when [`StoreConfig::sync_writes`] is set).
//! 4. Rename to `<cid>.blk` atomically.
//! 5. `fsync` the directory (when [`StoreConfig::sync_writes`] is set).
//!
//! A crash at any point leaves either no block or a complete block. Stray
//! `*.tmp` files from an interrupted write are removed on
//! [`FileBlockStore::open`].
//!
//! # Read path
//!
//! The file is memory-mapped read-only. Magic, length and CRC32 are
//! verified before the payload is copied out; with
//! [`StoreConfig::verify_on_read`] the payload is also re-hashed and
//! compared against the requested CID.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use tracing::{debug, info, trace, warn};

use super::{BlockStore, StoreConfig, StoreError};
use crate::cid::Cid;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const BLOCK_MAGIC: [u8; 4] = *b"CBK0";
const BLOCK_EXTENSION: &str = "blk";
const TMP_EXTENSION: &str = "tmp";
const BLOCK_HDR_SIZE: usize = 8;
const BLOCK_CHECKSUM_SIZE: usize = 4;

// ------------------------------------------------------------------------------------------------
// FileBlockStore
// ------------------------------------------------------------------------------------------------

/// A [`BlockStore`] that keeps one file per block in a directory.
#[derive(Debug)]
pub struct FileBlockStore {
    dir: PathBuf,
    config: StoreConfig,
    /// Disambiguates temp files of concurrent writers.
    tmp_seq: AtomicU64,
}

impl FileBlockStore {
    /// Opens (or creates) a block store rooted at `dir`.
    ///
    /// Leftover temp files from interrupted writes are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if `config` fails validation,
    /// or an I/O error if the directory cannot be created or listed.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut stale = 0usize;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == TMP_EXTENSION) {
                match fs::remove_file(&path) {
                    Ok(()) => stale += 1,
                    Err(e) => warn!(path = %path.display(), %e, "failed to remove stale temp block"),
                }
            }
        }

        info!(dir = %dir.display(), stale_tmp_removed = stale, "block store opened");

        Ok(Self {
            dir,
            config,
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// CIDs of every block on disk, in ascending order.
    ///
    /// Files whose names are not valid CIDs are ignored.
    pub fn block_cids(&self) -> Result<Vec<Cid>, StoreError> {
        let mut cids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == BLOCK_EXTENSION) {
                continue;
            }
            if let Some(cid) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<Cid>().ok())
            {
                cids.push(cid);
            }
        }
        cids.sort();
        Ok(cids)
    }

    /// Path of the file holding `cid`.
    pub fn block_path(&self, cid: &Cid) -> PathBuf {
        self.dir.join(format!("{cid}.{BLOCK_EXTENSION}"))
    }

    fn check_size(&self, size: usize) -> Result<(), StoreError> {
        if size > self.config.max_block_size {
            return Err(StoreError::BlockTooLarge {
                size,
                max: self.config.max_block_size,
            });
        }
        Ok(())
    }

    fn tmp_path(&self, cid: &Cid) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{cid}.{}.{seq}.{TMP_EXTENSION}",
            std::process::id()
        ))
    }

    /// Maps the file holding `cid`, after checking it can hold a frame.
    fn map_block(&self, cid: &Cid) -> Result<Mmap, StoreError> {
        let path = self.block_path(cid);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*cid));
            }
            Err(e) => return Err(e.into()),
        };

        let file_len = file.metadata()?.len() as usize;
        if file_len < BLOCK_HDR_SIZE + BLOCK_CHECKSUM_SIZE {
            warn!(%cid, file_len, "file store: truncated block file");
            return Err(StoreError::Corrupt {
                cid: *cid,
                reason: format!("file of {file_len} bytes is shorter than a frame"),
            });
        }

        // SAFETY: block files are only ever replaced by rename, never written
        // in place, the map is read-only, and every slice taken from it is
        // bounds-checked against `mmap.len()` first.
        Ok(unsafe { Mmap::map(&file)? })
    }

    fn check_payload(&self, cid: &Cid, payload: &[u8], verify_hash: bool) -> Result<(), StoreError> {
        self.check_size(payload.len())?;
        if verify_hash {
            let computed = Cid::of(payload);
            if computed != *cid {
                warn!(expected = %cid, %computed, "file store: content hash mismatch");
                return Err(StoreError::HashMismatch {
                    expected: *cid,
                    computed,
                });
            }
        }
        Ok(())
    }

    /// Full check of an existing block file: frame, CRC and content hash,
    /// regardless of [`StoreConfig::verify_on_read`].
    fn verify_existing(&self, cid: &Cid) -> Result<(), StoreError> {
        let mmap = self.map_block(cid)?;
        let payload = decode_frame(cid, &mmap)?;
        self.check_payload(cid, payload, true)
    }

    fn fsync_dir(&self) -> Result<(), StoreError> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }
}

impl BlockStore for FileBlockStore {
    fn put_block(&self, bytes: &[u8]) -> Result<Cid, StoreError> {
        self.check_size(bytes.len())?;

        let cid = Cid::of(bytes);
        let final_path = self.block_path(&cid);
        if final_path.exists() {
            match self.verify_existing(&cid) {
                Ok(()) => {
                    trace!(%cid, "file store: block already present");
                    return Ok(cid);
                }
                Err(e) => {
                    warn!(%cid, error = %e, "file store: existing block is damaged, rewriting");
                }
            }
        }

        let frame = encode_frame(bytes)?;
        let tmp_path = self.tmp_path(&cid);
        {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)?;
            file.write_all(&frame)?;
            if self.config.sync_writes {
                file.sync_all()?;
            }
        }

        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        if self.config.sync_writes {
            self.fsync_dir()?;
        }

        debug!(%cid, size = bytes.len(), "file store: wrote block");
        Ok(cid)
    }

    fn get_block(&self, cid: &Cid) -> Result<Vec<u8>, StoreError> {
        let mmap = self.map_block(cid)?;
        let payload = decode_frame(cid, &mmap)?;
        self.check_payload(cid, payload, self.config.verify_on_read)?;

        trace!(%cid, size = payload.len(), "file store: read block");
        Ok(payload.to_vec())
    }

    fn has_block(&self, cid: &Cid) -> Result<bool, StoreError> {
        Ok(self.block_path(cid).try_exists()?)
    }
}

// ------------------------------------------------------------------------------------------------
// Frame encoding
// ------------------------------------------------------------------------------------------------

fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, StoreError> {
    let len = u32::try_from(payload.len()).map_err(|_| StoreError::BlockTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut hasher = Crc32::new();
    hasher.update(payload);
    let checksum = hasher.finalize();

    let mut frame = Vec::with_capacity(BLOCK_HDR_SIZE + payload.len() + BLOCK_CHECKSUM_SIZE);
    frame.extend_from_slice(&BLOCK_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&checksum.to_le_bytes());
    Ok(frame)
}

/// Validates a frame and returns its payload.
fn decode_frame<'a>(cid: &Cid, frame: &'a [u8]) -> Result<&'a [u8], StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt { cid: *cid, reason };

    if frame.len() < BLOCK_HDR_SIZE + BLOCK_CHECKSUM_SIZE {
        return Err(corrupt(format!("frame of {} bytes is too short", frame.len())));
    }
    if frame[..4] != BLOCK_MAGIC {
        return Err(corrupt("bad magic".into()));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&frame[4..BLOCK_HDR_SIZE]);
    let len = u32::from_le_bytes(len_bytes) as usize;

    if frame.len() != BLOCK_HDR_SIZE + len + BLOCK_CHECKSUM_SIZE {
        return Err(corrupt(format!(
            "declared payload of {len} bytes does not match file of {} bytes",
            frame.len()
        )));
    }

    let payload = &frame[BLOCK_HDR_SIZE..BLOCK_HDR_SIZE + len];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&frame[BLOCK_HDR_SIZE + len..]);
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Crc32::new();
    hasher.update(payload);
    if hasher.finalize() != stored_crc {
        warn!(%cid, "file store: block checksum mismatch");
        return Err(StoreError::ChecksumMismatch(*cid));
    }

    Ok(payload)
}
