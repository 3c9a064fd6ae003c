//! # cidtable
//!
//! Sorted, size-tiered tables of identifier → CID entries, persisted
//! copy-on-write to a content-addressed block store.
//!
//! A [`Segment`] holds an ordered mapping from identifiers (by default
//! UTC [`Timestamp`]s) to content identifiers ([`Cid`]). Every mutation
//! writes a new immutable block holding the whole mapping, so a segment's
//! CID always names a complete snapshot of its contents and old snapshots
//! stay loadable. Segments fill up according to their [`SizeTier`] and are
//! combined with [`Segment::merge`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cidtable::{BlockStore, Cid, FileBlockStore, Segment, StoreConfig, Timestamp};
//!
//! let store: Arc<dyn BlockStore> =
//!     Arc::new(FileBlockStore::open("/tmp/cidtable", StoreConfig::default()).unwrap());
//!
//! // Write
//! let mut segment = Segment::create(store.clone()).unwrap();
//! let id: Timestamp = "2024-01-01T00:00:00Z".parse().unwrap();
//! segment.add_entry(id, Cid::of(b"record")).unwrap();
//!
//! // Read
//! assert_eq!(segment.get_entry(&id), Some(Cid::of(b"record")));
//!
//! // Reload the snapshot by CID
//! let reloaded = Segment::<Timestamp>::load(store, segment.cid()).unwrap();
//! assert_eq!(reloaded.ids(false), [id]);
//! ```
//!
//! ## Features
//!
//! - **Copy-on-write** persistence: mutations never overwrite a block.
//! - **Size tiers** of 100, 400, 1600 and 6400 entries.
//! - **Conflict-checked merge** of segments covering disjoint identifiers.
//! - **Integrity checks** on disk: CRC32 framing plus SHA-256 verification.

pub mod encoding;
pub mod store;

mod cid;
mod key;
mod segment;

pub use cid::{CID_LEN, Cid, ParseCidError};
pub use key::{KeyError, SegmentKey, Timestamp};
pub use segment::{Entry, ParseTierError, Segment, SegmentError, SizeTier};
pub use store::{BlockStore, FileBlockStore, MemoryBlockStore, StoreConfig, StoreError};
