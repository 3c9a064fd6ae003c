//! # Segment
//!
//! A **segment** (sorted table) is an ordered mapping from identifiers to
//! CIDs, persisted as a single block in a content-addressed
//! [`BlockStore`]. It is the building block of a size-tiered index: small
//! segments accept new entries until full, and are later merged into larger
//! ones.
//!
//! ## Copy-on-write persistence
//!
//! The block store is write-once, so there is no in-place update. Every
//! mutation re-encodes the **whole** mapping, stores it, and replaces the
//! segment's [`cid`](Segment::cid) with the new block's CID before
//! returning. A segment therefore always names a durable snapshot of
//! exactly what it holds in memory.
//!
//! Mutations are atomic from the caller's point of view: all checks run
//! first, then the store write; if the write fails the in-memory mapping is
//! restored, so mapping and CID never diverge.
//!
//! ## Ordering
//!
//! Entries are keyed by the identifier's canonical string
//! ([`SegmentKey::to_key`]). Because that string sorts the same way as the
//! identifier, enumeration in key order is chronological for time-ordered
//! identifiers.
//!
//! ## Capacity
//!
//! The [`SizeTier`] is derived from the entry count. Single inserts are
//! refused once the segment fills its tier; batch inserts and merges may
//! move a segment up one or more tiers but never past
//! [`SizeTier::MAX_CAPACITY`].
//!
//! ## Concurrency
//!
//! A `Segment` is a plain value: mutating methods take `&mut self`, so one
//! instance has exactly one writer. Different instances may share a store;
//! coordinating them is the caller's business.

#[cfg(test)]
mod tests;

mod encoding_impls;
mod merge;
pub mod tier;

pub use tier::{ParseTierError, SizeTier};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::cid::Cid;
use crate::key::{SegmentKey, Timestamp};
use crate::store::{BlockStore, StoreError};
use encoding_impls::{MappingRef, RawMapping};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Segment`] operations.
///
/// None of these are transient: retrying the same call on the same segment
/// fails the same way. Only [`SegmentError::Store`] wraps faults of the
/// underlying storage that a caller might retry.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// No entry exists for this identifier.
    #[error("entry does not exist for id {0}")]
    NotFound(String),

    /// The block store holds nothing at this CID.
    #[error("no segment block at {0}")]
    BlockNotFound(Cid),

    /// An entry already exists for this identifier.
    #[error("entry already exists for id {0}")]
    DuplicateEntry(String),

    /// The segment has reached the capacity of its tier.
    #[error("segment is full ({len} entries in tier {tier})")]
    TableFull { tier: SizeTier, len: usize },

    /// Two segments being merged both hold this identifier.
    #[error("merge conflict on key: {0}")]
    MergeConflict(String),

    /// A stored block is not a valid identifier → CID mapping.
    #[error("malformed segment data: {0}")]
    MalformedData(String),

    /// The result would hold more entries than the largest tier allows.
    #[error("{count} entries exceed the largest tier capacity of {max}")]
    CapacityExceeded { count: usize, max: usize },

    /// `merge` was called with no segments.
    #[error("must provide at least one segment to merge")]
    EmptyMerge,

    /// The block store failed.
    #[error("block store error: {0}")]
    Store(#[from] StoreError),
}

/// Returns the tier for `count` entries, or `CapacityExceeded`.
fn tier_for(count: usize) -> Result<SizeTier, SegmentError> {
    SizeTier::for_count(count).ok_or(SegmentError::CapacityExceeded {
        count,
        max: SizeTier::MAX_CAPACITY,
    })
}

// ------------------------------------------------------------------------------------------------
// Entry
// ------------------------------------------------------------------------------------------------

/// One `(identifier, CID)` pair held by a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K> {
    pub id: K,
    pub cid: Cid,
}

// ------------------------------------------------------------------------------------------------
// Segment
// ------------------------------------------------------------------------------------------------

/// A size-tiered, content-addressed sorted table of identifier → CID.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use cidtable::{BlockStore, Cid, MemoryBlockStore, Segment, SizeTier, Timestamp};
///
/// let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
/// let mut segment = Segment::<Timestamp>::create(store.clone()).unwrap();
///
/// let id: Timestamp = "2024-01-01T00:00:00Z".parse().unwrap();
/// segment.add_entry(id, Cid::of(b"record")).unwrap();
///
/// assert_eq!(segment.len(), 1);
/// assert_eq!(segment.tier(), SizeTier::Small);
///
/// // The segment is fully described by its CID.
/// let reloaded = Segment::<Timestamp>::load(store, segment.cid()).unwrap();
/// assert_eq!(reloaded.ids(false), segment.ids(false));
/// ```
#[derive(Clone)]
pub struct Segment<K: SegmentKey = Timestamp> {
    store: Arc<dyn BlockStore>,
    cid: Cid,
    entries: BTreeMap<String, Entry<K>>,
    tier: SizeTier,
}

impl<K: SegmentKey> fmt::Debug for Segment<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("cid", &self.cid)
            .field("len", &self.entries.len())
            .field("tier", &self.tier)
            .finish_non_exhaustive()
    }
}

impl<K: SegmentKey> Segment<K> {
    // --------------------------------------------------------------------------------------------
    // Construction
    // --------------------------------------------------------------------------------------------

    /// Persists an empty mapping and returns a segment wrapping it.
    ///
    /// # Errors
    ///
    /// Only [`SegmentError::Store`].
    pub fn create(store: Arc<dyn BlockStore>) -> Result<Self, SegmentError> {
        let entries = BTreeMap::new();
        let cid = store.put(&MappingRef(&entries))?;
        debug!(%cid, "segment created");
        Ok(Self {
            store,
            cid,
            entries,
            tier: SizeTier::Small,
        })
    }

    /// Loads the segment stored at `cid`.
    ///
    /// The block must decode to a mapping whose keys are canonical
    /// encodings of `K`, strictly ascending, and no more numerous than
    /// [`SizeTier::MAX_CAPACITY`].
    ///
    /// # Errors
    ///
    /// - [`SegmentError::BlockNotFound`] if the store has no block at `cid`.
    /// - [`SegmentError::MalformedData`] if the block fails validation.
    pub fn load(store: Arc<dyn BlockStore>, cid: Cid) -> Result<Self, SegmentError> {
        let raw = match store.get::<RawMapping>(&cid) {
            Ok(raw) => raw,
            Err(StoreError::NotFound(missing)) => return Err(SegmentError::BlockNotFound(missing)),
            Err(StoreError::Malformed { reason, .. }) => {
                return Err(SegmentError::MalformedData(reason));
            }
            Err(e) => return Err(e.into()),
        };

        let entries = validate_mapping::<K>(raw)?;
        let tier = tier_for(entries.len())?;
        debug!(%cid, entries = entries.len(), %tier, "segment loaded");

        Ok(Self {
            store,
            cid,
            entries,
            tier,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Point lookups
    // --------------------------------------------------------------------------------------------

    /// Whether an entry exists for `id`.
    pub fn has_entry(&self, id: &K) -> bool {
        self.entries.contains_key(&id.to_key())
    }

    /// The CID stored for `id`, if any.
    pub fn get_entry(&self, id: &K) -> Option<Cid> {
        let entry = self.entries.get(&id.to_key());
        trace!(?id, found = entry.is_some(), "segment lookup");
        entry.map(|e| e.cid)
    }

    // --------------------------------------------------------------------------------------------
    // Mutations
    // --------------------------------------------------------------------------------------------

    /// Inserts a new entry.
    ///
    /// # Errors
    ///
    /// - [`SegmentError::TableFull`] if the segment already fills its tier.
    /// - [`SegmentError::DuplicateEntry`] if `id` is already present.
    /// - [`SegmentError::Store`] if persisting fails; the segment is unchanged.
    pub fn add_entry(&mut self, id: K, cid: Cid) -> Result<(), SegmentError> {
        if self.is_full() {
            return Err(SegmentError::TableFull {
                tier: self.tier,
                len: self.len(),
            });
        }
        let key = id.to_key();
        if self.entries.contains_key(&key) {
            return Err(SegmentError::DuplicateEntry(key));
        }
        let tier = tier_for(self.len() + 1)?;

        self.entries.insert(key.clone(), Entry { id, cid });
        if let Err(e) = self.persist(tier) {
            self.entries.remove(&key);
            return Err(e);
        }
        Ok(())
    }

    /// Inserts a batch of new entries with a single persist.
    ///
    /// Unlike [`add_entry`](Self::add_entry) there is no per-element tier
    /// check: the batch may carry the segment into a larger tier. Callers
    /// size batches themselves.
    ///
    /// All-or-nothing: on any error, no entry from the batch is kept.
    ///
    /// # Errors
    ///
    /// - [`SegmentError::DuplicateEntry`] naming the first identifier (in
    ///   batch order) that is already in the segment or repeats within the
    ///   batch.
    /// - [`SegmentError::CapacityExceeded`] if the result would exceed
    ///   [`SizeTier::MAX_CAPACITY`].
    /// - [`SegmentError::Store`] if persisting fails.
    pub fn add_entries<I>(&mut self, batch: I) -> Result<(), SegmentError>
    where
        I: IntoIterator<Item = (K, Cid)>,
    {
        let mut seen = BTreeSet::new();
        let mut staged = Vec::new();
        for (id, cid) in batch {
            let key = id.to_key();
            if self.entries.contains_key(&key) || !seen.insert(key.clone()) {
                return Err(SegmentError::DuplicateEntry(key));
            }
            staged.push((key, Entry { id, cid }));
        }
        if staged.is_empty() {
            return Ok(());
        }
        let tier = tier_for(self.len() + staged.len())?;

        let mut next = self.entries.clone();
        next.extend(staged);
        let cid = self.store.put(&MappingRef(&next))?;

        self.entries = next;
        self.cid = cid;
        self.tier = tier;
        debug!(%cid, entries = self.len(), %tier, "segment persisted after batch insert");
        Ok(())
    }

    /// Replaces the CID stored for an existing entry.
    ///
    /// # Errors
    ///
    /// - [`SegmentError::NotFound`] if `id` is absent.
    /// - [`SegmentError::Store`] if persisting fails; the old CID is kept.
    pub fn edit_entry(&mut self, id: &K, cid: Cid) -> Result<(), SegmentError> {
        let key = id.to_key();
        let previous = match self.entries.get_mut(&key) {
            Some(entry) => std::mem::replace(&mut entry.cid, cid),
            None => return Err(SegmentError::NotFound(key)),
        };

        if let Err(e) = self.persist(self.tier) {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.cid = previous;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Removes an entry. The tier may drop as a result.
    ///
    /// # Errors
    ///
    /// - [`SegmentError::NotFound`] if `id` is absent.
    /// - [`SegmentError::Store`] if persisting fails; the entry is kept.
    pub fn delete_entry(&mut self, id: &K) -> Result<(), SegmentError> {
        let key = id.to_key();
        let tier = tier_for(self.len().saturating_sub(1))?;
        let Some(removed) = self.entries.remove(&key) else {
            return Err(SegmentError::NotFound(key));
        };

        if let Err(e) = self.persist(tier) {
            self.entries.insert(key, removed);
            return Err(e);
        }
        Ok(())
    }

    /// Stores the current mapping and adopts its CID and `tier`.
    ///
    /// On error nothing on `self` has been touched besides whatever the
    /// caller already staged in `entries`; undoing that is the caller's
    /// job.
    fn persist(&mut self, tier: SizeTier) -> Result<(), SegmentError> {
        let cid = self.store.put(&MappingRef(&self.entries))?;
        self.cid = cid;
        self.tier = tier;
        debug!(%cid, entries = self.len(), %tier, "segment persisted");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Enumeration
    // --------------------------------------------------------------------------------------------

    /// The identifier with the smallest key, or `None` if empty.
    pub fn oldest_id(&self) -> Option<K> {
        self.entries.values().next().map(|e| e.id.clone())
    }

    /// The identifier with the largest key, or `None` if empty.
    pub fn newest_id(&self) -> Option<K> {
        self.entries.values().next_back().map(|e| e.id.clone())
    }

    /// All identifiers, ascending by key; descending if `newest_first`.
    pub fn ids(&self, newest_first: bool) -> Vec<K> {
        let ids = self.entries.values().map(|e| e.id.clone());
        if newest_first {
            ids.rev().collect()
        } else {
            ids.collect()
        }
    }

    /// All CIDs, in key order.
    pub fn cids(&self) -> Vec<Cid> {
        self.entries.values().map(|e| e.cid).collect()
    }

    /// All entries, in key order.
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &Entry<K>> + '_ {
        self.entries.values()
    }

    // --------------------------------------------------------------------------------------------
    // Size and identity
    // --------------------------------------------------------------------------------------------

    /// Number of entries (`currSize`).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capacity of the current tier.
    pub fn max_size(&self) -> usize {
        self.tier.capacity()
    }

    /// Whether the segment has reached the capacity of its tier.
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_size()
    }

    pub fn tier(&self) -> SizeTier {
        self.tier
    }

    /// CID of the block holding the current mapping.
    pub fn cid(&self) -> Cid {
        self.cid
    }

    /// The block store this segment writes through.
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }
}

// ------------------------------------------------------------------------------------------------
// Validation
// ------------------------------------------------------------------------------------------------

/// Turns decoded pairs into a mapping, rejecting anything a segment could
/// not have written.
fn validate_mapping<K: SegmentKey>(
    raw: RawMapping,
) -> Result<BTreeMap<String, Entry<K>>, SegmentError> {
    let RawMapping(pairs) = raw;
    if pairs.len() > SizeTier::MAX_CAPACITY {
        return Err(SegmentError::MalformedData(format!(
            "{} entries exceed the largest tier capacity of {}",
            pairs.len(),
            SizeTier::MAX_CAPACITY
        )));
    }

    let mut entries = BTreeMap::new();
    let mut previous: Option<String> = None;
    for pair in pairs {
        if previous.as_ref().is_some_and(|prev| *prev >= pair.key) {
            return Err(SegmentError::MalformedData(format!(
                "key {:?} is duplicated or out of order",
                pair.key
            )));
        }
        let id = K::parse_key(&pair.key)
            .map_err(|e| SegmentError::MalformedData(e.to_string()))?;
        if id.to_key() != pair.key {
            return Err(SegmentError::MalformedData(format!(
                "key {:?} is not in canonical form",
                pair.key
            )));
        }
        previous = Some(pair.key.clone());
        entries.insert(pair.key, Entry { id, cid: pair.cid });
    }
    Ok(entries)
}
