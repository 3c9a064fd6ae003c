//! Segment merge, the compaction primitive.
//!
//! Merging folds the mappings of several segments, left to right, into one
//! new segment. Inputs are expected to cover **disjoint** identifier
//! ranges; an identifier present in two inputs is a data-integrity problem
//! upstream, so the merge fails with [`SegmentError::MergeConflict`] rather
//! than pick a winner. This holds even when both sides carry the same CID.
//!
//! The result is persisted once, after the whole fold succeeds. A failed
//! merge writes nothing, and inputs are never modified.
//!
//! Because a successful merge is a disjoint union, its result (mapping and
//! CID) does not depend on input order. Which key is reported on conflict
//! does.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::encoding_impls::MappingRef;
use super::{Segment, SegmentError, tier_for};
use crate::key::SegmentKey;
use crate::store::BlockStore;

impl<K: SegmentKey> Segment<K> {
    /// Merges `segments` into a new segment bound to the first segment's
    /// block store.
    ///
    /// The new segment's tier is recomputed from the combined entry count
    /// and may be several tiers above any input.
    ///
    /// # Errors
    ///
    /// - [`SegmentError::EmptyMerge`] if `segments` is empty.
    /// - [`SegmentError::MergeConflict`] naming the first identifier (in
    ///   input order) found in more than one segment.
    /// - [`SegmentError::CapacityExceeded`] if the union holds more than
    ///   [`SizeTier::MAX_CAPACITY`](super::SizeTier::MAX_CAPACITY) entries.
    /// - [`SegmentError::Store`] if persisting fails.
    pub fn merge<'a, I>(segments: I) -> Result<Self, SegmentError>
    where
        I: IntoIterator<Item = &'a Segment<K>>,
        K: 'a,
    {
        let mut segments = segments.into_iter();
        let first = segments.next().ok_or(SegmentError::EmptyMerge)?;
        let store: Arc<dyn BlockStore> = Arc::clone(&first.store);

        let mut combined = first.entries.clone();
        let mut inputs = 1usize;

        for segment in segments {
            inputs += 1;
            if !same_store(&store, &segment.store) {
                warn!(
                    input = inputs,
                    "merge: input is bound to a different block store; result uses the first"
                );
            }
            fold_into(&mut combined, segment)?;
        }

        let tier = tier_for(combined.len())?;
        let cid = store.put(&MappingRef(&combined))?;

        info!(
            inputs,
            entries = combined.len(),
            %tier,
            %cid,
            "merge: complete"
        );

        Ok(Segment {
            store,
            cid,
            entries: combined,
            tier,
        })
    }
}

/// Adds every entry of `segment` to `acc`, failing on the first key that
/// is already present.
fn fold_into<K: SegmentKey>(
    acc: &mut BTreeMap<String, super::Entry<K>>,
    segment: &Segment<K>,
) -> Result<(), SegmentError> {
    for (key, entry) in &segment.entries {
        if acc.contains_key(key) {
            warn!(key = %key, "merge: conflicting identifier");
            return Err(SegmentError::MergeConflict(key.clone()));
        }
        acc.insert(key.clone(), entry.clone());
    }
    Ok(())
}

/// Compares the data pointers only; vtable pointers of the same object may
/// differ between codegen units.
fn same_store(a: &Arc<dyn BlockStore>, b: &Arc<dyn BlockStore>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
