//! Load / persist round trips and rejection of malformed blocks.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::cid::Cid;
    use crate::encoding::Encode;
    use crate::key::Timestamp;
    use crate::segment::tests::helpers::*;
    use crate::segment::{Segment, SegmentError, SizeTier};
    use crate::store::{BlockStore, FileBlockStore, StoreConfig};

    /// Hand-encodes a mapping block, in whatever order `pairs` are given.
    fn raw_block(pairs: &[(&str, Cid)]) -> Vec<u8> {
        let mut buf = Vec::new();
        (pairs.len() as u32).encode_to(&mut buf).unwrap();
        for (key, cid) in pairs {
            key.encode_to(&mut buf).unwrap();
            cid.encode_to(&mut buf).unwrap();
        }
        buf
    }

    fn assert_same(loaded: &Segment<Timestamp>, original: &Segment<Timestamp>) {
        assert_eq!(loaded.cid(), original.cid());
        assert_eq!(loaded.ids(false), original.ids(false));
        assert_eq!(loaded.cids(), original.cids());
        assert_eq!(loaded.tier(), original.tier());
    }

    /// # Scenario
    /// Reload the segment from its CID after every kind of mutation.
    ///
    /// # Expected behavior
    /// Each reload reproduces the in-memory mapping and tier exactly.
    #[test]
    fn load_reproduces_every_snapshot() {
        let (_, store) = memory_store();
        let mut segment = Segment::<Timestamp>::create(store.clone()).unwrap();
        assert_same(&Segment::load(store.clone(), segment.cid()).unwrap(), &segment);

        segment.add_entry(ts(10), record_cid(10)).unwrap();
        assert_same(&Segment::load(store.clone(), segment.cid()).unwrap(), &segment);

        segment
            .add_entries((0..150).filter(|i| *i != 10).map(|i| (ts(i), record_cid(i as u64))))
            .unwrap();
        assert_eq!(segment.tier(), SizeTier::Medium);
        assert_same(&Segment::load(store.clone(), segment.cid()).unwrap(), &segment);

        segment.edit_entry(&ts(5), record_cid(999)).unwrap();
        assert_same(&Segment::load(store.clone(), segment.cid()).unwrap(), &segment);

        segment.delete_entry(&ts(0)).unwrap();
        let loaded = Segment::load(store, segment.cid()).unwrap();
        assert_same(&loaded, &segment);
        assert_eq!(loaded.get_entry(&ts(5)), Some(record_cid(999)));
        assert!(!loaded.has_entry(&ts(0)));
    }

    #[test]
    fn old_snapshots_stay_loadable() {
        let (_, store) = memory_store();
        let mut segment = segment_with(&store, 0..3);
        let before = segment.cid();
        segment.delete_entry(&ts(1)).unwrap();

        let old = Segment::<Timestamp>::load(store, before).unwrap();
        assert_eq!(old.len(), 3);
        assert!(old.has_entry(&ts(1)));
        assert_eq!(segment.len(), 2);
    }

    /// # Scenario
    /// A block with 150 entries is loaded after the segment that wrote it is
    /// gone.
    ///
    /// # Expected behavior
    /// The tier is derived from the count, not stored: medium.
    #[test]
    fn tier_is_recomputed_on_load() {
        let (_, store) = memory_store();
        let cid = segment_with(&store, 0..150).cid();
        let loaded = Segment::<Timestamp>::load(store, cid).unwrap();
        assert_eq!(loaded.len(), 150);
        assert_eq!(loaded.tier(), SizeTier::Medium);
        assert!(!loaded.is_full());
    }

    #[test]
    fn loaded_segment_is_mutable() {
        let (_, store) = memory_store();
        let cid = segment_with(&store, 0..4).cid();
        let mut loaded = Segment::<Timestamp>::load(store.clone(), cid).unwrap();
        loaded.add_entry(ts(4), record_cid(4)).unwrap();
        assert_eq!(loaded.cid(), segment_with(&store, 0..5).cid());
    }

    #[test]
    fn load_of_missing_block_fails() {
        let (_, store) = memory_store();
        let missing = Cid::of(b"never stored");
        let err = Segment::<Timestamp>::load(store, missing).unwrap_err();
        assert!(matches!(err, SegmentError::BlockNotFound(cid) if cid == missing));
    }

    /// # Scenario
    /// Blocks that are not mappings a segment could have written.
    ///
    /// # Expected behavior
    /// Every one is rejected with `MalformedData`.
    #[test]
    fn malformed_blocks_are_rejected() {
        let (mem, store) = memory_store();
        let c = record_cid(1);
        let cases: Vec<(&str, Vec<u8>)> = vec![
            ("not a mapping", b"hello".to_vec()),
            ("unparseable key", raw_block(&[("yesterday", c)])),
            (
                "offset instead of Z",
                raw_block(&[("2024-01-01T00:00:00+00:00", c)]),
            ),
            (
                "impossible date",
                raw_block(&[("2024-02-30T00:00:00Z", c)]),
            ),
            (
                "out of order",
                raw_block(&[("2024-01-02T00:00:00Z", c), ("2024-01-01T00:00:00Z", c)]),
            ),
            (
                "duplicate key",
                raw_block(&[("2024-01-01T00:00:00Z", c), ("2024-01-01T00:00:00Z", c)]),
            ),
            ("trailing bytes", {
                let mut bytes = raw_block(&[("2024-01-01T00:00:00Z", c)]);
                bytes.push(0);
                bytes
            }),
            ("count larger than body", {
                let mut bytes = raw_block(&[("2024-01-01T00:00:00Z", c)]);
                bytes[0] = 2;
                bytes
            }),
        ];

        for (label, bytes) in cases {
            let cid = mem.put_block(&bytes).unwrap();
            let err = Segment::<Timestamp>::load(store.clone(), cid).unwrap_err();
            assert!(
                matches!(err, SegmentError::MalformedData(_)),
                "{label}: got {err:?}"
            );
        }
    }

    #[test]
    fn block_past_largest_tier_is_rejected() {
        let (mem, store) = memory_store();
        let keys: Vec<String> = (0..6401).map(|i| ts(i).to_string()).collect();
        let pairs: Vec<(&str, Cid)> = keys.iter().map(|k| (k.as_str(), record_cid(0))).collect();
        let cid = mem.put_block(&raw_block(&pairs)).unwrap();

        let err = Segment::<Timestamp>::load(store.clone(), cid).unwrap_err();
        assert!(matches!(err, SegmentError::MalformedData(_)), "got {err:?}");

        // One fewer is a full extra-large segment.
        let cid = mem.put_block(&raw_block(&pairs[..6400])).unwrap();
        let full = Segment::<Timestamp>::load(store, cid).unwrap();
        assert_eq!(full.tier(), SizeTier::ExtraLarge);
        assert!(full.is_full());
    }

    #[test]
    fn hand_encoded_block_matches_segment_encoding() {
        let (mem, store) = memory_store();
        let segment = segment_with(&store, 0..2);
        let (k0, k1) = (ts(0).to_string(), ts(1).to_string());
        let bytes = raw_block(&[(k0.as_str(), record_cid(0)), (k1.as_str(), record_cid(1))]);
        assert_eq!(Cid::of(&bytes), segment.cid());
        assert_eq!(mem.get_block(&segment.cid()).unwrap(), bytes);
    }

    #[test]
    fn keys_of_another_type_are_rejected() {
        let (mem, store) = memory_store();
        let cid = mem
            .put_block(&raw_block(&[("00000000000000000042", record_cid(1))]))
            .unwrap();

        let err = Segment::<Timestamp>::load(store.clone(), cid).unwrap_err();
        assert!(matches!(err, SegmentError::MalformedData(_)));

        let numeric = Segment::<u64>::load(store, cid).unwrap();
        assert_eq!(numeric.ids(false), [42]);
    }

    /// # Scenario
    /// Build a segment on a file store, drop everything, reopen the
    /// directory and load by CID.
    ///
    /// # Expected behavior
    /// The reloaded segment is identical, and every mutation left exactly
    /// one block file behind.
    #[test]
    fn survives_reopen_of_file_store() {
        init_tracing();
        let tmp = TempDir::new().unwrap();

        let (cid, ids) = {
            let store: Arc<dyn BlockStore> =
                Arc::new(FileBlockStore::open(tmp.path(), StoreConfig::default()).unwrap());
            let mut segment = Segment::<Timestamp>::create(store).unwrap();
            for i in 0..5 {
                segment.add_entry(ts(i), record_cid(i as u64)).unwrap();
            }
            (segment.cid(), segment.ids(false))
        };

        let reopened = Arc::new(FileBlockStore::open(tmp.path(), StoreConfig::default()).unwrap());
        assert_eq!(reopened.block_cids().unwrap().len(), 6);

        let store: Arc<dyn BlockStore> = reopened;
        let loaded = Segment::<Timestamp>::load(store, cid).unwrap();
        assert_eq!(loaded.ids(false), ids);
        assert_eq!(loaded.get_entry(&ts(3)), Some(record_cid(3)));
    }

    /// # Scenario
    /// The snapshot file of a one-entry segment is damaged while the
    /// segment has moved on, then the segment returns to that content.
    ///
    /// # Actions
    /// 1. Add one entry on a file store, remember the CID, delete it.
    /// 2. Flip a byte in the remembered block file.
    /// 3. Re-add the same entry.
    ///
    /// # Expected behavior
    /// The re-add yields the remembered CID and loading it succeeds.
    #[test]
    fn readding_content_repairs_damaged_snapshot() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let files = Arc::new(FileBlockStore::open(tmp.path(), StoreConfig::default()).unwrap());
        let store: Arc<dyn BlockStore> = files.clone();

        let mut segment = Segment::<Timestamp>::create(store.clone()).unwrap();
        segment.add_entry(ts(0), record_cid(0)).unwrap();
        let one_entry = segment.cid();
        segment.delete_entry(&ts(0)).unwrap();

        let path = files.block_path(&one_entry);
        let mut raw = std::fs::read(&path).unwrap();
        raw[12] ^= 0xFF;
        std::fs::write(&path, &raw).unwrap();
        assert!(Segment::<Timestamp>::load(store.clone(), one_entry).is_err());

        segment.add_entry(ts(0), record_cid(0)).unwrap();
        assert_eq!(segment.cid(), one_entry);
        let loaded = Segment::<Timestamp>::load(store, one_entry).unwrap();
        assert_eq!(loaded.get_entry(&ts(0)), Some(record_cid(0)));
    }
}
