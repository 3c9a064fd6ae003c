//! Shared fixtures for segment tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cid::Cid;
use crate::key::Timestamp;
use crate::segment::Segment;
use crate::store::{BlockStore, MemoryBlockStore, StoreError};

/// 2024-01-01T00:00:00Z
pub const BASE_SECS: i64 = 1_704_067_200;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Timestamp `offset` seconds after [`BASE_SECS`].
pub fn ts(offset: i64) -> Timestamp {
    Timestamp::from_unix_secs(BASE_SECS + offset).unwrap()
}

pub fn parse_ts(s: &str) -> Timestamp {
    s.parse().unwrap()
}

/// A distinct, deterministic record CID.
pub fn record_cid(n: u64) -> Cid {
    Cid::of(format!("record-{n}").as_bytes())
}

/// A fresh in-memory store, both as its concrete type and as the trait
/// object segments take.
pub fn memory_store() -> (Arc<MemoryBlockStore>, Arc<dyn BlockStore>) {
    init_tracing();
    let mem = Arc::new(MemoryBlockStore::new());
    let store: Arc<dyn BlockStore> = mem.clone();
    (mem, store)
}

/// A segment holding timestamps `range` (as offsets), one batch insert.
pub fn segment_with(
    store: &Arc<dyn BlockStore>,
    range: std::ops::Range<i64>,
) -> Segment<Timestamp> {
    let mut segment = Segment::create(store.clone()).unwrap();
    segment
        .add_entries(range.map(|i| (ts(i), record_cid(i as u64))))
        .unwrap();
    segment
}

/// A block store whose writes can be made to fail on demand.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryBlockStore,
    fail_puts: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.fail_puts.store(failing, Ordering::SeqCst);
    }

    pub fn block_count(&self) -> usize {
        self.inner.len()
    }
}

impl BlockStore for FlakyStore {
    fn put_block(&self, bytes: &[u8]) -> Result<Cid, StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("injected write failure")));
        }
        self.inner.put_block(bytes)
    }

    fn get_block(&self, cid: &Cid) -> Result<Vec<u8>, StoreError> {
        self.inner.get_block(cid)
    }

    fn has_block(&self, cid: &Cid) -> Result<bool, StoreError> {
        self.inner.has_block(cid)
    }
}
