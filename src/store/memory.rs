//! In-memory block store.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use super::{BlockStore, StoreError};
use crate::cid::Cid;

/// A [`BlockStore`] backed by a hash map.
///
/// Blocks are held as `Arc<[u8]>` so a duplicate `put` does not copy.
/// Nothing is ever evicted.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<Cid, Arc<[u8]>>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blocks stored.
    ///
    /// Counts through a poisoned lock: the map is only ever changed by a
    /// single insert, so it is never left half-updated.
    pub fn len(&self) -> usize {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockStore for MemoryBlockStore {
    fn put_block(&self, bytes: &[u8]) -> Result<Cid, StoreError> {
        let cid = Cid::of(bytes);
        let mut blocks = self
            .blocks
            .write()
            .map_err(|_| StoreError::Internal("memory store lock poisoned".into()))?;
        blocks.entry(cid).or_insert_with(|| Arc::from(bytes));
        trace!(%cid, size = bytes.len(), "memory store: put");
        Ok(cid)
    }

    fn get_block(&self, cid: &Cid) -> Result<Vec<u8>, StoreError> {
        let blocks = self
            .blocks
            .read()
            .map_err(|_| StoreError::Internal("memory store lock poisoned".into()))?;
        blocks
            .get(cid)
            .map(|b| b.to_vec())
            .ok_or(StoreError::NotFound(*cid))
    }

    fn has_block(&self, cid: &Cid) -> Result<bool, StoreError> {
        let blocks = self
            .blocks
            .read()
            .map_err(|_| StoreError::Internal("memory store lock poisoned".into()))?;
        Ok(blocks.contains_key(cid))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    /// # Scenario
    /// A writer panics while holding the lock.
    ///
    /// # Expected behavior
    /// `len` still reports the stored blocks, while reads and writes
    /// surface `StoreError::Internal`.
    #[test]
    fn poisoned_lock_keeps_count_and_fails_operations() {
        let store = Arc::new(MemoryBlockStore::new());
        let cid = store.put_block(b"before").unwrap();

        let poisoner = Arc::clone(&store);
        let _ = thread::spawn(move || {
            let _guard = poisoner.blocks.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(store.blocks.is_poisoned());

        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
        assert!(matches!(store.put_block(b"after"), Err(StoreError::Internal(_))));
        assert!(matches!(store.get_block(&cid), Err(StoreError::Internal(_))));
    }
}
