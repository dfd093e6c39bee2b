//! Persistent blocklist of sender identifiers.
//!
//! Backed by the generic `StorageBackend` so the same code runs on sled
//! or in memory. An in-memory mirror makes `contains` lock-cheap; the
//! backend is only touched on mutation and startup hydration.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::peer::PeerError;
use crate::store::StorageBackend;
use crate::wire::SenderId;

const BLOCK_PREFIX: &[u8] = b"block/";

#[derive(Clone)]
pub struct Blocklist {
    backend: Arc<dyn StorageBackend>,
    cache: Arc<RwLock<HashSet<SenderId>>>,
}

impl Blocklist {
    /// Open the blocklist, hydrating the mirror from the backend.
    pub fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, PeerError> {
        let mut cache = HashSet::new();
        for (key, _) in backend.scan_prefix(BLOCK_PREFIX)? {
            if let Some(id) = decode_key(&key) {
                cache.insert(id);
            }
        }
        Ok(Self {
            backend,
            cache: Arc::new(RwLock::new(cache)),
        })
    }

    pub fn contains(&self, sender: &SenderId) -> bool {
        self.cache.read().contains(sender)
    }

    /// Idempotent. Returns true if the entry was newly added.
    pub fn block(&self, sender: SenderId) -> Result<bool, PeerError> {
        if !self.cache.write().insert(sender) {
            return Ok(false);
        }
        self.backend.put(&encode_key(&sender), &[1])?;
        self.backend.flush()?;
        Ok(true)
    }

    /// Idempotent. Returns true if an entry was removed.
    pub fn unblock(&self, sender: &SenderId) -> Result<bool, PeerError> {
        if !self.cache.write().remove(sender) {
            return Ok(false);
        }
        self.backend.remove(&encode_key(sender))?;
        self.backend.flush()?;
        Ok(true)
    }

    pub fn list(&self) -> Vec<SenderId> {
        let mut all: Vec<_> = self.cache.read().iter().copied().collect();
        all.sort_by_key(|id| id.0);
        all
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

fn encode_key(sender: &SenderId) -> Vec<u8> {
    let mut key = BLOCK_PREFIX.to_vec();
    key.extend_from_slice(&sender.0);
    key
}

fn decode_key(key: &[u8]) -> Option<SenderId> {
    let raw = key.strip_prefix(BLOCK_PREFIX)?;
    let bytes: [u8; 6] = raw.try_into().ok()?;
    Some(SenderId(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStorage, SledStorage};

    fn id(n: u8) -> SenderId {
        SenderId([n; 6])
    }

    #[test]
    fn block_unblock_roundtrip() {
        let list = Blocklist::open(Arc::new(MemoryStorage::new())).unwrap();
        assert!(list.block(id(1)).unwrap());
        assert!(!list.block(id(1)).unwrap());
        assert!(list.contains(&id(1)));
        assert!(list.unblock(&id(1)).unwrap());
        assert!(!list.unblock(&id(1)).unwrap());
        assert!(!list.contains(&id(1)));
    }

    #[test]
    fn list_is_sorted() {
        let list = Blocklist::open(Arc::new(MemoryStorage::new())).unwrap();
        list.block(id(3)).unwrap();
        list.block(id(1)).unwrap();
        list.block(id(2)).unwrap();
        assert_eq!(list.list(), vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn survives_reopen_on_sled() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = Arc::new(SledStorage::open(dir.path()).unwrap());
            let list = Blocklist::open(backend).unwrap();
            list.block(id(7)).unwrap();
        }
        let backend = Arc::new(SledStorage::open(dir.path()).unwrap());
        let list = Blocklist::open(backend).unwrap();
        assert!(list.contains(&id(7)));
        assert_eq!(list.len(), 1);
    }
}
