//! Device identity — the durable UUID and long-lived keypairs
//!
//! A device installation owns one UUID-class identity; its first 6 bytes
//! double as the compact `SenderId` used on the wire. Alongside it live
//! the long-lived Ed25519 signing keypair and X25519 key-agreement
//! keypair consumed by the key manager.

mod keys;
mod persist;

pub use keys::DeviceIdentity;
pub use persist::IdentityStore;

use crate::store::StorageBackend;
use anyhow::Result;
use std::sync::Arc;

/// Owns the device identity and its persistence.
pub struct IdentityManager {
    store: IdentityStore,
    identity: Option<DeviceIdentity>,
}

impl IdentityManager {
    /// In-memory manager; identity lives only for this process.
    pub fn new() -> Self {
        Self {
            store: IdentityStore::memory(),
            identity: None,
        }
    }

    /// Persistent manager; hydrates an existing identity if one is stored.
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let store = IdentityStore::persistent(backend);
        let identity = store.load()?;
        Ok(Self { store, identity })
    }

    /// Generate (or keep) the identity and persist it.
    pub fn initialize(&mut self) -> Result<&DeviceIdentity> {
        if self.identity.is_none() {
            let identity = DeviceIdentity::generate();
            self.store.save(&identity)?;
            self.identity = Some(identity);
        }
        Ok(self.identity.as_ref().unwrap())
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn set_nickname(&mut self, nickname: String) -> Result<()> {
        if let Some(identity) = self.identity.as_mut() {
            identity.nickname = Some(nickname);
            self.store.save(identity)?;
        }
        Ok(())
    }

    /// Forget the identity, durably. A new one is minted on the next
    /// `initialize`.
    pub fn wipe(&mut self) -> Result<()> {
        self.store.clear()?;
        self.identity = None;
        Ok(())
    }
}

impl Default for IdentityManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;

    #[test]
    fn test_initialize_is_idempotent() {
        let mut manager = IdentityManager::new();
        let first = manager.initialize().unwrap().sender_id();
        let second = manager.initialize().unwrap().sender_id();
        assert_eq!(first, second);
    }

    #[test]
    fn test_hydrates_from_backend() {
        let backend = Arc::new(MemoryStorage::new());

        let original = {
            let mut manager =
                IdentityManager::with_backend(backend.clone() as Arc<dyn StorageBackend>).unwrap();
            manager.initialize().unwrap().sender_id()
        };

        let manager = IdentityManager::with_backend(backend as Arc<dyn StorageBackend>).unwrap();
        assert_eq!(manager.identity().unwrap().sender_id(), original);
    }

    #[test]
    fn test_wipe_forgets_identity() {
        let backend = Arc::new(MemoryStorage::new()) as Arc<dyn StorageBackend>;
        let mut manager = IdentityManager::with_backend(backend.clone()).unwrap();
        let first = manager.initialize().unwrap().sender_id();
        manager.wipe().unwrap();
        assert!(manager.identity().is_none());
        let second = manager.initialize().unwrap().sender_id();
        assert_ne!(first, second);
    }

    #[test]
    fn test_nickname_round_trip() {
        let backend = Arc::new(MemoryStorage::new()) as Arc<dyn StorageBackend>;
        let mut manager = IdentityManager::with_backend(backend.clone()).unwrap();
        manager.initialize().unwrap();
        manager.set_nickname("ember".to_string()).unwrap();

        let reloaded = IdentityManager::with_backend(backend).unwrap();
        assert_eq!(
            reloaded.identity().unwrap().nickname.as_deref(),
            Some("ember")
        );
    }
}
