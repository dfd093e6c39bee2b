// Identity persistence over the storage backend

use super::DeviceIdentity;
use crate::store::StorageBackend;
use anyhow::Result;
use std::sync::Arc;

const IDENTITY_KEY: &[u8] = b"device_identity";
const NICKNAME_KEY: &[u8] = b"device_nickname";

/// Storage for the device identity record.
pub enum IdentityStore {
    Memory,
    Persistent(Arc<dyn StorageBackend>),
}

impl IdentityStore {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn persistent(backend: Arc<dyn StorageBackend>) -> Self {
        Self::Persistent(backend)
    }

    pub fn save(&self, identity: &DeviceIdentity) -> Result<()> {
        match self {
            Self::Memory => Ok(()),
            Self::Persistent(db) => {
                let bytes = identity.to_bytes();
                db.put(IDENTITY_KEY, &bytes)?;
                match &identity.nickname {
                    Some(nick) => db.put(NICKNAME_KEY, nick.as_bytes())?,
                    None => db.remove(NICKNAME_KEY)?,
                }
                db.flush()?;
                Ok(())
            }
        }
    }

    pub fn load(&self) -> Result<Option<DeviceIdentity>> {
        match self {
            Self::Memory => Ok(None),
            Self::Persistent(db) => {
                let Some(bytes) = db.get(IDENTITY_KEY)? else {
                    return Ok(None);
                };
                let mut identity = DeviceIdentity::from_bytes(&bytes)?;
                if let Some(nick) = db.get(NICKNAME_KEY)? {
                    identity.nickname = Some(String::from_utf8(nick)?);
                }
                Ok(Some(identity))
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        match self {
            Self::Memory => Ok(()),
            Self::Persistent(db) => {
                db.remove(IDENTITY_KEY)?;
                db.remove(NICKNAME_KEY)?;
                db.flush()?;
                Ok(())
            }
        }
    }
}
