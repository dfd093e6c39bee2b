// Device identity key material

use crate::wire::SenderId;
use anyhow::Result;
use ed25519_dalek::SigningKey;
use rand::RngCore;
use uuid::Uuid;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

/// A device's durable identity: UUID plus the two long-lived keypairs.
///
/// The UUID is the canonical installation identity; its first 6 bytes are
/// the compact wire `SenderId`. The Ed25519 keypair signs; the X25519
/// keypair does key agreement. Both are independent keys, generated once.
#[derive(Clone)]
pub struct DeviceIdentity {
    pub device_id: Uuid,
    pub signing_key: SigningKey,
    pub agreement_secret: StaticSecret,
    pub nickname: Option<String>,
}

impl DeviceIdentity {
    /// Mint a fresh identity from the OS random source.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();

        let agreement_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);

        Self {
            device_id: Uuid::new_v4(),
            signing_key,
            agreement_secret,
            nickname: None,
        }
    }

    /// The compact wire identifier: first 6 bytes of the device UUID.
    pub fn sender_id(&self) -> SenderId {
        let bytes = self.device_id.as_bytes();
        let mut compact = [0u8; 6];
        compact.copy_from_slice(&bytes[..6]);
        SenderId(compact)
    }

    pub fn signing_public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn agreement_public_key(&self) -> [u8; 32] {
        X25519PublicKey::from(&self.agreement_secret).to_bytes()
    }

    /// Serialize secret material for the identity store.
    /// Layout: 16 bytes UUID, 32 bytes signing seed, 32 bytes agreement
    /// secret. The buffer wipes itself on drop.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Vec::with_capacity(16 + 32 + 32);
        out.extend_from_slice(self.device_id.as_bytes());
        out.extend_from_slice(&self.signing_key.to_bytes());
        out.extend_from_slice(&self.agreement_secret.to_bytes());
        Zeroizing::new(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 16 + 32 + 32 {
            anyhow::bail!("Invalid identity record length: {}", bytes.len());
        }

        let device_id = Uuid::from_slice(&bytes[..16])?;

        let mut signing_seed = [0u8; 32];
        signing_seed.copy_from_slice(&bytes[16..48]);
        let signing_key = SigningKey::from_bytes(&signing_seed);
        signing_seed.zeroize();

        let mut agreement_bytes = [0u8; 32];
        agreement_bytes.copy_from_slice(&bytes[48..80]);
        let agreement_secret = StaticSecret::from(agreement_bytes);
        agreement_bytes.zeroize();

        Ok(Self {
            device_id,
            signing_key,
            agreement_secret,
            nickname: None,
        })
    }
}
