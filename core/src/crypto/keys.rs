//! Key manager: holds the long-lived identity keys and everything
//! derived from them — per-peer session keys (with lazy rotation),
//! joined-channel keys, and the map of peer public keys learned from
//! announcements.
//!
//! All maps sit behind their own `parking_lot` mutex. Session lookup,
//! use counting, and rotation happen under a single lock acquisition so
//! concurrent rotations cannot interleave: one writer installs the new
//! session, everyone else sees it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::Mutex;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use sha2::Sha256;
use tokio::sync::mpsc;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::crypto::CryptoError;
use crate::identity::DeviceIdentity;
use crate::wire::SenderId;

/// Domain separation for the session key derivation.
const SESSION_KDF_CONTEXT: &str = "embermesh v1 session key";

/// PBKDF2 work factor for password-derived channel keys.
const CHANNEL_KDF_ROUNDS: u32 = 100_000;

/// Public keys a peer advertises in its announcement.
#[derive(Debug, Clone, Copy)]
pub struct PeerKeys {
    pub signing: [u8; 32],
    pub agreement: [u8; 32],
}

/// An established session with one peer: our ephemeral public half and
/// the derived symmetric secret. Cloned out to callers; the secret is
/// zeroized on drop in every copy.
#[derive(Clone)]
pub struct SessionKeys {
    ephemeral_public: [u8; 32],
    shared_secret: Zeroizing<[u8; 32]>,
    created_at: Instant,
    uses: u64,
}

impl SessionKeys {
    pub fn ephemeral_public(&self) -> [u8; 32] {
        self.ephemeral_public
    }

    pub fn shared_secret(&self) -> &[u8; 32] {
        &self.shared_secret
    }

    fn should_rotate(&self, max_age: Duration, max_uses: u64) -> bool {
        self.uses >= max_uses || self.created_at.elapsed() >= max_age
    }
}

pub struct KeyManager {
    signing_key: SigningKey,
    agreement_secret: StaticSecret,
    sessions: Mutex<HashMap<SenderId, SessionKeys>>,
    peer_keys: Mutex<HashMap<SenderId, PeerKeys>>,
    channel_keys: Mutex<HashMap<String, Zeroizing<[u8; 32]>>>,
    key_events: Mutex<Option<mpsc::UnboundedSender<SenderId>>>,
    session_max_age: Duration,
    session_max_uses: u64,
}

impl KeyManager {
    pub fn new(identity: &DeviceIdentity) -> Self {
        Self::with_rotation(identity, Duration::from_secs(3600), 1_000)
    }

    /// Rotation thresholds exposed for tests and tuning.
    pub fn with_rotation(
        identity: &DeviceIdentity,
        session_max_age: Duration,
        session_max_uses: u64,
    ) -> Self {
        Self {
            signing_key: identity.signing_key.clone(),
            agreement_secret: identity.agreement_secret.clone(),
            sessions: Mutex::new(HashMap::new()),
            peer_keys: Mutex::new(HashMap::new()),
            channel_keys: Mutex::new(HashMap::new()),
            key_events: Mutex::new(None),
            session_max_age,
            session_max_uses,
        }
    }

    // ---- identity operations ----

    pub fn signing_public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn agreement_public_key(&self) -> [u8; 32] {
        PublicKey::from(&self.agreement_secret).to_bytes()
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.signing_key.sign(data).to_bytes()
    }

    pub fn verify(
        signing_public: &[u8; 32],
        data: &[u8],
        signature: &[u8; 64],
    ) -> Result<(), CryptoError> {
        let key = VerifyingKey::from_bytes(signing_public)
            .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
        let sig = Signature::from_bytes(signature);
        key.verify(data, &sig)
            .map_err(|_| CryptoError::SignatureInvalid)
    }

    /// X25519 agreement between our static secret and a peer public key.
    /// Used by the decrypt path, where the session is re-derived from the
    /// ephemeral key carried in the envelope rather than from the cache.
    pub(crate) fn agree_static(&self, their_public: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let shared = self
            .agreement_secret
            .diffie_hellman(&PublicKey::from(*their_public));
        derive_session_key(shared.as_bytes())
    }

    // ---- peer public keys ----

    /// Record the keys a peer announced. Fires a key event so higher
    /// layers can flush messages queued while the keys were unknown.
    pub fn store_peer_keys(&self, peer: SenderId, keys: PeerKeys) {
        let replaced = self.peer_keys.lock().insert(peer, keys);
        // A changed agreement key invalidates any cached session.
        if let Some(old) = replaced {
            if old.agreement != keys.agreement {
                self.sessions.lock().remove(&peer);
            }
        }
        if let Some(tx) = self.key_events.lock().as_ref() {
            let _ = tx.send(peer);
        }
    }

    pub fn peer_keys(&self, peer: &SenderId) -> Option<PeerKeys> {
        self.peer_keys.lock().get(peer).copied()
    }

    /// Forget a peer's announced keys along with any cached session.
    pub fn remove_peer_keys(&self, peer: &SenderId) {
        self.peer_keys.lock().remove(peer);
        self.sessions.lock().remove(peer);
    }

    /// One subscriber at a time; a second call replaces the first.
    pub fn subscribe_key_events(&self) -> mpsc::UnboundedReceiver<SenderId> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.key_events.lock() = Some(tx);
        rx
    }

    // ---- session keys ----

    /// Fetch the session for `peer`, establishing or rotating it as
    /// needed. Counts one use. Fails if the peer never announced keys.
    pub fn session_for(&self, peer: SenderId) -> Result<SessionKeys, CryptoError> {
        let their_agreement = self
            .peer_keys(&peer)
            .ok_or_else(|| {
                CryptoError::InvalidKeyMaterial(format!("no announced keys for {peer}"))
            })?
            .agreement;

        let mut sessions = self.sessions.lock();
        let stale = match sessions.get(&peer) {
            Some(s) => s.should_rotate(self.session_max_age, self.session_max_uses),
            None => true,
        };
        if stale {
            sessions.insert(peer, self.establish_session(&their_agreement));
        }
        let session = sessions
            .get_mut(&peer)
            .ok_or_else(|| CryptoError::InvalidKeyMaterial("session vanished".into()))?;
        session.uses += 1;
        Ok(session.clone())
    }

    fn establish_session(&self, their_agreement: &[u8; 32]) -> SessionKeys {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral).to_bytes();
        let shared = ephemeral.diffie_hellman(&PublicKey::from(*their_agreement));
        SessionKeys {
            ephemeral_public,
            shared_secret: derive_session_key(shared.as_bytes()),
            created_at: Instant::now(),
            uses: 0,
        }
    }

    pub fn drop_session(&self, peer: &SenderId) {
        self.sessions.lock().remove(peer);
    }

    // ---- channel keys ----

    /// Derive the channel key from the password and remember it. Every
    /// member running the same derivation gets the same key.
    pub fn join_channel(&self, channel: &str, password: &str) {
        let key = derive_channel_key(channel, password);
        self.channel_keys.lock().insert(channel.to_owned(), key);
    }

    pub fn leave_channel(&self, channel: &str) {
        self.channel_keys.lock().remove(channel);
    }

    pub fn channel_key(&self, channel: &str) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        self.channel_keys
            .lock()
            .get(channel)
            .cloned()
            .ok_or_else(|| CryptoError::ChannelNotJoined(channel.to_owned()))
    }

    pub fn joined_channels(&self) -> Vec<String> {
        self.channel_keys.lock().keys().cloned().collect()
    }

    /// Emergency wipe: sessions, channel keys, and the peer key map.
    /// The identity keys themselves live with `IdentityManager`.
    pub fn clear_all(&self) {
        self.sessions.lock().clear();
        self.channel_keys.lock().clear();
        self.peer_keys.lock().clear();
    }
}

/// Raw ECDH output is never used directly as a cipher key.
fn derive_session_key(shared: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    Zeroizing::new(blake3::derive_key(SESSION_KDF_CONTEXT, shared))
}

/// Password-based channel key. The salt binds the key to the channel
/// name so the same password on two channels yields distinct keys.
fn derive_channel_key(channel: &str, password: &str) -> Zeroizing<[u8; 32]> {
    let salt = blake3::derive_key("embermesh v1 channel salt", channel.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, CHANNEL_KDF_ROUNDS, &mut *key);
    key
}
