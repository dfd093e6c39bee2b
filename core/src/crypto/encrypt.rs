//! Encryption service: seals and opens private and channel payloads.
//!
//! Both envelope kinds use XChaCha20-Poly1305 with a random 24-byte
//! nonce and carry an Ed25519 detached signature over `ciphertext ||
//! nonce`. Opening verifies the signature BEFORE touching the cipher:
//! an unverified envelope is never decrypted, and no failure path falls
//! back to plaintext.
//!
//! Private envelopes ride a fresh-per-session ephemeral X25519 key; the
//! recipient re-derives the shared secret from that key and its own
//! static agreement key, so no session state is required to open one.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::keys::KeyManager;
use crate::crypto::CryptoError;
use crate::wire::SenderId;

/// Sealed payload for exactly one recipient. The authentication tag is
/// appended to `ciphertext` by the AEAD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateEnvelope {
    /// Sender's ephemeral X25519 public key for this session. All-zero
    /// means the sender failed to attach one; such envelopes are
    /// rejected before any agreement is attempted.
    pub ephemeral_public: [u8; 32],
    pub nonce: [u8; 24],
    pub ciphertext: Vec<u8>,
    /// Ed25519 signature over `ciphertext || nonce`, 64 bytes.
    pub signature: Vec<u8>,
    /// Sender's signing public key. When the sender has announced keys,
    /// this must match them; otherwise it is trusted on first use.
    pub signing_public_key: [u8; 32],
}

/// Sealed payload for every holder of a channel's password-derived key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEnvelope {
    pub nonce: [u8; 24],
    pub ciphertext: Vec<u8>,
    /// Ed25519 signature over `ciphertext || nonce`, 64 bytes.
    pub signature: Vec<u8>,
    /// Sender's signing public key, same rules as `PrivateEnvelope`.
    pub signing_public_key: [u8; 32],
}

pub fn encrypt_private(
    keys: &KeyManager,
    recipient: SenderId,
    plaintext: &[u8],
) -> Result<PrivateEnvelope, CryptoError> {
    let session = keys.session_for(recipient)?;
    let (nonce, ciphertext) = seal(session.shared_secret(), plaintext)?;
    let signature = keys.sign(&signed_portion(&ciphertext, &nonce)).to_vec();
    Ok(PrivateEnvelope {
        ephemeral_public: session.ephemeral_public(),
        nonce,
        ciphertext,
        signature,
        signing_public_key: keys.signing_public_key(),
    })
}

/// Open a private envelope from `sender`. The shared secret comes from
/// the envelope's ephemeral key, never from our session cache.
pub fn decrypt_private(
    keys: &KeyManager,
    sender: SenderId,
    envelope: &PrivateEnvelope,
) -> Result<Vec<u8>, CryptoError> {
    if envelope.ephemeral_public == [0u8; 32] {
        return Err(CryptoError::MissingEphemeralKey);
    }

    let verify_key = resolve_signing_key(keys, sender, &envelope.signing_public_key)?;
    let signature = signature_bytes(&envelope.signature)?;
    KeyManager::verify(
        &verify_key,
        &signed_portion(&envelope.ciphertext, &envelope.nonce),
        &signature,
    )?;

    let shared = keys.agree_static(&envelope.ephemeral_public);
    open(&shared, &envelope.nonce, &envelope.ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

pub fn encrypt_channel(
    keys: &KeyManager,
    channel: &str,
    plaintext: &[u8],
) -> Result<ChannelEnvelope, CryptoError> {
    let key = keys.channel_key(channel)?;
    let (nonce, ciphertext) = seal(&key, plaintext)?;
    let signature = keys.sign(&signed_portion(&ciphertext, &nonce)).to_vec();
    Ok(ChannelEnvelope {
        nonce,
        ciphertext,
        signature,
        signing_public_key: keys.signing_public_key(),
    })
}

/// Open a channel envelope from `sender`. An AEAD failure here almost
/// always means our password derivation disagrees with the sender's.
pub fn decrypt_channel(
    keys: &KeyManager,
    channel: &str,
    sender: SenderId,
    envelope: &ChannelEnvelope,
) -> Result<Vec<u8>, CryptoError> {
    let verify_key = resolve_signing_key(keys, sender, &envelope.signing_public_key)?;
    let signature = signature_bytes(&envelope.signature)?;
    KeyManager::verify(
        &verify_key,
        &signed_portion(&envelope.ciphertext, &envelope.nonce),
        &signature,
    )?;

    let key = keys.channel_key(channel)?;
    open(&key, &envelope.nonce, &envelope.ciphertext)
        .map_err(|_| CryptoError::WrongChannelPassword)
}

/// Pick the key to verify an envelope's signature with. A sender that
/// has announced keys must sign with them; the embedded key is only
/// trusted when we have nothing on record for the sender.
fn resolve_signing_key(
    keys: &KeyManager,
    sender: SenderId,
    embedded: &[u8; 32],
) -> Result<[u8; 32], CryptoError> {
    match keys.peer_keys(&sender) {
        Some(known) if known.signing != *embedded => Err(CryptoError::SignatureInvalid),
        Some(known) => Ok(known.signing),
        None => Ok(*embedded),
    }
}

fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<([u8; 24], Vec<u8>), CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; 24];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    Ok((nonce, ciphertext))
}

fn open(key: &[u8; 32], nonce: &[u8; 24], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

fn signed_portion(ciphertext: &[u8], nonce: &[u8; 24]) -> Vec<u8> {
    let mut data = Vec::with_capacity(ciphertext.len() + nonce.len());
    data.extend_from_slice(ciphertext);
    data.extend_from_slice(nonce);
    data
}

fn signature_bytes(raw: &[u8]) -> Result<[u8; 64], CryptoError> {
    raw.try_into()
        .map_err(|_| CryptoError::MalformedEnvelope(format!("signature length {}", raw.len())))
}
