//! End-to-end encryption subsystem
//!
//! - `keys`: the key manager — identity keys, per-peer session keys with
//!   lazy rotation, channel keys, and the peer public-key map
//! - `encrypt`: the encryption service — private and channel envelopes
//!   (XChaCha20-Poly1305 + Ed25519 detached signatures)

pub mod encrypt;
pub mod keys;

pub use encrypt::{
    decrypt_channel, decrypt_private, encrypt_channel, encrypt_private, ChannelEnvelope,
    PrivateEnvelope,
};
pub use keys::{KeyManager, PeerKeys, SessionKeys};

use thiserror::Error;

/// Crypto failures. Every variant means the message is dropped — a
/// failed decrypt never falls back to treating the payload as plaintext.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Envelope is missing the ephemeral public key")]
    MissingEphemeralKey,

    #[error("Authentication tag mismatch")]
    AuthenticationFailed,

    #[error("Wrong channel password")]
    WrongChannelPassword,

    #[error("Channel not joined: {0}")]
    ChannelNotJoined(String),

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}
