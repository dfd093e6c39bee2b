// Message header — fixed 20-byte layout, big-endian throughout
//
// byte 0     : protocol version
// byte 1     : message kind
// byte 2     : ttl
// byte 3     : hop count
// bytes 4-11 : message id (i64, BE)
// bytes 12-17: sender id (6 raw bytes)
// bytes 18-19: payload length (u16, BE)

use super::WireError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The single supported protocol version.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 20;

/// Maximum trailing payload: 64 KB minus nothing — the length field is
/// 16 bits, but oversized payloads are rejected before they allocate.
pub const MAX_PAYLOAD: usize = 64 * 1024 - 1;

/// Compact 6-byte device identifier carried on the wire.
///
/// Derived from the first 6 bytes of the device's durable UUID identity
/// and stable for the life of the installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderId(pub [u8; 6]);

impl SenderId {
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Parse from `AA:BB:CC:DD:EE:FF` or bare-hex form.
    pub fn parse(s: &str) -> Option<Self> {
        let cleaned: String = s.chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(cleaned).ok()?;
        let arr: [u8; 6] = bytes.try_into().ok()?;
        Some(SenderId(arr))
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Message kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Plaintext broadcast (0x01)
    Public = 0x01,
    /// End-to-end encrypted direct message (0x02)
    Private = 0x02,
    /// Password-protected channel message (0x03)
    Channel = 0x03,
    /// Identity/key announcement (0x04)
    PeerAnnouncement = 0x04,
    /// Delivery acknowledgment (0x05)
    Acknowledgment = 0x05,
    /// Key exchange (0x06)
    KeyExchange = 0x06,
    /// Store-and-forward handoff (0x07)
    StoreForward = 0x07,
    /// Routing metadata update (0x08)
    RoutingUpdate = 0x08,
}

impl MessageKind {
    /// Convert from the raw wire byte. Unknown kinds are not a codec
    /// error — the engine forwards frames it cannot interpret.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(MessageKind::Public),
            0x02 => Some(MessageKind::Private),
            0x03 => Some(MessageKind::Channel),
            0x04 => Some(MessageKind::PeerAnnouncement),
            0x05 => Some(MessageKind::Acknowledgment),
            0x06 => Some(MessageKind::KeyExchange),
            0x07 => Some(MessageKind::StoreForward),
            0x08 => Some(MessageKind::RoutingUpdate),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// The fixed 20-byte message header.
///
/// `message_id` and `sender_id` never change across hops — together they
/// form the global deduplication identity `(sender_id, message_id)`.
/// `ttl` and `hop_count` are mutated only through [`MessageHeader::forwarded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u8,
    /// Raw kind byte. Decoded frames keep unknown kinds intact so they
    /// can still be relayed.
    pub kind: u8,
    pub ttl: u8,
    pub hop_count: u8,
    pub message_id: i64,
    pub sender_id: SenderId,
    pub payload_len: u16,
}

impl MessageHeader {
    /// Build a fresh origin header (hop count zero, current version).
    pub fn new(kind: MessageKind, ttl: u8, sender_id: SenderId, payload_len: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind: kind.as_u8(),
            ttl,
            hop_count: 0,
            message_id: generate_message_id(),
            sender_id,
            payload_len,
        }
    }

    /// The typed kind, if this implementation understands it.
    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::from_u8(self.kind)
    }

    /// A message is forwardable only while the TTL can be decremented
    /// and still leave a positive budget at the next hop.
    pub fn can_forward(&self) -> bool {
        self.ttl >= 2
    }

    /// Produce the relayed copy: ttl − 1, hop + 1, identity unchanged.
    /// Returns `None` when the TTL is exhausted (a silent outcome, not
    /// an error).
    pub fn forwarded(&self) -> Option<MessageHeader> {
        if !self.can_forward() {
            return None;
        }
        Some(MessageHeader {
            ttl: self.ttl - 1,
            hop_count: self.hop_count.saturating_add(1),
            ..*self
        })
    }

    /// Serialize to exactly [`HEADER_LEN`] bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.kind;
        buf[2] = self.ttl;
        buf[3] = self.hop_count;
        buf[4..12].copy_from_slice(&self.message_id.to_be_bytes());
        buf[12..18].copy_from_slice(&self.sender_id.0);
        buf[18..20].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Parse a header from the front of `data`.
    ///
    /// Fails with `DataTooSmall` below [`HEADER_LEN`] bytes and with
    /// `UnsupportedVersion` when byte 0 is not [`PROTOCOL_VERSION`].
    /// All other fields are taken as-is.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_LEN {
            return Err(WireError::DataTooSmall {
                need: HEADER_LEN,
                got: data.len(),
            });
        }
        if data[0] != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(data[0]));
        }

        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&data[4..12]);
        let mut sender = [0u8; 6];
        sender.copy_from_slice(&data[12..18]);

        Ok(Self {
            version: data[0],
            kind: data[1],
            ttl: data[2],
            hop_count: data[3],
            message_id: i64::from_be_bytes(id_bytes),
            sender_id: SenderId(sender),
            payload_len: u16::from_be_bytes([data[18], data[19]]),
        })
    }
}

/// Generate a message id with negligible collision probability.
///
/// Statistical uniqueness over the process lifetime is the contract;
/// monotonicity is not.
pub fn generate_message_id() -> i64 {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    i64::from_be_bytes(bytes)
}

/// Assemble header + payload into one wire frame.
pub fn encode_frame(header: &MessageHeader, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(WireError::PayloadTooLarge(payload.len()));
    }
    if payload.len() != header.payload_len as usize {
        return Err(WireError::PayloadLengthMismatch {
            declared: header.payload_len as usize,
            actual: payload.len(),
        });
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Split a wire frame into header and payload.
///
/// The trailing payload must carry at least `payload_len` bytes; radio
/// transports may pad, so extra trailing bytes are ignored.
pub fn decode_frame(data: &[u8]) -> Result<(MessageHeader, Vec<u8>), WireError> {
    let header = MessageHeader::decode(data)?;
    let body = &data[HEADER_LEN..];
    let declared = header.payload_len as usize;
    if body.len() < declared {
        return Err(WireError::DataTooSmall {
            need: HEADER_LEN + declared,
            got: data.len(),
        });
    }
    Ok((header, body[..declared].to_vec()))
}
