//! Embermesh wire format — fixed 20-byte header framing
//!
//! This module provides:
//! - MessageHeader: fixed-width, big-endian encoded message header
//! - MessageKind: the message type byte enumeration
//! - SenderId: compact 6-byte device identifier used on the wire
//! - Frame helpers: header + trailing payload assembly and parsing
//!
//! The codec validates only what it owns: buffer length and protocol
//! version. Type, TTL and hop semantics belong to the forwarding engine.

pub mod header;

pub use header::{
    decode_frame, encode_frame, generate_message_id, MessageHeader, MessageKind, SenderId,
    HEADER_LEN, MAX_PAYLOAD, PROTOCOL_VERSION,
};

use thiserror::Error;

/// Wire codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Buffer too short: need {need} bytes, got {got}")]
    DataTooSmall { need: usize, got: usize },

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Payload too large: {0} bytes (max {MAX})", MAX = MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("Payload length mismatch: header says {declared}, frame carries {actual}")]
    PayloadLengthMismatch { declared: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert_eq!(PROTOCOL_VERSION, 0x01);
    }

    #[test]
    fn test_error_display() {
        let err = WireError::DataTooSmall { need: 20, got: 3 };
        assert!(err.to_string().contains("need 20"));
        assert!(WireError::UnsupportedVersion(9).to_string().contains('9'));
    }
}
