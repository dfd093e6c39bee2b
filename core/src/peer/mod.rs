//! Peer lifecycle tracking
//!
//! - `registry`: the connection-state machine and lookup tables
//! - `blocklist`: the persistent set of blocked sender identifiers
//!
//! The registry is the single source of truth for who we are connected
//! to; the forwarding engine consults it on every relay decision.

pub mod blocklist;
pub mod registry;

pub use blocklist::Blocklist;
pub use registry::{ConnectionId, PeerEvent, PeerRecord, PeerRegistry, PeerState};

use crate::store::StoreError;
use crate::wire::SenderId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Connected peer limit reached ({limit})")]
    CapacityExceeded { limit: usize },

    #[error("Peer {0} is blocked")]
    Blocked(SenderId),

    #[error("Unknown connection {0}")]
    UnknownConnection(registry::ConnectionId),

    #[error("No known connection for peer {0}")]
    PeerNotFound(SenderId),

    #[error("Peer identity not yet announced on connection {0}")]
    IdentityUnknown(registry::ConnectionId),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: registry::PeerState,
        to: registry::PeerState,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
