//! Transport abstraction
//!
//! The mesh engine is transport-agnostic: anything that can surface
//! links and move opaque frames over them plugs in here. A transport
//! mints a `ConnectionId` per visible link, reports lifecycle and
//! inbound frames as [`TransportEvent`]s on a channel handed over at
//! construction, and accepts outbound frames through the [`Transport`]
//! trait.
//!
//! `local` provides the in-process hub used by tests and the demo CLI.

pub mod local;

pub use local::{LocalEndpoint, LocalHub};

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::peer::ConnectionId;

/// Events from the transport to the mesh engine.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A link became visible.
    LinkUp { connection: ConnectionId },
    /// A link went away. The `ConnectionId` is dead afterwards.
    LinkDown { connection: ConnectionId },
    /// A raw frame arrived on a link.
    Frame {
        connection: ConnectionId,
        data: Vec<u8>,
    },
    /// The transport measured the link's signal strength.
    Signal {
        connection: ConnectionId,
        rssi: i16,
    },
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::LinkUp { connection } => {
                write!(f, "LinkUp {{ connection: {connection} }}")
            }
            TransportEvent::LinkDown { connection } => {
                write!(f, "LinkDown {{ connection: {connection} }}")
            }
            TransportEvent::Frame { connection, data } => {
                write!(
                    f,
                    "Frame {{ connection: {connection}, len: {} }}",
                    data.len()
                )
            }
            TransportEvent::Signal { connection, rssi } => {
                write!(f, "Signal {{ connection: {connection}, rssi: {rssi} }}")
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Transport is shut down")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Outbound half of a transport. The inbound half is the
/// [`TransportEvent`] receiver obtained when the transport is built.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Push one frame down a link.
    async fn send(&self, connection: ConnectionId, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Tear down every link this endpoint holds.
    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// Channel pair a transport uses to report events.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;
