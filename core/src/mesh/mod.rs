//! The mesh engine: flood forwarding, local delivery, and the glue
//! between transport, peer registry, dedup cache, and crypto.
//!
//! - `engine`: the node itself and the inbound/outbound paths
//! - `events`: surfaced message/peer/ops streams and counters

pub mod engine;
pub mod events;

pub use engine::{Announcement, MeshNode};
pub use events::{
    EventBus, InboundMessage, MeshEvent, MeshMetrics, MessageScope, MetricsSnapshot,
};
