//! Node configuration.
//!
//! Everything has a sensible default; a node built with
//! `MeshConfig::default()` behaves like a stock deployment. Durations
//! are stored as seconds so the struct serializes cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Initial TTL stamped on locally originated messages.
    pub default_ttl: u8,
    /// Hard cap on simultaneously connected peers.
    pub max_connected_peers: usize,
    /// Dedup cache entry limit (FIFO eviction beyond this).
    pub dedup_capacity: usize,
    /// Dedup entries older than this are expired.
    pub dedup_expiry_secs: u64,
    /// How often the dedup sweep runs.
    pub dedup_sweep_interval_secs: u64,
    /// Discovered/disconnected peers idle longer than this are evicted.
    pub peer_stale_after_secs: u64,
    /// How often the stale-peer sweep runs.
    pub peer_sweep_interval_secs: u64,
    /// A connect attempt stuck longer than this is abandoned.
    pub connect_timeout_secs: u64,
    /// How often stuck connect attempts are checked.
    pub connect_sweep_interval_secs: u64,
    /// Session keys rotate after this many seals.
    pub session_max_uses: u64,
    /// Session keys rotate after this age.
    pub session_max_age_secs: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            default_ttl: 7,
            max_connected_peers: 7,
            dedup_capacity: 1_000,
            dedup_expiry_secs: 300,
            dedup_sweep_interval_secs: 30,
            peer_stale_after_secs: 180,
            peer_sweep_interval_secs: 30,
            connect_timeout_secs: 10,
            connect_sweep_interval_secs: 5,
            session_max_uses: 1_000,
            session_max_age_secs: 3_600,
        }
    }
}

impl MeshConfig {
    pub fn dedup_expiry(&self) -> Duration {
        Duration::from_secs(self.dedup_expiry_secs)
    }

    pub fn dedup_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dedup_sweep_interval_secs)
    }

    pub fn peer_stale_after(&self) -> Duration {
        Duration::from_secs(self.peer_stale_after_secs)
    }

    pub fn peer_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.peer_sweep_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn connect_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.connect_sweep_interval_secs)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = MeshConfig::default();
        assert_eq!(config.default_ttl, 7);
        assert_eq!(config.max_connected_peers, 7);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: MeshConfig = serde_json::from_str(r#"{"default_ttl": 3}"#).unwrap();
        assert_eq!(config.default_ttl, 3);
        assert_eq!(config.max_connected_peers, 7);
        assert_eq!(config.dedup_capacity, 1_000);
    }
}
