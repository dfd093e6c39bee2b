// Configuration management for the Embermesh CLI
//
// Cross-platform config stored in:
// - macOS/Linux: ~/.config/embermesh/config.json
// - Windows: %APPDATA%\embermesh\config.json

use anyhow::{Context, Result};
use embermesh_core::MeshConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Display name announced to the mesh
    pub nickname: Option<String>,

    /// Engine tuning, flattened into the same file
    pub mesh: MeshConfig,
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("embermesh");

        std::fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("embermesh");

        std::fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents = std::fs::read_to_string(&config_file)
                .context("Failed to read config file")?;
            let config: Config = serde_json::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(&config_file, contents)
            .context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value by dotted key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "nickname" => {
                self.nickname = Some(value.to_string());
            }
            "default_ttl" => {
                self.mesh.default_ttl = value.parse().context("Invalid TTL")?;
            }
            "max_connected_peers" => {
                self.mesh.max_connected_peers =
                    value.parse().context("Invalid peer limit")?;
            }
            "dedup_capacity" => {
                self.mesh.dedup_capacity = value.parse().context("Invalid capacity")?;
            }
            "dedup_expiry_secs" => {
                self.mesh.dedup_expiry_secs = value.parse().context("Invalid seconds")?;
            }
            "connect_timeout_secs" => {
                self.mesh.connect_timeout_secs = value.parse().context("Invalid seconds")?;
            }
            _ => anyhow::bail!("Unknown config key: {key}"),
        }
        self.save()
    }

    /// Get a config value by dotted key
    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "nickname" => self.nickname.clone().unwrap_or_else(|| "(unset)".into()),
            "default_ttl" => self.mesh.default_ttl.to_string(),
            "max_connected_peers" => self.mesh.max_connected_peers.to_string(),
            "dedup_capacity" => self.mesh.dedup_capacity.to_string(),
            "dedup_expiry_secs" => self.mesh.dedup_expiry_secs.to_string(),
            "connect_timeout_secs" => self.mesh.connect_timeout_secs.to_string(),
            _ => anyhow::bail!("Unknown config key: {key}"),
        };
        Ok(value)
    }
}
