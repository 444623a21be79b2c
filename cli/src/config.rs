// Configuration management for the UWBLink CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/uwblink/config.json
// - Linux: ~/.config/uwblink/config.json
// - Windows: %APPDATA%\uwblink\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uwblink_core::{RangingConfig, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Role used by `encode` when none is given
    pub role: Role,

    /// Write logs to this file in addition to stderr
    pub log_file: Option<String>,

    /// Ranging settings shared with the core
    pub ranging: RangingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Controller,
            log_file: None,
            ranging: RangingConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("uwblink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .ranging
                .validate()
                .context("Invalid ranging settings in config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value. The caller persists it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut ranging = self.ranging.clone();
        match key {
            "role" => {
                self.role = match value {
                    "controller" => Role::Controller,
                    "controlee" => Role::Controlee,
                    _ => anyhow::bail!("Role must be 'controller' or 'controlee'"),
                };
            }
            "log_file" => {
                self.log_file = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "session_id" => {
                ranging.session_id = value.parse().context("Invalid session id")?;
            }
            "sub_session_id" => {
                ranging.sub_session_id = value.parse().context("Invalid sub-session id")?;
            }
            "session_key" => {
                ranging.session_key = hex::decode(value).context("Session key must be hex")?;
            }
            "scan_window_ms" => {
                ranging.scan_window_ms = value.parse().context("Invalid number")?;
            }
            "controlee_default_channel" => {
                ranging.controlee_default_channel =
                    value.parse().context("Invalid channel number")?;
            }
            "service_uuid" => {
                ranging.service_uuid = value.to_string();
            }
            "auto_initiate" => {
                ranging.auto_initiate = value.parse().context("Invalid boolean value")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        ranging.validate().context("Rejected ranging setting")?;
        self.ranging = ranging;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let role = match self.role {
            Role::Controller => "controller",
            Role::Controlee => "controlee",
        };
        vec![
            ("role".to_string(), role.to_string()),
            (
                "log_file".to_string(),
                self.log_file.clone().unwrap_or_else(|| "(none)".to_string()),
            ),
            ("session_id".to_string(), self.ranging.session_id.to_string()),
            (
                "sub_session_id".to_string(),
                self.ranging.sub_session_id.to_string(),
            ),
            ("session_key".to_string(), hex::encode(&self.ranging.session_key)),
            (
                "scan_window_ms".to_string(),
                self.ranging.scan_window_ms.to_string(),
            ),
            (
                "controlee_default_channel".to_string(),
                self.ranging.controlee_default_channel.to_string(),
            ),
            ("service_uuid".to_string(), self.ranging.service_uuid.clone()),
            (
                "auto_initiate".to_string(),
                self.ranging.auto_initiate.to_string(),
            ),
        ]
    }
}
