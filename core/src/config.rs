//! Ranging configuration and its on-disk persistence

use crate::oob::UWB_SERVICE_UUID;
use crate::ranging::{RangingConfigId, SessionTemplate, UpdateRate};
use crate::transport::ble::{AdvertiseSettings, DEFAULT_SCAN_WINDOW_MS};
use crate::UwbError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const CONFIG_FILE: &str = "ranging_config.json";

/// Session id advertised and used when none is configured
pub const DEFAULT_SESSION_ID: u16 = 12345;

/// UWB channel a controlee uses for a manual start
pub const DEFAULT_CONTROLEE_CHANNEL: u8 = 9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Scan window must be > 0")]
    ZeroScanWindow,
    #[error("Invalid service UUID: {0}")]
    InvalidServiceUuid(String),
    #[error("Session key must not be empty")]
    EmptySessionKey,
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Malformed config: {0}")]
    Malformed(String),
}

impl From<ConfigError> for UwbError {
    fn from(e: ConfigError) -> Self {
        UwbError::Config(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    pub session_id: u16,
    pub sub_session_id: u32,
    pub session_key: Vec<u8>,
    pub config_id: RangingConfigId,
    pub update_rate: UpdateRate,
    /// How long a scan runs before it stops on its own
    pub scan_window_ms: u64,
    pub controlee_default_channel: u8,
    pub service_uuid: String,
    /// Start ranging with the first complementary peer of a scan
    pub auto_initiate: bool,
    pub advertise: AdvertiseSettings,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            session_id: DEFAULT_SESSION_ID,
            sub_session_id: 0,
            session_key: vec![0u8; 8],
            config_id: RangingConfigId::MulticastDsTwr,
            update_rate: UpdateRate::Automatic,
            scan_window_ms: DEFAULT_SCAN_WINDOW_MS,
            controlee_default_channel: DEFAULT_CONTROLEE_CHANNEL,
            service_uuid: UWB_SERVICE_UUID.to_string(),
            auto_initiate: true,
            advertise: AdvertiseSettings::default(),
        }
    }
}

impl RangingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_window_ms == 0 {
            return Err(ConfigError::ZeroScanWindow);
        }
        self.service_id()?;
        if self.session_key.is_empty() {
            return Err(ConfigError::EmptySessionKey);
        }
        Ok(())
    }

    pub fn service_id(&self) -> Result<Uuid, ConfigError> {
        Uuid::parse_str(&self.service_uuid)
            .map_err(|_| ConfigError::InvalidServiceUuid(self.service_uuid.clone()))
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    /// Session-independent ranging parameters
    pub fn template(&self) -> SessionTemplate {
        SessionTemplate {
            config_id: self.config_id,
            sub_session_id: self.sub_session_id,
            session_key: self.session_key.clone(),
            sub_session_key: None,
            update_rate: self.update_rate,
        }
    }
}

/// Loads and stores `RangingConfig` as JSON under a storage directory
pub struct ConfigManager {
    storage_path: PathBuf,
}

impl ConfigManager {
    pub fn new(storage_path: String) -> Self {
        Self {
            storage_path: PathBuf::from(storage_path),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.storage_path.join(CONFIG_FILE)
    }

    /// Stored config, or the defaults when nothing has been saved yet
    pub fn load(&self) -> Result<RangingConfig, UwbError> {
        let file = self.config_file();
        if !file.exists() {
            debug!("No config at {}, using defaults", file.display());
            return Ok(RangingConfig::default());
        }

        let data = std::fs::read_to_string(&file)
            .map_err(|e| ConfigError::Storage(e.to_string()))?;
        let config: RangingConfig =
            serde_json::from_str(&data).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: RangingConfig) -> Result<(), UwbError> {
        self.validate(config.clone())?;

        std::fs::create_dir_all(&self.storage_path)
            .map_err(|e| ConfigError::Storage(e.to_string()))?;

        let data = serde_json::to_string_pretty(&config)
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        std::fs::write(self.config_file(), data)
            .map_err(|e| ConfigError::Storage(e.to_string()))?;

        info!("Saved ranging config to {}", self.config_file().display());
        Ok(())
    }

    pub fn validate(&self, config: RangingConfig) -> Result<(), UwbError> {
        config.validate().map_err(UwbError::from)
    }

    pub fn default_config(&self) -> RangingConfig {
        RangingConfig::default()
    }
}
