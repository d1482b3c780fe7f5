//! Configuration module for medflow
//!
//! The engine reads a single TOML file. Every table and field is optional;
//! missing values fall back to the defaults below.
//!
//! # Example
//!
//! ```toml
//! [channels]
//! queue_capacity = 50
//!
//! [streaming]
//! mode = "newest_frame_only"
//! frame_interval_ms = 33
//! loop_frames = false
//! replays = 0
//!
//! [synchronizer]
//! always_rerun = true
//! priority_port = 0
//!
//! [logging]
//! filter = "info,medflow=debug"
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{MedflowError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Conventional file name of the engine configuration
pub const CONFIG_FILE_NAME: &str = "medflow.toml";

// ==================== Engine Config ====================

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub channels: ChannelSettings,
    pub streaming: StreamingConfig,
    pub synchronizer: SynchronizerConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MedflowError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MedflowError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        tracing::debug!("Loaded config from {:?}", path);
        Self::from_toml_str(&content)
    }

    /// Load a configuration file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MedflowError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| MedflowError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            MedflowError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check values that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.channels.queue_capacity == 0 {
            return Err(MedflowError::Config(
                "channels.queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
