// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::bluetooth::{DEFAULT_READ_BUFFER_SIZE, SPP_UUID};

/// Service name registered for the listening endpoint.
pub const DEFAULT_SERVICE_NAME: &str = "BluetoothConnectionService";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Session settings.
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Service name of the listening endpoint.
    pub service_name: String,

    /// Service UUID; the Serial Port Profile by default.
    pub service_uuid: Uuid,

    /// RFCOMM channel to listen on and dial.
    pub channel: u8,

    /// Power on the adapter if it is off.
    pub power_on: bool,

    /// Require an authenticated (paired) link for inbound connections.
    pub require_authentication: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_uuid: SPP_UUID,
            channel: 1,
            power_on: true,
            require_authentication: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum bytes delivered per read.
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clappylock")
            .join("config.toml")
    }

    /// Load configuration from the default file or create it.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Unable to read {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Invalid configuration in {}", path.display()))?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.bluetooth.service_name.trim().is_empty() {
            return Err(anyhow!("bluetooth.service_name must not be empty"));
        }
        // RFCOMM channels are 1..=30.
        if !(1..=30).contains(&self.bluetooth.channel) {
            return Err(anyhow!(
                "bluetooth.channel must be between 1 and 30, got {}",
                self.bluetooth.channel
            ));
        }
        if self.session.read_buffer_size == 0 {
            return Err(anyhow!("session.read_buffer_size must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config, Config::default());
        assert!(path.exists());
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bluetooth]\nchannel = 3\n").unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.bluetooth.channel, 3);
        assert_eq!(config.bluetooth.service_name, DEFAULT_SERVICE_NAME);
        assert_eq!(config.bluetooth.service_uuid, SPP_UUID);
        assert_eq!(config.session.read_buffer_size, 1024);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "[bluetooth]\nchannel = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());

        std::fs::write(&path, "[session]\nread_buffer_size = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());

        std::fs::write(&path, "[bluetooth]\nservice_name = \" \"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
