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

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::{ConnectionConfig, DEFAULT_MAX_LINE_LENGTH};

const APP_DIR: &str = "smartbag";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for storage and settings.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Wire protocol settings.
    pub protocol: ProtocolConfig,

    pub controller: ControllerConfig,
}

/// Which transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// RFCOMM when compiled in, otherwise the simulator.
    #[default]
    Auto,
    Rfcomm,
    Simulator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    pub backend: Backend,

    /// RFCOMM channel of the device's serial port service.
    pub rfcomm_channel: u8,

    pub connect_timeout_ms: u64,

    pub write_timeout_ms: u64,

    /// How long a scan listens for devices.
    pub discovery_timeout_ms: u64,

    /// Reconnect to the last device on startup.
    pub auto_reconnect: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Auto,
            rfcomm_channel: 1,
            connect_timeout_ms: 10_000,
            write_timeout_ms: 2_000,
            discovery_timeout_ms: 10_000,
            auto_reconnect: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Longest accepted inbound line, in bytes.
    pub max_line_length: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Delay before the status request that follows an umbrella or SMS command.
    pub follow_up_delay_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            follow_up_delay_ms: 1_000,
        }
    }
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;

        config.data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Load from a specific file, writing defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Connection manager settings derived from this configuration.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(self.bluetooth.connect_timeout_ms),
            write_timeout: Duration::from_millis(self.bluetooth.write_timeout_ms),
            max_line_length: self.protocol.max_line_length,
        }
    }

    pub fn follow_up_delay(&self) -> Duration {
        Duration::from_millis(self.controller.follow_up_delay_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.bluetooth.discovery_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_written_on_first_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.bluetooth.backend, Backend::Auto);
        assert_eq!(config.bluetooth.rfcomm_channel, 1);
        assert_eq!(config.protocol.max_line_length, 1024);
        assert_eq!(config.follow_up_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[bluetooth]\nbackend = \"simulator\"\nconnect_timeout_ms = 500\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.bluetooth.backend, Backend::Simulator);
        assert!(config.bluetooth.auto_reconnect);

        let connection = config.connection();
        assert_eq!(connection.connect_timeout, Duration::from_millis(500));
        assert_eq!(connection.write_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.bluetooth.rfcomm_channel = 3;
        config.bluetooth.auto_reconnect = false;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.bluetooth.rfcomm_channel, 3);
        assert!(!loaded.bluetooth.auto_reconnect);
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bluetooth]\nbackend = \"serial\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
