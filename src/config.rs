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
//! Handles loading and saving connection and pairing settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

const APP_DIR: &str = "bt-classic-serial";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection settings.
    pub bluetooth: BluetoothConfig,

    /// Pairing request handling used by the daemon.
    pub pairing: PairingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter to use, e.g. "hci0". The default adapter when unset.
    pub adapter: Option<String>,

    /// Service UUID used when a connect request names none.
    pub service_uuid: Uuid,

    /// RFCOMM channel tried when the service connection fails.
    pub alternate_channel: u8,

    /// Upper bound on the size of a single delivered chunk.
    pub read_buffer_size: usize,

    /// Time given to in-flight writes before a local disconnect closes the socket.
    pub disconnect_grace_ms: u64,

    /// How long to wait for BlueZ to hand over a profile connection.
    pub connect_timeout_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            service_uuid: SPP_UUID,
            alternate_channel: 1,
            read_buffer_size: 1024,
            disconnect_grace_ms: 100,
            connect_timeout_secs: 30,
        }
    }
}

impl BluetoothConfig {
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Start intercepting pairing requests when the daemon starts.
    pub handle_requests: bool,

    /// Confirm passkey and consent requests without asking.
    pub auto_accept: bool,

    /// PIN supplied for PIN pairing requests.
    pub pin: Option<String>,
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
