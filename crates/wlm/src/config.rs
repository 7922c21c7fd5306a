// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Server configuration loaded from TOML files or constructed
//! programmatically, with environment overrides.
//!
//! # TOML Format
//! ```toml
//! device_count = 8
//! shared_devices = "0.5"
//! model_store = "/opt/models"
//! batch_size = 4
//! max_batch_delay_ms = 100
//! max_idle_ms = 60000
//! ```
//!
//! # Environment
//! - `SERVING_SHARED_DEVICES` overrides `shared_devices`.
//! - `SERVING_MODEL_STORE` overrides `model_store`.

use crate::WlmError;
use device_registry::SharedDevices;
use std::path::{Path, PathBuf};
use std::time::Duration;
use streaming::StreamConfig;

/// Environment variable bounding the shared-device window.
pub const ENV_SHARED_DEVICES: &str = "SERVING_SHARED_DEVICES";

/// Environment variable pointing at the model-store root.
pub const ENV_MODEL_STORE: &str = "SERVING_MODEL_STORE";

/// Configuration for the workload manager.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServerConfig {
    /// Fixed device count; `None` probes the host at startup.
    pub device_count: Option<usize>,
    /// Shared-window setting: integer count or float ratio in `(0, 1]`.
    pub shared_devices: Option<String>,
    /// Model-store root to load at startup.
    pub model_store: Option<PathBuf>,
    /// Default engine for registrations that name none.
    #[serde(default = "default_engine")]
    pub default_engine: String,
    /// Default per-model batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Default per-model batch delay in milliseconds.
    #[serde(default = "default_batch_delay_ms")]
    pub max_batch_delay_ms: u64,
    /// Default per-model idle-retirement threshold in milliseconds.
    #[serde(default = "default_idle_ms")]
    pub max_idle_ms: u64,
    /// Background sweep period in milliseconds (clamped to half the
    /// smallest idle threshold at runtime).
    #[serde(default = "default_sweep_ms")]
    pub sweep_interval_ms: u64,
    /// Result-stream channel bound.
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
    /// Result-stream backpressure watermark in milliseconds.
    #[serde(default = "default_watermark_ms")]
    pub stream_watermark_ms: u64,
}

fn default_engine() -> String {
    "echo".to_string()
}

fn default_batch_size() -> usize {
    1
}

fn default_batch_delay_ms() -> u64 {
    100
}

fn default_idle_ms() -> u64 {
    60_000
}

fn default_sweep_ms() -> u64 {
    500
}

fn default_stream_capacity() -> usize {
    32
}

fn default_watermark_ms() -> u64 {
    10_000
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, WlmError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WlmError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, WlmError> {
        toml::from_str(toml_str).map_err(|e| WlmError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, WlmError> {
        toml::to_string_pretty(self)
            .map_err(|e| WlmError::Config(format!("TOML serialise error: {e}")))
    }

    /// Applies `SERVING_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(ENV_SHARED_DEVICES) {
            self.shared_devices = Some(value);
        }
        if let Ok(value) = std::env::var(ENV_MODEL_STORE) {
            self.model_store = Some(PathBuf::from(value));
        }
    }

    /// Resolves the shared-window setting.
    pub fn shared_devices(&self) -> Result<SharedDevices, WlmError> {
        match &self.shared_devices {
            None => Ok(SharedDevices::All),
            Some(value) => SharedDevices::parse(value).map_err(WlmError::Registry),
        }
    }

    /// Background sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Result-stream tuning derived from this config.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            capacity: self.stream_capacity.max(1),
            watermark: Duration::from_millis(self.stream_watermark_ms),
            ..StreamConfig::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            device_count: None,
            shared_devices: None,
            model_store: None,
            default_engine: default_engine(),
            batch_size: default_batch_size(),
            max_batch_delay_ms: default_batch_delay_ms(),
            max_idle_ms: default_idle_ms(),
            sweep_interval_ms: default_sweep_ms(),
            stream_capacity: default_stream_capacity(),
            stream_watermark_ms: default_watermark_ms(),
        }
    }
}
