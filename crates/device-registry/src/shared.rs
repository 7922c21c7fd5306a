// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shared-device window configuration.
//!
//! `SharedDevices` bounds how many high-index devices may be used in
//! shared mode. It is fixed at registry init from configuration: an
//! integer is an absolute count, a float in `(0, 1]` is a ratio of the
//! device count, and an absent value means ALL.

use crate::RegistryError;
use std::fmt;

/// How many high-index devices may be used in shared mode.
///
/// # Parsing
/// - `"2"` → [`SharedDevices::Count(2)`]
/// - `"0.5"` → [`SharedDevices::Ratio(0.5)`] (fraction of the device count)
/// - absent → [`SharedDevices::All`]
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SharedDevices {
    /// Every device may be shared (the default).
    All,
    /// Exactly this many high-index devices may be shared.
    Count(usize),
    /// This fraction of the device count, from the high end.
    Ratio(f64),
}

impl SharedDevices {
    /// Parses a `SERVING_SHARED_DEVICES`-style value.
    pub fn parse(s: &str) -> Result<Self, RegistryError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(SharedDevices::All);
        }

        if let Ok(count) = s.parse::<usize>() {
            return Ok(SharedDevices::Count(count));
        }

        let ratio: f64 = s.parse().map_err(|_| RegistryError::BadSharedSetting {
            value: s.to_string(),
            detail: "expected an integer count or a float in (0, 1]".to_string(),
        })?;
        if ratio <= 0.0 || ratio > 1.0 {
            return Err(RegistryError::BadSharedSetting {
                value: s.to_string(),
                detail: format!("ratio {ratio} is outside (0, 1]"),
            });
        }
        Ok(SharedDevices::Ratio(ratio))
    }

    /// Resolves the window size against a concrete device count.
    pub fn resolve(&self, num_devices: usize) -> usize {
        match self {
            SharedDevices::All => num_devices,
            SharedDevices::Count(c) => (*c).min(num_devices),
            SharedDevices::Ratio(r) => ((num_devices as f64) * r).floor() as usize,
        }
    }

    /// Returns `true` for the ALL setting.
    pub fn is_all(&self) -> bool {
        matches!(self, SharedDevices::All)
    }
}

impl Default for SharedDevices {
    fn default() -> Self {
        SharedDevices::All
    }
}

impl fmt::Display for SharedDevices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharedDevices::All => write!(f, "all"),
            SharedDevices::Count(c) => write!(f, "{c}"),
            SharedDevices::Ratio(r) => write!(f, "{r}"),
        }
    }
}
