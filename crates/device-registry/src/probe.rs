// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Free-memory probing for shared-device admission.
//!
//! Shared acquisition only succeeds when the target device reports
//! `free - required > reserved`. The probe is pluggable: production uses
//! the kernel's `/proc/meminfo` `MemAvailable` field (host-attached
//! accelerators draw from host memory), tests inject a fixed value.

use crate::{Device, RegistryError};
use std::path::{Path, PathBuf};

/// Default path to the kernel memory info file.
const MEMINFO_PATH: &str = "/proc/meminfo";

/// Reports the free memory of a device in bytes.
pub trait MemoryProbe: Send + Sync {
    /// Free bytes currently available on the device.
    fn free_bytes(&self, device: Device) -> Result<u64, RegistryError>;
}

/// Probe backed by `/proc/meminfo`'s `MemAvailable` field.
///
/// `MemAvailable` accounts for free memory, buffers, and reclaimable
/// cache — the kernel's best estimate of what a new allocation can use
/// without swapping.
#[derive(Debug, Clone)]
pub struct MeminfoProbe {
    path: PathBuf,
}

impl MeminfoProbe {
    /// Creates a probe reading from a specific file (for testing).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn parse(content: &str, device: Device, path: &Path) -> Result<u64, RegistryError> {
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            if parts.next() == Some("MemAvailable:") {
                let value = parts.next().ok_or_else(|| RegistryError::ProbeFailed {
                    device,
                    detail: format!("{}: MemAvailable has no value", path.display()),
                })?;
                let kb: u64 = value.parse().map_err(|_| RegistryError::ProbeFailed {
                    device,
                    detail: format!("{}: expected integer kB value, got '{value}'", path.display()),
                })?;
                return Ok(kb * 1024);
            }
        }
        Err(RegistryError::ProbeFailed {
            device,
            detail: format!("{}: MemAvailable not found", path.display()),
        })
    }
}

impl Default for MeminfoProbe {
    fn default() -> Self {
        Self {
            path: PathBuf::from(MEMINFO_PATH),
        }
    }
}

impl MemoryProbe for MeminfoProbe {
    fn free_bytes(&self, device: Device) -> Result<u64, RegistryError> {
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| RegistryError::ProbeFailed {
                device,
                detail: format!("cannot read '{}': {e}", self.path.display()),
            })?;
        Self::parse(&content, device, &self.path)
    }
}

/// Probe reporting a fixed free-memory value for every device.
///
/// Used in tests and CLI dry runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    free: u64,
}

impl FixedProbe {
    /// Creates a probe that always reports `free` bytes available.
    pub fn new(free: u64) -> Self {
        Self { free }
    }
}

impl MemoryProbe for FixedProbe {
    fn free_bytes(&self, _device: Device) -> Result<u64, RegistryError> {
        Ok(self.free)
    }
}
