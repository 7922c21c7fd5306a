// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device identity and startup discovery.
//!
//! A process sees a fixed, ordered sequence of devices `D0..Dn-1`,
//! discovered exactly once at startup. The CPU is the pseudo-device with
//! id `-1`; it never appears in the discovered sequence and is never
//! tracked by the registry.

use std::fmt;
use std::path::Path;

/// Default procfs directory listing one entry per NVIDIA GPU.
const NVIDIA_GPUS_PATH: &str = "/proc/driver/nvidia/gpus";

/// Default directory holding Neuron device nodes (`neuron0`, `neuron1`, ...).
const DEV_PATH: &str = "/dev";

/// The kind of compute device a worker can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Host CPU (the fallback when no accelerators are present).
    Cpu,
    /// CUDA-style GPU.
    Gpu,
    /// Neuron-style accelerator core.
    Accelerator,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Gpu => write!(f, "gpu"),
            DeviceKind::Accelerator => write!(f, "acc"),
        }
    }
}

/// A single compute device: `(kind, ordinal id)`.
///
/// The CPU pseudo-device is `Device::CPU` with id `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Device {
    /// Device kind.
    pub kind: DeviceKind,
    /// Ordinal within the discovered sequence; `-1` for the CPU.
    pub id: i32,
}

impl Device {
    /// The CPU pseudo-device.
    pub const CPU: Device = Device {
        kind: DeviceKind::Cpu,
        id: -1,
    };

    /// Creates a device of the given kind and ordinal.
    pub fn new(kind: DeviceKind, id: i32) -> Self {
        Self { kind, id }
    }

    /// Returns `true` for the CPU pseudo-device.
    pub fn is_cpu(&self) -> bool {
        self.kind == DeviceKind::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cpu() {
            write!(f, "cpu")
        } else {
            write!(f, "{}{}", self.kind, self.id)
        }
    }
}

/// The contiguous group of devices one worker replica owns.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceSet {
    devices: Vec<Device>,
}

impl DeviceSet {
    /// Creates a device set from an ordered list of devices.
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    /// The single-slot CPU set.
    pub fn cpu() -> Self {
        Self {
            devices: vec![Device::CPU],
        }
    }

    /// A set containing one device.
    pub fn single(device: Device) -> Self {
        Self {
            devices: vec![device],
        }
    }

    /// The devices in this set, in order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Number of devices in the set.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Returns `true` if this is the CPU set.
    pub fn is_cpu(&self) -> bool {
        self.devices.first().is_some_and(Device::is_cpu)
    }

    /// Ordinal ids of the devices in the set.
    pub fn ids(&self) -> Vec<i32> {
        self.devices.iter().map(|d| d.id).collect()
    }

    /// First device ordinal, if any.
    pub fn first_id(&self) -> Option<i32> {
        self.devices.first().map(|d| d.id)
    }
}

impl fmt::Display for DeviceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for d in &self.devices {
            if !first {
                write!(f, "+")?;
            }
            write!(f, "{d}")?;
            first = false;
        }
        Ok(())
    }
}

/// Discovers the process-wide device sequence.
///
/// Resolution order:
/// 1. `count_override` — a configured device count (GPU kind assumed).
/// 2. NVIDIA procfs — one GPU per entry in `/proc/driver/nvidia/gpus`.
/// 3. Neuron device nodes — `/dev/neuron0`, `/dev/neuron1`, ...
/// 4. Nothing found — an empty sequence (CPU-only process).
///
/// A single accelerator kind per process: discovery stops at the first
/// kind that yields devices.
pub fn discover(count_override: Option<usize>) -> Vec<Device> {
    discover_at(
        count_override,
        Path::new(NVIDIA_GPUS_PATH),
        Path::new(DEV_PATH),
    )
}

/// Discovery against specific filesystem roots (for testing).
pub(crate) fn discover_at(
    count_override: Option<usize>,
    nvidia_gpus: &Path,
    dev: &Path,
) -> Vec<Device> {
    if let Some(count) = count_override {
        tracing::info!(count, "device count configured, skipping probe");
        return (0..count)
            .map(|i| Device::new(DeviceKind::Gpu, i as i32))
            .collect();
    }

    if let Ok(entries) = std::fs::read_dir(nvidia_gpus) {
        let count = entries.filter_map(|e| e.ok()).count();
        if count > 0 {
            tracing::info!(count, "discovered NVIDIA GPUs");
            return (0..count)
                .map(|i| Device::new(DeviceKind::Gpu, i as i32))
                .collect();
        }
    }

    // Neuron nodes are numbered contiguously from 0.
    let mut count = 0;
    while dev.join(format!("neuron{count}")).exists() {
        count += 1;
    }
    if count > 0 {
        tracing::info!(count, "discovered Neuron accelerators");
        return (0..count)
            .map(|i| Device::new(DeviceKind::Accelerator, i as i32))
            .collect();
    }

    tracing::info!("no accelerators found, running CPU-only");
    Vec::new()
}
