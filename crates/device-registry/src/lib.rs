// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-registry
//!
//! Process-wide accelerator occupancy state for the serving workload
//! manager.
//!
//! # Key Components
//!
//! - [`Device`] / [`DeviceKind`] / [`DeviceSet`] — device identity and the
//!   contiguous groups worker replicas own. [`discover`] probes the host
//!   once at startup for the fixed, ordered device sequence.
//! - [`SharedDevices`] — how many high-index devices may be used in shared
//!   mode (count, ratio of the pool, or ALL).
//! - [`DeviceRegistry`] — the occupancy table (`Free` / `Exclusive` /
//!   `Shared`) behind a single lock, with shared holdings reference-counted
//!   per holder.
//! - [`DeviceLease`] — an RAII guard over acquired devices. Dropping the
//!   lease releases them; the borrow checker makes double-release a compile
//!   error.
//! - [`MemoryProbe`] — pluggable free-memory reporting that gates shared
//!   admission (`free - required > reserved`).
//!
//! # Example
//! ```
//! use device_registry::{Device, DeviceKind, DeviceRegistry, FixedProbe, SharedDevices};
//!
//! let devices: Vec<Device> = (0..4).map(|i| Device::new(DeviceKind::Gpu, i)).collect();
//! let registry = DeviceRegistry::new(
//!     devices,
//!     SharedDevices::All,
//!     Box::new(FixedProbe::new(8 << 30)),
//! );
//!
//! let lease = registry.acquire_exclusive(2).unwrap();
//! assert_eq!(lease.devices().ids(), vec![0, 1]);
//!
//! // Devices return to Free when the lease drops.
//! drop(lease);
//! ```

mod device;
mod error;
mod probe;
pub mod registry;
mod shared;

pub use device::{discover, Device, DeviceKind, DeviceSet};
pub use error::RegistryError;
pub use probe::{FixedProbe, MeminfoProbe, MemoryProbe};
pub use registry::{DeviceLease, DeviceRegistry, Occupancy};
pub use shared::SharedDevices;
