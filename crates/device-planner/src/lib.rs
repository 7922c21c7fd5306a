// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-planner
//!
//! Maps a model's requested parallelism onto device slots.
//!
//! The planner parses the model's device spec (`""`, `"*"`, `"{k}"`,
//! `"a;b;c"`, optional `"-"` exclusive suffix), applies the
//! default-exclusivity rule (`tp > 1`, MPI mode, or the python engine on
//! an accelerator platform), lays out candidate slots against a registry
//! occupancy snapshot, and finally commits the plan by acquiring leases —
//! all-or-nothing.
//!
//! # Example
//! ```
//! use device_planner::DevicePlanner;
//! use device_registry::{Device, DeviceKind, DeviceRegistry, FixedProbe, SharedDevices};
//! use model_spec::{Capabilities, ModelInfo};
//! use std::sync::Arc;
//!
//! let devices: Vec<Device> = (0..4).map(|i| Device::new(DeviceKind::Gpu, i)).collect();
//! let registry = Arc::new(DeviceRegistry::new(
//!     devices,
//!     SharedDevices::All,
//!     Box::new(FixedProbe::new(8 << 30)),
//! ));
//!
//! let mut model = ModelInfo::new("m", "file:///m");
//! model.engine = "native".to_string();
//! model.device_spec = "{2}".to_string();
//! model.tensor_parallel_degree = 2;
//!
//! let caps = Capabilities { accelerator: true, streaming: false };
//! let planner = DevicePlanner::new(registry);
//! let plan = planner.plan(&model, &caps).unwrap();
//! assert_eq!(plan.num_slots(), 2);
//!
//! let leases = planner.acquire(&model, &plan).unwrap();
//! assert_eq!(leases.len(), 2);
//! ```

mod error;
mod plan;
mod planner;
mod spec;

pub use error::PlanError;
pub use plan::SlotPlan;
pub use planner::DevicePlanner;
pub use spec::{DeviceSpec, SpecForm};
