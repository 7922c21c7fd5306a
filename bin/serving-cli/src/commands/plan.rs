// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `serving plan` command: dry-run the device planner for one token.
//!
//! Builds a synthetic device pool (nothing is acquired against real
//! hardware), plans the token's device spec, and renders the slot
//! layout next to the occupancy windows.

use super::CliError;
use device_planner::DevicePlanner;
use device_registry::{Device, DeviceKind, DeviceRegistry, FixedProbe, SharedDevices};
use model_spec::{Capabilities, ModelInfo, ModelStoreEntry};
use std::sync::Arc;

pub fn execute(
    token: String,
    devices: usize,
    shared_devices: Option<String>,
    tensor_parallel: usize,
    mpi_workers: Option<usize>,
) -> Result<(), CliError> {
    let entry = ModelStoreEntry::parse(&token).map_err(CliError::config)?;
    let shared = match &shared_devices {
        None => SharedDevices::All,
        Some(value) => SharedDevices::parse(value).map_err(CliError::config)?,
    };

    let pool: Vec<Device> = (0..devices)
        .map(|i| Device::new(DeviceKind::Gpu, i as i32))
        .collect();
    let registry = Arc::new(DeviceRegistry::new(
        pool,
        shared,
        Box::new(FixedProbe::new(16 << 30)),
    ));

    let mut model = ModelInfo::new(entry.name.clone(), entry.url.clone());
    model.version = entry.version.clone();
    model.engine = entry.engine.clone().unwrap_or_else(|| "native".to_string());
    model.device_spec = entry.device_spec.clone();
    model.tensor_parallel_degree = tensor_parallel.max(1);
    if let Some(workers) = mpi_workers {
        model.mpi = true;
        model.max_workers = workers.max(1);
    }

    let caps = Capabilities {
        accelerator: true,
        streaming: true,
    };
    let planner = DevicePlanner::new(Arc::clone(&registry));
    let plan = planner.plan(&model, &caps).map_err(CliError::config)?;

    println!("Model:    {} (engine: {})", model.key(), model.engine);
    println!("Spec:     '{}'", model.device_spec);
    println!(
        "Pool:     {} device(s), shared window {}, exclusive region {}",
        registry.num_devices(),
        registry.shared_window(),
        registry.exclusive_len(),
    );
    println!("Plan:     {}", plan.summary());
    for (i, slot) in plan.slots.iter().enumerate() {
        println!("  worker {i}: [{slot}]");
    }
    Ok(())
}
