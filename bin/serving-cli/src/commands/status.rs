// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `serving status` command: show discovered devices and memory headroom.

use super::CliError;
use device_registry::{Device, MeminfoProbe, MemoryProbe};

pub fn execute() -> Result<(), CliError> {
    let devices = device_registry::discover(None);

    println!("  Devices");
    if devices.is_empty() {
        println!("   none discovered (CPU-only)");
    } else {
        for device in &devices {
            println!("   {device}");
        }
    }
    println!();

    println!("  Memory");
    let probe = MeminfoProbe::default();
    match probe.free_bytes(Device::CPU) {
        Ok(free) => {
            println!("   Available:    {} MB", free / (1024 * 1024));
        }
        Err(e) => {
            println!("   Unavailable:  {e}");
        }
    }
    println!();

    println!("  Environment");
    for key in [wlm::ENV_SHARED_DEVICES, wlm::ENV_MODEL_STORE] {
        match std::env::var(key) {
            Ok(value) => println!("   {key}={value}"),
            Err(_) => println!("   {key} (unset)"),
        }
    }
    Ok(())
}
