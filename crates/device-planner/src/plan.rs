// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Slot plan: the output of the device planner.
//!
//! A plan is the ordered list of device sets the model's workers will
//! own, one set per worker replica. The plan is the contract between the
//! planner and the worker pool; committing it to the registry happens in
//! a separate acquisition step.

use device_registry::DeviceSet;

/// The device layout for one model's worker fleet.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SlotPlan {
    /// One device set per worker replica, in spawn order.
    pub slots: Vec<DeviceSet>,
    /// Whether the slots are exclusive reservations.
    pub exclusive: bool,
    /// Devices each slot spans (`tp * (mpi ? max_workers : 1)`).
    pub devices_per_slot: usize,
}

impl SlotPlan {
    /// The single-slot CPU plan.
    pub fn cpu() -> Self {
        Self {
            slots: vec![DeviceSet::cpu()],
            exclusive: false,
            devices_per_slot: 1,
        }
    }

    /// Number of worker slots in the plan.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` for the CPU plan.
    pub fn is_cpu(&self) -> bool {
        self.slots.first().is_some_and(DeviceSet::is_cpu)
    }

    /// Returns a human-readable summary of the plan.
    pub fn summary(&self) -> String {
        let slots: Vec<String> = self.slots.iter().map(|s| format!("[{s}]")).collect();
        format!(
            "{} slot(s), {} devices/slot, {}: {}",
            self.num_slots(),
            self.devices_per_slot,
            if self.exclusive { "exclusive" } else { "shared" },
            slots.join(" "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_registry::{Device, DeviceKind};

    #[test]
    fn test_cpu_plan() {
        let plan = SlotPlan::cpu();
        assert!(plan.is_cpu());
        assert_eq!(plan.num_slots(), 1);
        assert!(!plan.exclusive);
    }

    #[test]
    fn test_summary() {
        let plan = SlotPlan {
            slots: vec![
                DeviceSet::new(vec![
                    Device::new(DeviceKind::Gpu, 0),
                    Device::new(DeviceKind::Gpu, 1),
                ]),
                DeviceSet::new(vec![
                    Device::new(DeviceKind::Gpu, 2),
                    Device::new(DeviceKind::Gpu, 3),
                ]),
            ],
            exclusive: true,
            devices_per_slot: 2,
        };
        let s = plan.summary();
        assert!(s.contains("2 slot(s)"));
        assert!(s.contains("exclusive"));
        assert!(s.contains("[gpu0+gpu1]"));
    }
}
