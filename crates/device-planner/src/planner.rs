// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The device planner: spec string → slot plan → committed leases.
//!
//! Planning is purely algorithmic against an occupancy snapshot, which
//! keeps it unit-testable; committing re-validates under the registry
//! lock, so a plan that raced another registration simply fails at the
//! acquisition step with nothing committed.
//!
//! Tie-breaks: exclusive slots collect lowest-index-first (dense packing
//! at the low end), shared slots collect highest-index-first (keeps
//! shared load out of the exclusive region).

use crate::{DeviceSpec, PlanError, SlotPlan, SpecForm};
use device_registry::{
    DeviceKind, DeviceLease, DeviceRegistry, DeviceSet, Occupancy,
};
use model_spec::{Capabilities, ModelInfo};
use std::sync::Arc;

/// Plans and acquires device slots against a shared registry.
pub struct DevicePlanner {
    registry: Arc<DeviceRegistry>,
}

impl DevicePlanner {
    /// Creates a planner over the process registry.
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Computes the full slot plan for a model registration.
    pub fn plan(&self, model: &ModelInfo, caps: &Capabilities) -> Result<SlotPlan, PlanError> {
        let spec = DeviceSpec::parse(&model.device_spec)?;
        if spec.is_cpu() || !caps.accelerator || self.registry.num_devices() == 0 {
            tracing::debug!(model = %model.key(), "CPU slot plan");
            return Ok(SlotPlan::cpu());
        }
        let exclusive = self.is_exclusive(model, &spec);
        let dps = model.devices_per_slot();
        let occ = self.registry.occupancy();

        let slots = match &spec.form {
            SpecForm::Cpu => unreachable!("handled above"),
            SpecForm::All => self.layout(&occ, dps, exclusive, None, false)?,
            SpecForm::Count(k) => self.layout(&occ, dps, exclusive, Some(*k), false)?,
            SpecForm::Explicit(ids) => self.layout_explicit(&occ, ids, dps, exclusive, &model.device_spec)?,
        };

        let plan = SlotPlan {
            slots,
            exclusive,
            devices_per_slot: dps,
        };
        tracing::info!(model = %model.key(), plan = %plan.summary(), "slot plan computed");
        Ok(plan)
    }

    /// Computes `delta` additional slots for a scale-up.
    ///
    /// Shared deltas may stack repeats onto already-shared devices, since
    /// shared workers co-occupy; exclusive deltas need fresh runs.
    pub fn plan_delta(
        &self,
        model: &ModelInfo,
        caps: &Capabilities,
        delta: usize,
    ) -> Result<SlotPlan, PlanError> {
        let spec = DeviceSpec::parse(&model.device_spec)?;
        if spec.is_cpu() || !caps.accelerator || self.registry.num_devices() == 0 {
            return Ok(SlotPlan {
                slots: vec![DeviceSet::cpu(); delta],
                exclusive: false,
                devices_per_slot: 1,
            });
        }
        let exclusive = self.is_exclusive(model, &spec);
        let dps = model.devices_per_slot();
        let occ = self.registry.occupancy();

        let slots = match &spec.form {
            SpecForm::Cpu => unreachable!("handled above"),
            SpecForm::All | SpecForm::Count(_) => {
                self.layout(&occ, dps, exclusive, Some(delta), !exclusive)?
            }
            SpecForm::Explicit(ids) => {
                let all = self.layout_explicit(&occ, ids, dps, exclusive, &model.device_spec)?;
                if exclusive {
                    if all.len() < delta {
                        return Err(PlanError::InsufficientSlots {
                            requested: delta,
                            available: all.len(),
                        });
                    }
                    all.into_iter().take(delta).collect()
                } else {
                    cycle(all, delta)
                }
            }
        };

        Ok(SlotPlan {
            slots,
            exclusive,
            devices_per_slot: dps,
        })
    }

    /// Commits a plan: acquires every slot from the registry, returning
    /// one lease per slot. All-or-nothing: the first failure drops every
    /// lease acquired so far.
    pub fn acquire(
        &self,
        model: &ModelInfo,
        plan: &SlotPlan,
    ) -> Result<Vec<DeviceLease>, PlanError> {
        if plan.is_cpu() {
            return Ok(plan.slots.iter().map(|_| DeviceLease::cpu()).collect());
        }
        let mut leases = Vec::with_capacity(plan.slots.len());
        for slot in &plan.slots {
            let lease = if plan.exclusive {
                let start = slot.first_id().unwrap_or(0) as usize;
                self.registry.acquire_exclusive_at(start, slot.len())?
            } else {
                let id = slot.first_id().unwrap_or(0) as usize;
                self.registry.acquire_shared(
                    id,
                    model.required_memory_bytes,
                    model.reserved_memory_bytes,
                )?
            };
            leases.push(lease);
        }
        Ok(leases)
    }

    /// The default-exclusivity rule, plus the spec's `-` override.
    fn is_exclusive(&self, model: &ModelInfo, spec: &DeviceSpec) -> bool {
        spec.forced_exclusive
            || model.tensor_parallel_degree > 1
            || model.mpi
            || (model.engine.eq_ignore_ascii_case("python")
                && self.registry.kind() == Some(DeviceKind::Accelerator))
    }

    /// Collects candidate slots from an occupancy snapshot.
    ///
    /// `target = None` means "as many as fit" (`*`). `stack` lets shared
    /// collection wrap around its candidates to reach the target.
    fn layout(
        &self,
        occ: &[Occupancy],
        dps: usize,
        exclusive: bool,
        target: Option<usize>,
        stack: bool,
    ) -> Result<Vec<DeviceSet>, PlanError> {
        let devices = self.registry.devices();
        let n = devices.len();
        let mut slots = Vec::new();

        if exclusive {
            let region = self.registry.exclusive_len();
            let mut start = 0;
            // Inclusive upper bound: a slot fits iff start + dps <= region.
            while start + dps <= region {
                if occ[start..start + dps].iter().all(|&o| o == Occupancy::Free) {
                    slots.push(DeviceSet::new(devices[start..start + dps].to_vec()));
                    if target.is_some_and(|t| slots.len() == t) {
                        break;
                    }
                }
                start += dps;
            }
        } else {
            let window = self.registry.shared_window();
            for idx in (n - window..n).rev() {
                if occ[idx] != Occupancy::Exclusive {
                    slots.push(DeviceSet::single(devices[idx]));
                    if target.is_some_and(|t| slots.len() == t) {
                        break;
                    }
                }
            }
        }

        let mode = if exclusive { "exclusive" } else { "shared" };
        if slots.is_empty() {
            return Err(PlanError::NoSlots {
                devices_per_slot: dps,
                mode,
            });
        }
        if let Some(t) = target {
            if slots.len() < t {
                if stack && !exclusive {
                    return Ok(cycle(slots, t));
                }
                return Err(PlanError::InsufficientSlots {
                    requested: t,
                    available: slots.len(),
                });
            }
        }
        Ok(slots)
    }

    /// Lays out an explicit id list: chunked into `dps`-sized groups.
    fn layout_explicit(
        &self,
        occ: &[Occupancy],
        ids: &[usize],
        dps: usize,
        exclusive: bool,
        raw_spec: &str,
    ) -> Result<Vec<DeviceSet>, PlanError> {
        let devices = self.registry.devices();
        let n = devices.len();
        let bad = |detail: String| PlanError::BadSpec {
            spec: raw_spec.to_string(),
            detail,
        };

        for &id in ids {
            if id >= n {
                return Err(bad(format!("device id {id} is out of range (0..{n})")));
            }
        }
        if ids.len() % dps != 0 {
            return Err(bad(format!(
                "{} device ids do not divide into groups of {dps}",
                ids.len(),
            )));
        }

        let mut slots = Vec::new();
        for group in ids.chunks(dps) {
            // A slot is a contiguous range; "0;2" cannot back a tp=2 slot.
            if group.windows(2).any(|w| w[1] != w[0] + 1) {
                return Err(bad(format!("device group {group:?} is not contiguous")));
            }
            if exclusive {
                if let Some(&taken) = group.iter().find(|&&id| occ[id] != Occupancy::Free) {
                    return Err(device_registry::RegistryError::Conflict {
                        device: devices[taken],
                    }
                    .into());
                }
            } else if occ[group[0]] == Occupancy::Exclusive {
                return Err(device_registry::RegistryError::Conflict {
                    device: devices[group[0]],
                }
                .into());
            }
            slots.push(DeviceSet::new(group.iter().map(|&id| devices[id]).collect()));
        }
        Ok(slots)
    }
}

/// Repeats a candidate list round-robin until it reaches `target`.
fn cycle(candidates: Vec<DeviceSet>, target: usize) -> Vec<DeviceSet> {
    let mut slots = Vec::with_capacity(target);
    let mut i = 0;
    while slots.len() < target {
        slots.push(candidates[i % candidates.len()].clone());
        i += 1;
    }
    slots
}
