// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The process-wide device occupancy registry.
//!
//! Every device is `Free`, `Exclusive` (one owner), or `Shared` (one or
//! more owners, reference-counted by holder id). All transitions go
//! through the registry's acquire operations and the [`DeviceLease`]
//! drop path; both serialize on one internal lock. Acquisition happens
//! at registration, scaling, and teardown, so coarse locking is correct
//! and cheap.
//!
//! # Ownership Model
//!
//! ```text
//! DeviceRegistry::acquire_*()
//!       │
//!       ▼
//!   DeviceLease  ◄─── owns a DeviceSet, holds Arc<RegistryInner>
//!       │
//!       │  drop()
//!       ▼
//!   RegistryInner::release()  ──► occupancy back to Free
//! ```
//!
//! A registry state that contradicts a lease (releasing a device the
//! lease never held) is corruption and panics; it is the sole panic
//! class in the system.

use crate::{Device, DeviceSet, MemoryProbe, RegistryError, SharedDevices};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Occupancy state of a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    /// No owner.
    Free,
    /// Pinned to exactly one owner.
    Exclusive,
    /// One or more owners, subject to memory headroom.
    Shared,
}

struct RegistryState {
    occ: Vec<Occupancy>,
    /// Shared holder ids per device; empty unless `occ` is `Shared`.
    holders: Vec<HashSet<u64>>,
}

pub(crate) struct RegistryInner {
    devices: Vec<Device>,
    /// Size of the shared window (the highest-index devices).
    max_shared: usize,
    /// Length of the exclusive region starting at index 0.
    exclusive_len: usize,
    probe: Box<dyn MemoryProbe>,
    state: Mutex<RegistryState>,
    next_holder: AtomicU64,
}

impl RegistryInner {
    /// Called by `DeviceLease::drop` to return devices.
    ///
    /// Release is always best-effort successful; inconsistencies between
    /// the lease and the occupancy table are corruption and panic.
    pub(crate) fn release(&self, indices: &[usize], holder: u64, exclusive: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for &idx in indices {
            if exclusive {
                match state.occ[idx] {
                    Occupancy::Exclusive => state.occ[idx] = Occupancy::Free,
                    other => panic!(
                        "registry corruption: exclusive release of {} found {:?}",
                        self.devices[idx], other,
                    ),
                }
            } else {
                match state.occ[idx] {
                    Occupancy::Shared => {
                        if !state.holders[idx].remove(&holder) {
                            panic!(
                                "registry corruption: holder {holder} does not hold {}",
                                self.devices[idx],
                            );
                        }
                        if state.holders[idx].is_empty() {
                            state.occ[idx] = Occupancy::Free;
                        }
                    }
                    other => panic!(
                        "registry corruption: shared release of {} found {:?}",
                        self.devices[idx], other,
                    ),
                }
            }
        }
        tracing::debug!(holder, ?indices, exclusive, "devices released");
    }
}

/// The process-wide device registry.
///
/// Cheap to clone the handle via `Arc`; all clones share occupancy state.
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    /// Creates a registry over a discovered device sequence.
    ///
    /// `shared` bounds the shared window. With an explicit count or ratio
    /// the exclusive region is everything below the window; with ALL both
    /// regions span the full range.
    pub fn new(
        devices: Vec<Device>,
        shared: SharedDevices,
        probe: Box<dyn MemoryProbe>,
    ) -> Self {
        let n = devices.len();
        let max_shared = shared.resolve(n);
        let exclusive_len = if shared.is_all() { n } else { n - max_shared };
        tracing::info!(
            devices = n,
            shared_window = max_shared,
            exclusive_region = exclusive_len,
            "device registry initialised"
        );
        Self {
            inner: Arc::new(RegistryInner {
                devices,
                max_shared,
                exclusive_len,
                probe,
                state: Mutex::new(RegistryState {
                    occ: vec![Occupancy::Free; n],
                    holders: vec![HashSet::new(); n],
                }),
                next_holder: AtomicU64::new(1),
            }),
        }
    }

    /// Number of devices in the discovered sequence.
    pub fn num_devices(&self) -> usize {
        self.inner.devices.len()
    }

    /// The discovered device sequence.
    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    /// Kind of the discovered devices (one kind per process), if any.
    pub fn kind(&self) -> Option<crate::DeviceKind> {
        self.inner.devices.first().map(|d| d.kind)
    }

    /// Size of the shared window (highest-index devices).
    pub fn shared_window(&self) -> usize {
        self.inner.max_shared
    }

    /// Length of the exclusive region starting at index 0.
    pub fn exclusive_len(&self) -> usize {
        self.inner.exclusive_len
    }

    /// Snapshot of per-device occupancy.
    pub fn occupancy(&self) -> Vec<Occupancy> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner()).occ.clone()
    }

    /// Acquires the lowest contiguous run of `count` free devices in the
    /// exclusive region, flipping them to `Exclusive`.
    ///
    /// Left-to-right scanning keeps exclusive reservations packed at low
    /// indices, away from the shared window.
    pub fn acquire_exclusive(&self, count: usize) -> Result<DeviceLease, RegistryError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        let region = inner.exclusive_len;

        if count == 0 || count > region {
            return Err(RegistryError::NoCapacity {
                requested: count,
                region,
            });
        }
        for start in 0..=(region - count) {
            if state.occ[start..start + count]
                .iter()
                .all(|&o| o == Occupancy::Free)
            {
                for idx in start..start + count {
                    state.occ[idx] = Occupancy::Exclusive;
                }
                drop(state);
                return Ok(self.lease(start..start + count, true));
            }
        }
        Err(RegistryError::NoCapacity {
            requested: count,
            region,
        })
    }

    /// Acquires a specific contiguous range `[start, start + count)`
    /// exclusively. Fails with `Conflict` if any device in the range is
    /// not free.
    ///
    /// No window check: explicit placements are the caller's override.
    pub fn acquire_exclusive_at(
        &self,
        start: usize,
        count: usize,
    ) -> Result<DeviceLease, RegistryError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        let n = inner.devices.len();

        if count == 0 || start + count > n {
            return Err(RegistryError::UnknownDevice {
                id: start + count.saturating_sub(1),
            });
        }
        for idx in start..start + count {
            if state.occ[idx] != Occupancy::Free {
                return Err(RegistryError::Conflict {
                    device: inner.devices[idx],
                });
            }
        }
        for idx in start..start + count {
            state.occ[idx] = Occupancy::Exclusive;
        }
        drop(state);
        Ok(self.lease(start..start + count, true))
    }

    /// Acquires one shared holding on a device in the shared window.
    ///
    /// Succeeds only if the device is `Free` or already `Shared`, lies in
    /// the shared window, and the memory probe reports
    /// `free - required > reserved`. Marking is idempotent; each call adds
    /// one holder.
    pub fn acquire_shared(
        &self,
        device_id: usize,
        required: u64,
        reserved: u64,
    ) -> Result<DeviceLease, RegistryError> {
        let inner = &self.inner;
        let n = inner.devices.len();
        if device_id >= n {
            return Err(RegistryError::UnknownDevice { id: device_id });
        }
        let device = inner.devices[device_id];
        if device_id < n - inner.max_shared {
            return Err(RegistryError::OutsideSharedWindow {
                device,
                window: inner.max_shared,
            });
        }

        // Probe outside the lock; the result is advisory headroom, not a
        // transition.
        let free = inner.probe.free_bytes(device)?;
        if free.saturating_sub(required) <= reserved {
            return Err(RegistryError::MemoryExhausted {
                device,
                free,
                required,
                reserved,
            });
        }

        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.occ[device_id] == Occupancy::Exclusive {
            return Err(RegistryError::Conflict { device });
        }
        let holder = inner.next_holder.fetch_add(1, Ordering::Relaxed);
        state.occ[device_id] = Occupancy::Shared;
        state.holders[device_id].insert(holder);
        drop(state);

        tracing::debug!(holder, %device, "shared device acquired");
        Ok(DeviceLease {
            set: DeviceSet::single(device),
            indices: vec![device_id],
            holder,
            exclusive: false,
            inner: Some(Arc::clone(inner)),
        })
    }

    fn lease(&self, range: std::ops::Range<usize>, exclusive: bool) -> DeviceLease {
        let holder = self.inner.next_holder.fetch_add(1, Ordering::Relaxed);
        let indices: Vec<usize> = range.clone().collect();
        let set = DeviceSet::new(range.map(|i| self.inner.devices[i]).collect());
        tracing::debug!(holder, %set, exclusive, "devices acquired");
        DeviceLease {
            set,
            indices,
            holder,
            exclusive,
            inner: Some(Arc::clone(&self.inner)),
        }
    }
}

impl Clone for DeviceRegistry {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.num_devices())
            .field("shared_window", &self.inner.max_shared)
            .field("exclusive_len", &self.inner.exclusive_len)
            .finish()
    }
}

/// An RAII lease over an acquired [`DeviceSet`].
///
/// Dropping the lease returns the devices: exclusive holdings go back to
/// `Free`, shared holdings decrement the holder count and free the device
/// when the last holder drops. A worker owns its lease for its lifetime
/// and releases it on the transition to Dead.
pub struct DeviceLease {
    set: DeviceSet,
    indices: Vec<usize>,
    holder: u64,
    exclusive: bool,
    /// `None` for CPU leases, which the registry does not track.
    inner: Option<Arc<RegistryInner>>,
}

impl DeviceLease {
    /// A lease over the CPU pseudo-device; no registry bookkeeping.
    pub fn cpu() -> Self {
        Self {
            set: DeviceSet::cpu(),
            indices: Vec::new(),
            holder: 0,
            exclusive: false,
            inner: None,
        }
    }

    /// The leased device set.
    pub fn devices(&self) -> &DeviceSet {
        &self.set
    }

    /// Returns `true` for exclusive holdings.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// The holder id assigned at acquisition.
    pub fn holder(&self) -> u64 {
        self.holder
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release(&self.indices, self.holder, self.exclusive);
        }
    }
}

impl fmt::Debug for DeviceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLease")
            .field("devices", &format_args!("{}", self.set))
            .field("holder", &self.holder)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceKind, FixedProbe};

    fn gpus(n: usize) -> Vec<Device> {
        (0..n).map(|i| Device::new(DeviceKind::Gpu, i as i32)).collect()
    }

    fn registry(n: usize, shared: SharedDevices) -> DeviceRegistry {
        DeviceRegistry::new(gpus(n), shared, Box::new(FixedProbe::new(8 << 30)))
    }

    #[test]
    fn test_acquire_exclusive_packs_low() {
        let r = registry(8, SharedDevices::All);
        let a = r.acquire_exclusive(2).unwrap();
        let b = r.acquire_exclusive(2).unwrap();
        assert_eq!(a.devices().ids(), vec![0, 1]);
        assert_eq!(b.devices().ids(), vec![2, 3]);

        let occ = r.occupancy();
        assert_eq!(&occ[..4], &[Occupancy::Exclusive; 4]);
        assert_eq!(&occ[4..], &[Occupancy::Free; 4]);
    }

    #[test]
    fn test_release_on_drop() {
        let r = registry(4, SharedDevices::All);
        let lease = r.acquire_exclusive(4).unwrap();
        assert!(r.occupancy().iter().all(|&o| o == Occupancy::Exclusive));
        drop(lease);
        assert!(r.occupancy().iter().all(|&o| o == Occupancy::Free));
    }

    #[test]
    fn test_exclusive_no_capacity() {
        let r = registry(4, SharedDevices::All);
        let _a = r.acquire_exclusive(3).unwrap();
        let result = r.acquire_exclusive(2);
        assert!(matches!(result, Err(RegistryError::NoCapacity { .. })));
    }

    #[test]
    fn test_exclusive_skips_occupied_runs() {
        let r = registry(6, SharedDevices::All);
        let _a = r.acquire_exclusive_at(1, 2).unwrap();
        // The lowest run of 2 free devices is now [3, 4].
        let b = r.acquire_exclusive(2).unwrap();
        assert_eq!(b.devices().ids(), vec![3, 4]);
    }

    #[test]
    fn test_acquire_exclusive_at_conflict() {
        let r = registry(4, SharedDevices::All);
        let _a = r.acquire_exclusive_at(0, 2).unwrap();
        let result = r.acquire_exclusive_at(1, 2);
        assert!(matches!(result, Err(RegistryError::Conflict { .. })));
    }

    #[test]
    fn test_acquire_exclusive_at_out_of_range() {
        let r = registry(4, SharedDevices::All);
        assert!(matches!(
            r.acquire_exclusive_at(3, 2),
            Err(RegistryError::UnknownDevice { .. })
        ));
    }

    #[test]
    fn test_exclusive_region_bounded_by_shared_window() {
        // n=4, window=2 → exclusive region is [0, 2).
        let r = registry(4, SharedDevices::Count(2));
        assert_eq!(r.exclusive_len(), 2);
        let a = r.acquire_exclusive(2).unwrap();
        assert_eq!(a.devices().ids(), vec![0, 1]);
        assert!(matches!(
            r.acquire_exclusive(1),
            Err(RegistryError::NoCapacity { .. })
        ));
    }

    #[test]
    fn test_shared_refcount() {
        let r = registry(4, SharedDevices::All);
        let a = r.acquire_shared(3, 0, 0).unwrap();
        let b = r.acquire_shared(3, 0, 0).unwrap();
        assert_eq!(r.occupancy()[3], Occupancy::Shared);

        drop(a);
        assert_eq!(r.occupancy()[3], Occupancy::Shared);
        drop(b);
        assert_eq!(r.occupancy()[3], Occupancy::Free);
    }

    #[test]
    fn test_shared_window_enforced() {
        let r = registry(4, SharedDevices::Count(2));
        assert!(r.acquire_shared(3, 0, 0).is_ok());
        assert!(r.acquire_shared(2, 0, 0).is_ok());
        assert!(matches!(
            r.acquire_shared(1, 0, 0),
            Err(RegistryError::OutsideSharedWindow { .. })
        ));
    }

    #[test]
    fn test_shared_rejects_exclusive_device() {
        let r = registry(4, SharedDevices::All);
        let _a = r.acquire_exclusive_at(3, 1).unwrap();
        assert!(matches!(
            r.acquire_shared(3, 0, 0),
            Err(RegistryError::Conflict { .. })
        ));
    }

    #[test]
    fn test_shared_memory_headroom() {
        let devices = gpus(2);
        let r = DeviceRegistry::new(devices, SharedDevices::All, Box::new(FixedProbe::new(1000)));
        // free - required must exceed reserved.
        assert!(r.acquire_shared(1, 400, 500).is_ok()); // 600 > 500
        assert!(matches!(
            r.acquire_shared(1, 600, 500),
            Err(RegistryError::MemoryExhausted { .. })
        ));
    }

    #[test]
    fn test_shared_unknown_device() {
        let r = registry(2, SharedDevices::All);
        assert!(matches!(
            r.acquire_shared(5, 0, 0),
            Err(RegistryError::UnknownDevice { .. })
        ));
    }

    #[test]
    fn test_exclusive_rejects_shared_device() {
        let r = registry(2, SharedDevices::All);
        let _s = r.acquire_shared(0, 0, 0).unwrap();
        assert!(matches!(
            r.acquire_exclusive_at(0, 1),
            Err(RegistryError::Conflict { .. })
        ));
    }

    #[test]
    fn test_cpu_lease_is_untracked() {
        let lease = DeviceLease::cpu();
        assert!(lease.devices().is_cpu());
        assert!(!lease.is_exclusive());
        drop(lease); // no registry to corrupt
    }

    #[test]
    fn test_zero_count_rejected() {
        let r = registry(4, SharedDevices::All);
        assert!(r.acquire_exclusive(0).is_err());
        assert!(r.acquire_exclusive_at(0, 0).is_err());
    }

    #[test]
    fn test_debug_format() {
        let r = registry(4, SharedDevices::Count(2));
        let debug = format!("{r:?}");
        assert!(debug.contains("DeviceRegistry"));
        assert!(debug.contains("shared_window"));
    }
}
