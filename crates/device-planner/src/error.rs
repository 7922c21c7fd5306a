// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the device planner.

/// Errors that can occur while planning or acquiring device slots.
///
/// All planner failures are terminal for the registration call; no
/// partial allocation is ever committed.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The device spec string could not be parsed.
    #[error("bad device spec '{spec}': {detail}")]
    BadSpec { spec: String, detail: String },

    /// No slot of the requested shape fits the current occupancy.
    #[error("no device slots fit ({devices_per_slot} devices per slot, {mode} mode)")]
    NoSlots {
        devices_per_slot: usize,
        mode: &'static str,
    },

    /// Some slots fit, but fewer than requested.
    #[error("insufficient device slots: requested {requested}, only {available} available")]
    InsufficientSlots { requested: usize, available: usize },

    /// The registry refused an acquisition.
    #[error(transparent)]
    Registry(#[from] device_registry::RegistryError),
}
