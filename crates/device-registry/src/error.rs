// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the device registry.

use crate::Device;

/// Errors that can occur during device acquisition and configuration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No contiguous run of free devices satisfies the request.
    #[error("no capacity: no run of {requested} contiguous free devices in the exclusive region ({region} devices)")]
    NoCapacity { requested: usize, region: usize },

    /// A specific device range overlaps an existing reservation.
    #[error("device {device} conflicts with an existing reservation")]
    Conflict { device: Device },

    /// A shared acquisition targeted a device below the shared window.
    #[error("device {device} is outside the shared window (top {window} devices)")]
    OutsideSharedWindow { device: Device, window: usize },

    /// The device lacks memory headroom for another shared holder.
    #[error("device {device} lacks memory headroom: {free} bytes free, {required} required, {reserved} reserved")]
    MemoryExhausted {
        device: Device,
        free: u64,
        required: u64,
        reserved: u64,
    },

    /// The device ordinal does not exist in the discovered sequence.
    #[error("unknown device id {id}")]
    UnknownDevice { id: usize },

    /// The memory probe could not be read.
    #[error("memory probe failed for {device}: {detail}")]
    ProbeFailed { device: Device, detail: String },

    /// The shared-device configuration value could not be parsed.
    #[error("invalid shared-device setting '{value}': {detail}")]
    BadSharedSetting { value: String, detail: String },
}
