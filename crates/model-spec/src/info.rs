// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The immutable per-model descriptor.
//!
//! A [`ModelInfo`] is built once at registration from the admission
//! request plus server defaults, validated, and shared read-only with the
//! model's worker pool for its lifetime.

use crate::SpecError;
use std::collections::HashMap;
use std::time::Duration;

/// Immutable descriptor of a registered model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    /// Model name; together with `version` it keys the worker pool.
    pub name: String,
    /// Optional model version.
    pub version: Option<String>,
    /// Where the engine loads the model from.
    pub url: String,
    /// Engine adapter name (resolved against the engine registry).
    pub engine: String,
    /// Raw device spec: empty, `"*"`, `"{k}"`, `"a;b;c"`, optionally
    /// suffixed with `"-"` to force exclusive.
    #[serde(default)]
    pub device_spec: String,
    /// Devices one model replica spans.
    #[serde(default = "default_one")]
    pub tensor_parallel_degree: usize,
    /// Floor for idle retirement.
    #[serde(default)]
    pub min_workers: usize,
    /// Worker target; under MPI also the per-slot replica multiplicity.
    #[serde(default = "default_one")]
    pub max_workers: usize,
    /// Maximum jobs per batch.
    #[serde(default = "default_one")]
    pub batch_size: usize,
    /// Longest a head-of-queue job may wait before its partial batch
    /// dispatches, in milliseconds.
    #[serde(default = "default_batch_delay_ms")]
    pub max_batch_delay_ms: u64,
    /// Idle time after which a worker becomes eligible for retirement,
    /// in milliseconds. Zero disables idle retirement.
    #[serde(default = "default_idle_ms")]
    pub max_idle_ms: u64,
    /// Replicas launch as a multi-process group; one worker then occupies
    /// `tensor_parallel_degree * max_workers` devices.
    #[serde(default)]
    pub mpi: bool,
    /// Pending-job queue capacity; defaults to twice the batch size.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// Memory the model needs on a shared device.
    #[serde(default)]
    pub required_memory_bytes: u64,
    /// Memory headroom to leave on a shared device.
    #[serde(default)]
    pub reserved_memory_bytes: u64,
    /// Translator name; `None` means the identity translator.
    #[serde(default)]
    pub translator: Option<String>,
    /// Opaque options passed through to the engine adapter.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

fn default_one() -> usize {
    1
}

fn default_batch_delay_ms() -> u64 {
    100
}

fn default_idle_ms() -> u64 {
    60_000
}

impl ModelInfo {
    /// Creates a descriptor with defaults for everything but name and url.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            url: url.into(),
            engine: String::new(),
            device_spec: String::new(),
            tensor_parallel_degree: 1,
            min_workers: 0,
            max_workers: 1,
            batch_size: 1,
            max_batch_delay_ms: default_batch_delay_ms(),
            max_idle_ms: default_idle_ms(),
            mpi: false,
            queue_capacity: None,
            required_memory_bytes: 0,
            reserved_memory_bytes: 0,
            translator: None,
            options: HashMap::new(),
        }
    }

    /// The pool key: `"name"` or `"name:version"`.
    pub fn key(&self) -> String {
        match &self.version {
            Some(v) => format!("{}:{v}", self.name),
            None => self.name.clone(),
        }
    }

    /// Batch delay as a [`Duration`].
    pub fn max_batch_delay(&self) -> Duration {
        Duration::from_millis(self.max_batch_delay_ms)
    }

    /// Idle-retirement threshold as a [`Duration`].
    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }

    /// Devices one worker slot spans.
    pub fn devices_per_slot(&self) -> usize {
        self.tensor_parallel_degree * if self.mpi { self.max_workers } else { 1 }
    }

    /// Effective queue capacity: configured, else `2 * batch_size`, never
    /// below `batch_size`.
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(2 * self.batch_size)
            .max(self.batch_size)
    }

    /// Validates the descriptor.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::Validation("model name is empty".to_string()));
        }
        if self.url.is_empty() {
            return Err(SpecError::Validation("model url is empty".to_string()));
        }
        if self.engine.is_empty() {
            return Err(SpecError::Validation("engine name is empty".to_string()));
        }
        if self.tensor_parallel_degree == 0 {
            return Err(SpecError::Validation(
                "tensor_parallel_degree must be >= 1".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(SpecError::Validation("max_workers must be >= 1".to_string()));
        }
        if self.min_workers > self.max_workers {
            return Err(SpecError::Validation(format!(
                "min_workers {} exceeds max_workers {}",
                self.min_workers, self.max_workers,
            )));
        }
        if self.batch_size == 0 {
            return Err(SpecError::Validation("batch_size must be >= 1".to_string()));
        }
        if let Some(cap) = self.queue_capacity {
            if cap < self.batch_size {
                return Err(SpecError::Validation(format!(
                    "queue_capacity {cap} is below batch_size {}",
                    self.batch_size,
                )));
            }
        }
        Ok(())
    }
}
