// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the workload manager.

/// Errors that can occur across admission, scheduling, and execution.
#[derive(Debug, thiserror::Error)]
pub enum WlmError {
    /// No pool is registered under this key.
    #[error("model '{key}' is not registered")]
    ModelNotFound { key: String },

    /// A pool already exists under this key.
    #[error("model '{key}' is already registered")]
    AlreadyRegistered { key: String },

    /// The pending-job queue is at capacity; the caller should back off.
    #[error("job queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    /// The pool (or the whole manager) is shutting down.
    #[error("workload manager is shutting down")]
    Shutdown,

    /// A worker died while executing a batch; its jobs are failed, not
    /// retried.
    #[error("worker fault: {detail}")]
    WorkerFault { detail: String },

    /// The device planner refused the layout.
    #[error(transparent)]
    Plan(#[from] device_planner::PlanError),

    /// The device registry refused an acquisition.
    #[error(transparent)]
    Registry(#[from] device_registry::RegistryError),

    /// A model descriptor or store token was invalid.
    #[error(transparent)]
    Spec(#[from] model_spec::SpecError),

    /// The engine failed to load or run.
    #[error(transparent)]
    Engine(#[from] model_spec::EngineError),

    /// Server configuration was invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for workload-manager operations.
pub type Result<T> = std::result::Result<T, WlmError>;
