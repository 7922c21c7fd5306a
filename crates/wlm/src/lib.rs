// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # wlm
//!
//! The serving workload manager: given registered models and a stream of
//! inference requests, it decides how many workers each model has, which
//! devices they occupy, and how queued jobs dispatch to them under
//! batching and backpressure constraints.
//!
//! Data flow:
//! ```text
//! submit ──▶ WorkloadManager ──▶ WorkerPool ──▶ JobQueue
//!                                                  │
//!                                   Batcher ◄──────┘
//!                                      │  (full batch or delay expired)
//!                                      ▼
//!                                   Worker ──▶ engine ──▶ StreamingResult
//! ```
//!
//! Control flow: `register` runs the device planner, commits slots to the
//! registry, and spawns the fleet; `scale` and `unregister` walk the same
//! path in reverse. A background sweep replaces dead workers and retires
//! idle ones.
//!
//! # Concurrency
//!
//! One OS thread per worker (engine calls block), one batcher task per
//! pool, one sweep task per manager. The device registry is the only
//! process-wide shared state; each pool serializes its admin operations
//! behind its own lock. Background tasks log and continue; only registry
//! corruption panics.

mod batcher;
mod config;
mod error;
mod job;
mod manager;
mod pool;
mod queue;
mod worker;

pub use config::{ServerConfig, ENV_MODEL_STORE, ENV_SHARED_DEVICES};
pub use error::{Result, WlmError};
pub use job::{Batch, Job};
pub use manager::{RegisterRequest, WorkloadManager};
pub use pool::{WorkerPool, WorkerSnapshot};
pub use queue::JobQueue;
pub use worker::{WorkerHandle, WorkerState};
