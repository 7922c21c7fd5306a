// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Jobs and batches.
//!
//! A job is created at submission, owned by the queue until a batch
//! claims it, then by the worker until the terminal chunk; the caller
//! holds only the consumer half of its result stream.

use std::fmt;
use std::time::{Duration, Instant};
use streaming::ChunkPublisher;

/// One pending inference request.
pub struct Job {
    /// Pool-scoped job id.
    pub id: u64,
    /// Key of the model this job targets.
    pub model_key: String,
    /// Opaque request payload handed to the engine.
    pub payload: Vec<u8>,
    /// Producer half of the caller's result stream.
    pub publisher: ChunkPublisher,
    /// Latest instant by which the job must be dispatched.
    pub deadline: Option<Instant>,
    /// Submission time.
    pub created_at: Instant,
}

impl Job {
    /// Creates a job at submission time.
    pub fn new(
        id: u64,
        model_key: impl Into<String>,
        payload: Vec<u8>,
        publisher: ChunkPublisher,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            id,
            model_key: model_key.into(),
            payload,
            publisher,
            deadline,
            created_at: Instant::now(),
        }
    }

    /// Wall time since submission.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Returns `true` once the dispatch deadline has passed.
    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fails the job, consuming it. Best-effort: a cancelled stream
    /// swallows the failure.
    pub fn fail(mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(job = self.id, %message, "failing job");
        let _ = self.publisher.fail(message);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("model_key", &self.model_key)
            .field("payload_len", &self.payload.len())
            .field("age", &self.age())
            .finish()
    }
}

/// A transient aggregation of jobs dispatched to one worker.
///
/// Job order matches queue order; batches are never re-ordered.
#[derive(Debug)]
pub struct Batch {
    /// The jobs, in submission order.
    pub jobs: Vec<Job>,
}

impl Batch {
    /// Number of jobs in the batch.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns `true` for an empty batch.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
