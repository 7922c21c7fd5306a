// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The bounded per-model job queue.
//!
//! FIFO under a short mutex; producers are never blocked — submissions
//! beyond capacity are rejected immediately. A batch leaves the queue
//! atomically. The batcher parks on a `Notify` that fires on every push
//! and on close.

use crate::{Job, WlmError};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

struct QueueState {
    jobs: VecDeque<Job>,
    closed: bool,
}

/// Bounded FIFO of pending jobs for one model.
pub struct JobQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    pushed: Notify,
}

impl JobQueue {
    /// Creates a queue with the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
            }),
            capacity: capacity.max(1),
            pushed: Notify::new(),
        }
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Returns `true` if no jobs are pending.
    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    /// Returns `true` once the queue stopped accepting submissions.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Enqueues a job.
    ///
    /// Never blocks: a full queue rejects with `QueueFull`, a closed
    /// queue with `Shutdown`. The rejected job is dropped, which tears
    /// down its result stream.
    pub fn push(&self, job: Job) -> Result<(), WlmError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(WlmError::Shutdown);
            }
            if state.jobs.len() >= self.capacity {
                return Err(WlmError::QueueFull {
                    capacity: self.capacity,
                });
            }
            state.jobs.push_back(job);
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    /// Stops accepting submissions; pending jobs stay queued for the
    /// batcher to drain.
    pub fn close(&self) {
        self.lock().closed = true;
        self.pushed.notify_waiters();
    }

    /// Age of the head job, if any.
    pub fn head_age(&self) -> Option<Duration> {
        self.lock().jobs.front().map(Job::age)
    }

    /// Removes up to `max` jobs atomically, preserving order.
    pub fn take_batch(&self, max: usize) -> Vec<Job> {
        let mut state = self.lock();
        let count = max.min(state.jobs.len());
        state.jobs.drain(..count).collect()
    }

    /// Parks until a job is pending. Returns `false` when the queue is
    /// closed and drained — the batcher's exit condition.
    pub async fn wait_non_empty(&self) -> bool {
        loop {
            let pushed = self.pushed.notified();
            {
                let state = self.lock();
                if !state.jobs.is_empty() {
                    return true;
                }
                if state.closed {
                    return false;
                }
            }
            pushed.await;
        }
    }

    /// Completes on the next push or close; used by the batcher while it
    /// waits out the batch delay.
    pub async fn wait_push(&self) {
        self.pushed.notified().await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
