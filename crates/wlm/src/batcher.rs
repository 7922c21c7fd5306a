// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The batcher: one task per pool that turns queued jobs into batches.
//!
//! Being the single consumer of the queue and the single dispatcher to
//! workers gives batching one ownership boundary — no mutex games
//! between producers, batchers, and workers.
//!
//! A batch is emitted when any of:
//! 1. the queue holds a full batch;
//! 2. the head job has waited `max_delay`;
//! 3. the queue is non-empty and nothing was dispatched within the last
//!    `max_delay` (the wake-up tick).
//!
//! The batcher exits when the queue is closed and drained.

use crate::worker::WorkerSet;
use crate::{Batch, Job, JobQueue};
use std::sync::Arc;
use std::time::Duration;

/// Batch formation policy: size and delay bounds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchPolicy {
    /// Maximum jobs per batch.
    pub max_size: usize,
    /// Longest the head job may wait before a partial batch dispatches.
    pub max_delay: Duration,
}

pub(crate) struct Batcher {
    queue: Arc<JobQueue>,
    workers: Arc<WorkerSet>,
    policy: BatchPolicy,
}

impl Batcher {
    pub fn new(queue: Arc<JobQueue>, workers: Arc<WorkerSet>, policy: BatchPolicy) -> Self {
        Self {
            queue,
            workers,
            policy,
        }
    }

    pub async fn run(self) {
        tracing::debug!(
            max_size = self.policy.max_size,
            max_delay_ms = self.policy.max_delay.as_millis() as u64,
            "batcher started"
        );
        while self.queue.wait_non_empty().await {
            self.fill_window().await;

            let jobs = self.queue.take_batch(self.policy.max_size);
            let jobs: Vec<Job> = jobs
                .into_iter()
                .filter_map(|job| {
                    if job.expired() {
                        job.fail("timed out in queue before dispatch");
                        None
                    } else {
                        Some(job)
                    }
                })
                .collect();
            if jobs.is_empty() {
                continue;
            }

            tracing::debug!(batch_size = jobs.len(), "dispatching batch");
            self.dispatch(Batch { jobs }).await;
        }
        tracing::debug!("batcher stopped");
    }

    /// Waits until the batch is full or the head job's delay budget is
    /// spent, whichever comes first.
    async fn fill_window(&self) {
        loop {
            if self.queue.len() >= self.policy.max_size {
                return;
            }
            let Some(age) = self.queue.head_age() else {
                return;
            };
            if age >= self.policy.max_delay {
                return;
            }
            let remaining = self.policy.max_delay - age;
            tokio::select! {
                _ = tokio::time::sleep(remaining) => return,
                // A push may have completed the batch; re-check.
                _ = self.queue.wait_push() => {}
            }
        }
    }

    /// Hands the batch to an idle worker, parking on the idle condition
    /// when the fleet is saturated. Jobs fail fast when the fleet is
    /// empty instead of waiting on workers that may never return.
    async fn dispatch(&self, batch: Batch) {
        let mut pending = batch;
        loop {
            let idle = self.workers.idle_notified();
            if let Some(worker) = self.workers.claim_idle() {
                match worker.assign(pending) {
                    Ok(()) => return,
                    Err(batch) => {
                        // Worker died between the claim and the send.
                        pending = batch;
                        continue;
                    }
                }
            }
            if self.workers.count_live() == 0 {
                tracing::warn!(batch_size = pending.len(), "no live workers, failing batch");
                for job in pending.jobs {
                    job.fail("worker fault: no live workers available");
                }
                return;
            }
            idle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streaming::StreamConfig;

    fn job(id: u64) -> (Job, streaming::StreamingResult) {
        let (publisher, result) = streaming::channel(StreamConfig::default());
        (Job::new(id, "m", Vec::new(), publisher, None), result)
    }

    fn policy(max_size: usize, delay_ms: u64) -> BatchPolicy {
        BatchPolicy {
            max_size,
            max_delay: Duration::from_millis(delay_ms),
        }
    }

    #[tokio::test]
    async fn test_batcher_fails_jobs_without_workers() {
        let queue = Arc::new(JobQueue::new(8));
        let workers = Arc::new(WorkerSet::new());
        let batcher = Batcher::new(Arc::clone(&queue), workers, policy(2, 10));

        let (j, mut result) = job(1);
        queue.push(j).unwrap();
        queue.close();
        batcher.run().await;

        let err = result.next(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("no live workers"));
    }

    #[tokio::test]
    async fn test_batcher_exits_when_closed_and_drained() {
        let queue = Arc::new(JobQueue::new(8));
        let workers = Arc::new(WorkerSet::new());
        let batcher = Batcher::new(Arc::clone(&queue), workers, policy(2, 10));
        queue.close();

        // Completes immediately: nothing queued, queue closed.
        tokio::time::timeout(Duration::from_secs(1), batcher.run())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_jobs_rejected_at_dispatch() {
        let queue = Arc::new(JobQueue::new(8));
        let workers = Arc::new(WorkerSet::new());
        let batcher = Batcher::new(Arc::clone(&queue), workers, policy(4, 5));

        let (publisher, mut result) = streaming::channel(StreamConfig::default());
        let expired = Job::new(
            1,
            "m",
            Vec::new(),
            publisher,
            Some(std::time::Instant::now() - Duration::from_millis(1)),
        );
        queue.push(expired).unwrap();
        queue.close();
        batcher.run().await;

        let err = result.next(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("timed out in queue"));
    }
}
