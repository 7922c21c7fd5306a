// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The per-model worker pool.
//!
//! A pool owns its job queue and worker fleet. Registration is atomic:
//! the planner lays out slots, the registry commits them, workers spawn,
//! and if any worker fails to reach Idle the whole fleet is torn down
//! with no devices left behind. Scaling and unregistration serialize
//! with registration behind the pool's admin lock.

use crate::batcher::{BatchPolicy, Batcher};
use crate::worker::{self, WorkerHandle, WorkerSet, WorkerState};
use crate::{Job, JobQueue, Result, WlmError};
use device_planner::DevicePlanner;
use device_registry::{DeviceLease, DeviceRegistry};
use model_spec::{EngineAdapter, ModelInfo, Translator};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use streaming::{StreamConfig, StreamingResult};

/// Snapshot of one worker, for status reporting and tests.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerSnapshot {
    /// Pool-scoped worker id.
    pub id: u64,
    /// Lifecycle state at snapshot time.
    pub state: WorkerState,
    /// Devices the worker owns, rendered.
    pub devices: String,
}

/// Worker fleet and queue for one registered model.
pub struct WorkerPool {
    model: Arc<ModelInfo>,
    engine: Arc<dyn EngineAdapter>,
    translator: Arc<dyn Translator>,
    planner: DevicePlanner,
    queue: Arc<JobQueue>,
    workers: Arc<WorkerSet>,
    target: AtomicUsize,
    min_workers: AtomicUsize,
    next_worker: AtomicU64,
    next_job: AtomicU64,
    stream_config: StreamConfig,
    admin: tokio::sync::Mutex<()>,
    batcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl WorkerPool {
    /// Plans, acquires, and spawns the initial fleet; spawns the batcher
    /// once every worker is Idle.
    pub(crate) async fn start(
        model: ModelInfo,
        engine: Arc<dyn EngineAdapter>,
        translator: Arc<dyn Translator>,
        registry: Arc<DeviceRegistry>,
        stream_config: StreamConfig,
    ) -> Result<Arc<Self>> {
        model.validate()?;
        let model = Arc::new(model);
        let planner = DevicePlanner::new(registry);

        let caps = engine.capabilities();
        let plan = planner.plan(&model, &caps)?;
        tracing::info!(model = %model.key(), plan = %plan.summary(), "registering model");
        let leases = planner.acquire(&model, &plan)?;

        let pool = Arc::new(Self {
            queue: Arc::new(JobQueue::new(model.effective_queue_capacity())),
            workers: Arc::new(WorkerSet::new()),
            target: AtomicUsize::new(leases.len()),
            min_workers: AtomicUsize::new(model.min_workers),
            next_worker: AtomicU64::new(0),
            next_job: AtomicU64::new(0),
            stream_config,
            admin: tokio::sync::Mutex::new(()),
            batcher: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            planner,
            engine,
            translator,
            model,
        });

        if let Err(e) = pool.spawn_workers(leases).await {
            // Atomic registration: nothing stays alive on failure.
            pool.teardown_workers(pool.workers.list()).await;
            return Err(e);
        }

        let batcher = Batcher::new(
            Arc::clone(&pool.queue),
            Arc::clone(&pool.workers),
            BatchPolicy {
                max_size: pool.model.batch_size,
                max_delay: pool.model.max_batch_delay(),
            },
        );
        *pool.batcher.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(tokio::spawn(batcher.run()));

        tracing::info!(
            model = %pool.model.key(),
            workers = pool.workers.count_live(),
            "model registered"
        );
        Ok(pool)
    }

    /// The model this pool serves.
    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    /// Current worker target.
    pub fn target(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    /// Live (non-dead) worker count.
    pub fn live_workers(&self) -> usize {
        self.workers.count_live()
    }

    /// Pending jobs in the queue.
    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Snapshot of the fleet.
    pub fn worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .list()
            .into_iter()
            .map(|w| WorkerSnapshot {
                id: w.id(),
                state: w.state(),
                devices: w.devices().to_string(),
            })
            .collect()
    }

    /// Submits a job, returning the caller's result stream.
    pub fn submit(&self, payload: Vec<u8>) -> Result<StreamingResult> {
        self.submit_with_deadline(payload, None)
    }

    /// Submits a job with a dispatch deadline; jobs still queued past it
    /// fail with a timeout instead of dispatching.
    pub fn submit_with_deadline(
        &self,
        payload: Vec<u8>,
        deadline: Option<Duration>,
    ) -> Result<StreamingResult> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(WlmError::Shutdown);
        }
        let payload = self.translator.pre_process(&payload)?;
        let (publisher, result) = streaming::channel(self.stream_config.clone());
        let job = Job::new(
            self.next_job.fetch_add(1, Ordering::Relaxed),
            self.model.key(),
            payload,
            publisher,
            deadline.map(|d| Instant::now() + d),
        );
        self.queue.push(job)?;
        Ok(result)
    }

    /// Adjusts the fleet: target becomes `max` (at least one, at least
    /// `min`), `min` becomes the idle-retirement floor. Up-scaling may
    /// fail with a capacity error; down-scaling drains the most recently
    /// idle workers first and never interrupts in-flight work.
    pub async fn scale(&self, min_workers: usize, max_workers: usize) -> Result<()> {
        let _admin = self.admin.lock().await;
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(WlmError::Shutdown);
        }
        let target = max_workers.max(min_workers).max(1);
        self.min_workers.store(min_workers, Ordering::Release);
        self.target.store(target, Ordering::Release);

        let live = self.workers.count_live();
        tracing::info!(
            model = %self.model.key(),
            live,
            target,
            min_workers,
            "scaling pool"
        );
        if live < target {
            let delta = target - live;
            let caps = self.engine.capabilities();
            let plan = self.planner.plan_delta(&self.model, &caps, delta)?;
            let leases = self.planner.acquire(&self.model, &plan)?;
            self.spawn_workers(leases).await?;
        } else if live > target {
            self.retire(live - target);
        }
        Ok(())
    }

    /// Drains the pool: no new submissions, queued jobs complete, every
    /// worker goes Draining → Dead, devices release.
    pub async fn shutdown(&self) {
        let _admin = self.admin.lock().await;
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(model = %self.model.key(), "unregistering model");
        self.target.store(0, Ordering::Release);
        self.queue.close();

        // The batcher drains what was already accepted, then exits.
        let handle = self.batcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.teardown_workers(self.workers.list()).await;
        self.workers.reap_dead();
        tracing::info!(model = %self.model.key(), "model unregistered");
    }

    /// One background maintenance pass: reap dead workers, spawn
    /// replacements up to the target, retire the long-idle.
    ///
    /// Replacement failures are logged and retried on the next sweep;
    /// the sweep never takes the process down.
    pub(crate) async fn sweep(&self) {
        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let _admin = self.admin.lock().await;
        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }

        let dead = self.workers.reap_dead();
        if !dead.is_empty() {
            tracing::info!(
                model = %self.model.key(),
                reaped = dead.len(),
                "reaped dead workers"
            );
        }

        // Replace missing workers.
        let live = self.workers.count_live();
        let target = self.target.load(Ordering::Acquire);
        if live < target {
            let delta = target - live;
            let caps = self.engine.capabilities();
            match self.planner.plan_delta(&self.model, &caps, delta) {
                Err(e) => {
                    tracing::warn!(model = %self.model.key(), error = %e, "replacement planning failed");
                }
                Ok(plan) => match self.planner.acquire(&self.model, &plan) {
                    Err(e) => {
                        tracing::warn!(model = %self.model.key(), error = %e, "replacement acquisition failed");
                    }
                    Ok(leases) => {
                        if let Err(e) = self.spawn_workers(leases).await {
                            tracing::warn!(model = %self.model.key(), error = %e, "replacement spawn failed");
                        }
                    }
                },
            }
        }

        self.retire_idle();
    }

    /// Spawns one worker per lease and waits for all of them to reach
    /// Idle. On failure the workers spawned by this call are torn down
    /// and the first error is returned.
    async fn spawn_workers(&self, leases: Vec<DeviceLease>) -> Result<()> {
        let mut spawned = Vec::with_capacity(leases.len());
        let mut pending = Vec::with_capacity(leases.len());
        for lease in leases {
            let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
            let spawn = worker::spawn(
                id,
                Arc::clone(&self.model),
                Arc::clone(&self.engine),
                Arc::clone(&self.translator),
                lease,
                self.workers.idle_notify(),
            );
            self.workers.add(Arc::clone(&spawn.handle));
            spawned.push(Arc::clone(&spawn.handle));
            pending.push(spawn);
        }

        let mut failure: Option<WlmError> = None;
        for spawn in pending {
            match spawn.ready.await {
                Ok(Ok(())) => {}
                Ok(Err(detail)) => {
                    failure.get_or_insert(WlmError::Engine(model_spec::EngineError::Load {
                        url: self.model.url.clone(),
                        detail,
                    }));
                }
                Err(_gone) => {
                    failure.get_or_insert(WlmError::WorkerFault {
                        detail: "worker thread died during startup".to_string(),
                    });
                }
            }
        }

        if let Some(error) = failure {
            self.teardown_workers(spawned).await;
            return Err(error);
        }
        Ok(())
    }

    /// Drains the given workers and waits until they are all dead (their
    /// leases drop with the threads).
    async fn teardown_workers(&self, workers: Vec<Arc<WorkerHandle>>) {
        for worker in &workers {
            worker.drain();
        }
        loop {
            if workers.iter().all(|w| !w.is_live()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Drains `count` workers, most recently idle first, then the rest.
    fn retire(&self, count: usize) {
        let mut idle: Vec<Arc<WorkerHandle>> = self
            .workers
            .list()
            .into_iter()
            .filter(|w| w.state() == WorkerState::Idle)
            .collect();
        idle.sort_by_key(|w| std::cmp::Reverse(w.last_active()));

        let mut remaining = count;
        for worker in idle {
            if remaining == 0 {
                return;
            }
            tracing::debug!(worker = worker.id(), "draining worker (scale down)");
            worker.drain();
            remaining -= 1;
        }
        // Not enough idle workers: drain busy ones too; their in-flight
        // batches still finish.
        for worker in self.workers.list() {
            if remaining == 0 {
                return;
            }
            if matches!(worker.state(), WorkerState::Busy | WorkerState::Starting) {
                tracing::debug!(worker = worker.id(), "draining busy worker (scale down)");
                worker.drain();
                remaining -= 1;
            }
        }
    }

    /// Retires workers idle past the model's threshold, never dropping
    /// the live count below `max(1, min_workers)`. The target shrinks
    /// with each retirement so the replacement pass does not respawn
    /// what retirement just removed.
    fn retire_idle(&self) {
        let max_idle = self.model.max_idle();
        if max_idle.is_zero() {
            return;
        }
        let floor = self.min_workers.load(Ordering::Acquire).max(1);
        let mut live = self.workers.count_live();

        let mut idle: Vec<Arc<WorkerHandle>> = self
            .workers
            .list()
            .into_iter()
            .filter(|w| w.state() == WorkerState::Idle && w.last_active().elapsed() >= max_idle)
            .collect();
        // Longest-idle first.
        idle.sort_by_key(|w| w.last_active());

        for worker in idle {
            if live <= floor {
                return;
            }
            tracing::info!(
                model = %self.model.key(),
                worker = worker.id(),
                "retiring idle worker"
            );
            worker.drain();
            live -= 1;
            let target = self.target.load(Ordering::Acquire);
            self.target.store(target.saturating_sub(1).max(floor), Ordering::Release);
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("model", &self.model.key())
            .field("target", &self.target())
            .field("live_workers", &self.live_workers())
            .field("queued_jobs", &self.queued_jobs())
            .finish()
    }
}
