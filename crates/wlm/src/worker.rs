// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Workers: long-running executors bound to a device set.
//!
//! ```text
//! Starting ──engine ready──▶ Idle
//! Starting ──start fail──▶   Dead
//! Idle     ──batch assigned─▶ Busy
//! Busy     ──batch done──▶   Idle
//! Idle|Busy ─drain signal──▶ Draining
//! Draining ──batch done──▶   Dead   (no further batches accepted)
//! *        ──fault──▶        Dead
//! ```
//!
//! Each worker is a dedicated OS thread, because engine calls block. It
//! owns its device lease for its lifetime; the lease drops (releasing the
//! devices) when the thread exits. The async side talks to it through a
//! small command channel and observes it through the shared
//! [`WorkerHandle`].

use crate::Batch;
use model_spec::{EngineAdapter, EngineHandle, ModelInfo, Translator};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use streaming::StreamError;
use tokio::sync::futures::Notified;
use tokio::sync::{mpsc, oneshot, Notify};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Thread started, engine still loading.
    Starting,
    /// Ready for a batch.
    Idle,
    /// Executing a batch.
    Busy,
    /// Finishing up; accepts no further batches.
    Draining,
    /// Gone; devices released.
    Dead,
}

pub(crate) enum WorkerCommand {
    Process(Batch),
    Drain,
}

/// Shared, observable side of a worker.
pub struct WorkerHandle {
    id: u64,
    model_key: String,
    devices: device_registry::DeviceSet,
    state: Mutex<WorkerState>,
    last_active: Mutex<Instant>,
    cmd_tx: mpsc::Sender<WorkerCommand>,
}

impl WorkerHandle {
    /// Worker id, unique within its pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The devices this worker owns.
    pub fn devices(&self) -> &device_registry::DeviceSet {
        &self.devices
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Last time the worker finished a batch (or became ready).
    pub fn last_active(&self) -> Instant {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `true` unless the worker is dead.
    pub fn is_live(&self) -> bool {
        self.state() != WorkerState::Dead
    }

    /// Atomically claims an idle worker for a batch.
    pub(crate) fn try_reserve(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == WorkerState::Idle {
            *state = WorkerState::Busy;
            true
        } else {
            false
        }
    }

    /// Hands a batch to a reserved worker. On a dead command channel the
    /// worker is marked dead and the batch is returned.
    pub(crate) fn assign(&self, batch: Batch) -> Result<(), Batch> {
        match self.cmd_tx.try_send(WorkerCommand::Process(batch)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(cmd))
            | Err(mpsc::error::TrySendError::Closed(cmd)) => {
                self.set_state(WorkerState::Dead);
                match cmd {
                    WorkerCommand::Process(batch) => Err(batch),
                    WorkerCommand::Drain => unreachable!("assign only sends Process"),
                }
            }
        }
    }

    /// Signals the worker to finish its current batch and exit.
    pub(crate) fn drain(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                WorkerState::Starting | WorkerState::Idle | WorkerState::Busy => {
                    *state = WorkerState::Draining;
                }
                WorkerState::Draining | WorkerState::Dead => {}
            }
        }
        let _ = self.cmd_tx.try_send(WorkerCommand::Drain);
    }

    fn set_state(&self, to: WorkerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    /// Busy → Idle after a batch; returns `false` when draining, which
    /// tells the thread to exit instead.
    fn finish_batch(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == WorkerState::Busy {
            *state = WorkerState::Idle;
            true
        } else {
            false
        }
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("model", &self.model_key)
            .field("devices", &format_args!("{}", self.devices))
            .field("state", &self.state())
            .finish()
    }
}

/// A freshly spawned worker: its handle plus the readiness signal.
pub(crate) struct WorkerSpawn {
    pub handle: Arc<WorkerHandle>,
    /// Resolves once the engine loaded (`Ok`) or failed (`Err(detail)`).
    pub ready: oneshot::Receiver<std::result::Result<(), String>>,
}

/// Spawns a worker thread bound to a device lease.
pub(crate) fn spawn(
    id: u64,
    model: Arc<ModelInfo>,
    engine: Arc<dyn EngineAdapter>,
    translator: Arc<dyn Translator>,
    lease: device_registry::DeviceLease,
    idle_notify: Arc<Notify>,
) -> WorkerSpawn {
    let (cmd_tx, cmd_rx) = mpsc::channel(2);
    let (ready_tx, ready_rx) = oneshot::channel();

    let handle = Arc::new(WorkerHandle {
        id,
        model_key: model.key(),
        devices: lease.devices().clone(),
        state: Mutex::new(WorkerState::Starting),
        last_active: Mutex::new(Instant::now()),
        cmd_tx,
    });

    let runtime = WorkerRuntime {
        handle: Arc::clone(&handle),
        model,
        engine,
        translator,
        lease: Some(lease),
        cmd_rx,
        idle_notify,
        ready_tx: Some(ready_tx),
    };
    std::thread::Builder::new()
        .name(format!("worker-{id}"))
        .spawn(move || runtime.run())
        .expect("failed to spawn worker thread");

    WorkerSpawn {
        handle,
        ready: ready_rx,
    }
}

struct WorkerRuntime {
    handle: Arc<WorkerHandle>,
    model: Arc<ModelInfo>,
    engine: Arc<dyn EngineAdapter>,
    translator: Arc<dyn Translator>,
    /// Present until death; taken in [`WorkerRuntime::die`].
    lease: Option<device_registry::DeviceLease>,
    cmd_rx: mpsc::Receiver<WorkerCommand>,
    idle_notify: Arc<Notify>,
    ready_tx: Option<oneshot::Sender<std::result::Result<(), String>>>,
}

impl WorkerRuntime {
    fn run(mut self) {
        let span = tracing::info_span!(
            "worker",
            id = self.handle.id,
            model = %self.model.key(),
            devices = %self.handle.devices,
        );
        let _enter = span.enter();

        let devices = self
            .lease
            .as_ref()
            .expect("lease present until death")
            .devices()
            .clone();
        let mut engine_handle =
            match self.engine.load(&self.model.url, &devices, &self.model.options) {
                Ok(handle) => {
                    tracing::info!("engine ready");
                    self.handle.set_state(WorkerState::Idle);
                    self.handle.touch();
                    if let Some(tx) = self.ready_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                    self.idle_notify.notify_one();
                    handle
                }
                Err(e) => {
                    tracing::error!(error = %e, "engine load failed");
                    if let Some(tx) = self.ready_tx.take() {
                        let _ = tx.send(Err(e.to_string()));
                    }
                    self.die();
                    return;
                }
            };

        let mut faulted = false;
        while let Some(cmd) = self.cmd_rx.blocking_recv() {
            match cmd {
                WorkerCommand::Drain => break,
                WorkerCommand::Process(batch) => {
                    let size = batch.len();
                    tracing::debug!(batch_size = size, "batch started");
                    faulted = self.process(&mut engine_handle, batch);
                    self.handle.touch();
                    if faulted {
                        tracing::warn!("worker dead after engine fault");
                        break;
                    }
                    if self.handle.finish_batch() {
                        self.idle_notify.notify_one();
                    } else {
                        // Drained mid-batch.
                        break;
                    }
                }
            }
        }

        drop(engine_handle); // unload before releasing devices
        self.die();
        if !faulted {
            tracing::info!("worker stopped");
        }
    }

    /// Releases the devices, then marks the worker dead. The order
    /// matters: once observers see Dead, the occupancy table must
    /// already reflect the release.
    fn die(&mut self) {
        drop(self.lease.take());
        self.handle.set_state(WorkerState::Dead);
    }

    /// Runs one batch. Returns `true` on an engine fault, which kills
    /// the worker.
    fn process(&mut self, engine: &mut Box<dyn EngineHandle>, batch: Batch) -> bool {
        let payloads: Vec<Vec<u8>> = batch.jobs.iter().map(|j| j.payload.clone()).collect();
        let mut jobs = batch.jobs;
        let mut done = vec![false; jobs.len()];

        let mut fault: Option<String> = None;
        match engine.infer(&payloads) {
            Err(e) => fault = Some(e.to_string()),
            Ok(chunks) => {
                for item in chunks {
                    match item {
                        Err(e) => {
                            fault = Some(e.to_string());
                            break;
                        }
                        Ok(chunk) => {
                            let Some(flag) = done.get_mut(chunk.job) else {
                                fault = Some(format!(
                                    "engine emitted chunk for unknown job index {}",
                                    chunk.job,
                                ));
                                break;
                            };
                            if *flag {
                                // Terminal is terminal; discard stragglers.
                                continue;
                            }
                            let last = chunk.last;
                            let data = match self.translator.post_process(chunk.data) {
                                Ok(data) => data,
                                Err(e) => {
                                    jobs[chunk.job]
                                        .publisher
                                        .fail(format!("translator error: {e}"))
                                        .ok();
                                    *flag = true;
                                    continue;
                                }
                            };
                            match jobs[chunk.job].publisher.publish(data, last) {
                                Ok(()) => {
                                    if last {
                                        *flag = true;
                                    }
                                }
                                Err(StreamError::Cancelled) => {
                                    // Caller walked away; stop publishing
                                    // for this job at the chunk boundary.
                                    tracing::debug!(job = jobs[chunk.job].id, "job cancelled");
                                    *flag = true;
                                }
                                Err(e) => {
                                    // Backpressure is fatal for this job
                                    // only; the worker proceeds.
                                    tracing::warn!(
                                        job = jobs[chunk.job].id,
                                        error = %e,
                                        "dropping job output"
                                    );
                                    *flag = true;
                                }
                            }
                        }
                    }
                }
            }
        }

        if let Some(detail) = fault {
            tracing::error!(%detail, "engine fault, failing batch");
            for (job, job_done) in jobs.into_iter().zip(done) {
                if !job_done {
                    job.fail(format!("worker fault: {detail}"));
                }
            }
            return true;
        }

        // Engine finished cleanly but left some jobs without a terminal
        // chunk: fail the missing tail, keep the worker.
        for (job, job_done) in jobs.into_iter().zip(done) {
            if !job_done {
                job.fail("worker fault: engine produced no terminal output for this job");
            }
        }
        false
    }
}

/// The worker fleet of one pool, shared between the pool, its batcher,
/// and the sweep task.
pub(crate) struct WorkerSet {
    members: Mutex<Vec<Arc<WorkerHandle>>>,
    idle_notify: Arc<Notify>,
    rr: AtomicUsize,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(Vec::new()),
            idle_notify: Arc::new(Notify::new()),
            rr: AtomicUsize::new(0),
        }
    }

    /// The notify workers ping when they return to Idle.
    pub fn idle_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.idle_notify)
    }

    /// Completes on the next idle transition.
    pub fn idle_notified(&self) -> Notified<'_> {
        self.idle_notify.notified()
    }

    pub fn add(&self, handle: Arc<WorkerHandle>) {
        self.lock().push(handle);
    }

    /// Snapshot of the current members.
    pub fn list(&self) -> Vec<Arc<WorkerHandle>> {
        self.lock().clone()
    }

    /// Claims an idle worker round-robin, flipping it to Busy.
    pub fn claim_idle(&self) -> Option<Arc<WorkerHandle>> {
        let members = self.list();
        if members.is_empty() {
            return None;
        }
        let start = self.rr.fetch_add(1, Ordering::Relaxed);
        for offset in 0..members.len() {
            let worker = &members[(start + offset) % members.len()];
            if worker.try_reserve() {
                return Some(Arc::clone(worker));
            }
        }
        None
    }

    /// Number of non-dead workers.
    pub fn count_live(&self) -> usize {
        self.lock().iter().filter(|w| w.is_live()).count()
    }

    /// Removes dead workers, returning them.
    pub fn reap_dead(&self) -> Vec<Arc<WorkerHandle>> {
        let mut members = self.lock();
        let mut dead = Vec::new();
        members.retain(|w| {
            if w.is_live() {
                true
            } else {
                dead.push(Arc::clone(w));
                false
            }
        });
        dead
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<WorkerHandle>>> {
        self.members.lock().unwrap_or_else(|e| e.into_inner())
    }
}
