// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end scheduling scenarios.
//!
//! These exercise the complete flow from registration → planning →
//! acquisition → worker spawn → batching → streaming results, proving
//! the crates compose and the occupancy/ownership invariants hold.

use device_registry::{
    Device, DeviceKind, DeviceRegistry, FixedProbe, Occupancy, SharedDevices,
};
use model_spec::{
    Capabilities, EngineAdapter, EngineChunk, EngineError, EngineHandle, EngineRegistry,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wlm::{RegisterRequest, ServerConfig, WlmError, WorkerState, WorkloadManager};

// ── Test engines ───────────────────────────────────────────────

/// Accelerator-capable echo engine that records batch sizes.
struct NativeEngine {
    batch_sizes: Arc<Mutex<Vec<usize>>>,
    /// Per-infer sleep, to hold workers Busy.
    delay: Duration,
    /// When set, the next infer call fails (then clears).
    crash_next: Arc<AtomicBool>,
}

impl NativeEngine {
    fn new() -> Self {
        Self {
            batch_sizes: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            crash_next: Arc::new(AtomicBool::new(false)),
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    fn recorded(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.batch_sizes)
    }

    fn crash_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.crash_next)
    }
}

impl EngineAdapter for NativeEngine {
    fn name(&self) -> &str {
        "native"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            accelerator: true,
            streaming: true,
        }
    }

    fn load(
        &self,
        _url: &str,
        _devices: &device_registry::DeviceSet,
        _options: &HashMap<String, String>,
    ) -> Result<Box<dyn EngineHandle>, EngineError> {
        Ok(Box::new(NativeHandle {
            batch_sizes: Arc::clone(&self.batch_sizes),
            delay: self.delay,
            crash_next: Arc::clone(&self.crash_next),
        }))
    }
}

struct NativeHandle {
    batch_sizes: Arc<Mutex<Vec<usize>>>,
    delay: Duration,
    crash_next: Arc<AtomicBool>,
}

impl EngineHandle for NativeHandle {
    fn infer(
        &mut self,
        batch: &[Vec<u8>],
    ) -> Result<Box<dyn Iterator<Item = Result<EngineChunk, EngineError>> + Send + '_>, EngineError>
    {
        if self.crash_next.swap(false, Ordering::AcqRel) {
            return Err(EngineError::Inference("injected crash".to_string()));
        }
        self.batch_sizes.lock().unwrap().push(batch.len());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let chunks: Vec<_> = batch
            .iter()
            .enumerate()
            .map(|(job, payload)| {
                Ok(EngineChunk {
                    job,
                    data: payload.clone(),
                    last: true,
                })
            })
            .collect();
        Ok(Box::new(chunks.into_iter()))
    }
}

/// Streams each payload back one byte per chunk.
struct TrickleEngine;
struct TrickleHandle;

impl EngineAdapter for TrickleEngine {
    fn name(&self) -> &str {
        "trickle"
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            accelerator: false,
            streaming: true,
        }
    }
    fn load(
        &self,
        _url: &str,
        _devices: &device_registry::DeviceSet,
        _options: &HashMap<String, String>,
    ) -> Result<Box<dyn EngineHandle>, EngineError> {
        Ok(Box::new(TrickleHandle))
    }
}

impl EngineHandle for TrickleHandle {
    fn infer(
        &mut self,
        batch: &[Vec<u8>],
    ) -> Result<Box<dyn Iterator<Item = Result<EngineChunk, EngineError>> + Send + '_>, EngineError>
    {
        let mut chunks = Vec::new();
        for (job, payload) in batch.iter().enumerate() {
            for (i, byte) in payload.iter().enumerate() {
                chunks.push(Ok(EngineChunk {
                    job,
                    data: vec![*byte],
                    last: i + 1 == payload.len(),
                }));
            }
        }
        Ok(Box::new(chunks.into_iter()))
    }
}

/// Always fails to load.
struct BrokenEngine;

impl EngineAdapter for BrokenEngine {
    fn name(&self) -> &str {
        "broken"
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            accelerator: true,
            streaming: false,
        }
    }
    fn load(
        &self,
        url: &str,
        _devices: &device_registry::DeviceSet,
        _options: &HashMap<String, String>,
    ) -> Result<Box<dyn EngineHandle>, EngineError> {
        Err(EngineError::Load {
            url: url.to_string(),
            detail: "model archive is corrupt".to_string(),
        })
    }
}

// ── Helpers ────────────────────────────────────────────────────

fn gpu_registry(n: usize, shared: SharedDevices) -> Arc<DeviceRegistry> {
    let devices: Vec<Device> = (0..n).map(|i| Device::new(DeviceKind::Gpu, i as i32)).collect();
    Arc::new(DeviceRegistry::new(
        devices,
        shared,
        Box::new(FixedProbe::new(16 << 30)),
    ))
}

fn test_config() -> ServerConfig {
    ServerConfig {
        sweep_interval_ms: 20,
        ..ServerConfig::default()
    }
}

fn manager_with(
    n: usize,
    shared: SharedDevices,
    adapters: Vec<Arc<dyn EngineAdapter>>,
) -> Arc<WorkloadManager> {
    let mut engines = EngineRegistry::with_builtins();
    for adapter in adapters {
        engines.register(adapter);
    }
    WorkloadManager::with_registry(test_config(), gpu_registry(n, shared), engines)
}

fn request(name: &str, engine: &str, device_spec: &str) -> RegisterRequest {
    RegisterRequest {
        name: name.to_string(),
        url: format!("file:///models/{name}"),
        engine: Some(engine.to_string()),
        device_spec: device_spec.to_string(),
        ..RegisterRequest::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

// ── Scenario 1: CPU registration, single job ───────────────────

#[tokio::test]
async fn test_cpu_registration_single_job() {
    let manager = manager_with(0, SharedDevices::All, vec![]);
    let mut req = request("m1", "echo", "");
    req.batch_size = Some(4);
    req.max_batch_delay_ms = Some(10);
    manager.register(req).await.unwrap();

    let pool = manager.pool("m1", None).await.unwrap();
    let snapshots = pool.worker_snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].devices, "cpu");

    let started = Instant::now();
    let mut result = manager
        .submit("m1", None, b"hello".to_vec())
        .await
        .unwrap();
    let chunk = result.next(Duration::from_secs(5)).await.unwrap().unwrap();
    assert_eq!(chunk.data, b"hello");
    assert!(chunk.last);
    // Dispatched after at most the batch delay plus slack.
    assert!(started.elapsed() < Duration::from_secs(2));

    manager.shutdown().await;
}

// ── Scenario 2: exclusive pack ─────────────────────────────────

#[tokio::test]
async fn test_exclusive_pack() {
    let manager = manager_with(8, SharedDevices::All, vec![Arc::new(NativeEngine::new())]);
    let mut req = request("m1", "native", "{2}");
    req.tensor_parallel_degree = Some(2);
    manager.register(req).await.unwrap();

    let pool = manager.pool("m1", None).await.unwrap();
    let devices: Vec<String> = pool
        .worker_snapshots()
        .iter()
        .map(|w| w.devices.clone())
        .collect();
    assert_eq!(devices, vec!["gpu0+gpu1".to_string(), "gpu2+gpu3".to_string()]);

    let occ = manager.registry().occupancy();
    assert_eq!(&occ[..4], &[Occupancy::Exclusive; 4]);
    assert_eq!(&occ[4..], &[Occupancy::Free; 4]);

    manager.shutdown().await;
}

// ── Scenario 3: shared retention ───────────────────────────────

#[tokio::test]
async fn test_shared_retention_high_index_first() {
    let manager = manager_with(
        4,
        SharedDevices::Count(2),
        vec![Arc::new(NativeEngine::new())],
    );
    manager.register(request("m1", "native", "*")).await.unwrap();

    let pool = manager.pool("m1", None).await.unwrap();
    let devices: Vec<String> = pool
        .worker_snapshots()
        .iter()
        .map(|w| w.devices.clone())
        .collect();
    assert_eq!(devices, vec!["gpu3".to_string(), "gpu2".to_string()]);

    let occ = manager.registry().occupancy();
    assert_eq!(occ[0], Occupancy::Free);
    assert_eq!(occ[1], Occupancy::Free);
    assert_eq!(occ[2], Occupancy::Shared);
    assert_eq!(occ[3], Occupancy::Shared);

    manager.shutdown().await;
}

// ── Scenario 4: batching threshold ─────────────────────────────

#[tokio::test]
async fn test_batching_threshold() {
    let engine = NativeEngine::new();
    let recorded = engine.recorded();
    let manager = manager_with(2, SharedDevices::All, vec![Arc::new(engine)]);

    let mut req = request("m1", "native", "{1}");
    req.batch_size = Some(4);
    req.max_batch_delay_ms = Some(200);
    manager.register(req).await.unwrap();

    // Three jobs, spaced well inside the delay window.
    let mut results = Vec::new();
    for i in 0..3u8 {
        results.push(manager.submit("m1", None, vec![i]).await.unwrap());
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    for result in &mut results {
        let chunk = result.next(Duration::from_secs(5)).await.unwrap().unwrap();
        assert!(chunk.last);
    }
    assert_eq!(recorded.lock().unwrap().as_slice(), &[3]);

    // A subsequent submission forms its own batch.
    let mut late = manager.submit("m1", None, vec![9]).await.unwrap();
    late.next(Duration::from_secs(5)).await.unwrap().unwrap();
    assert_eq!(recorded.lock().unwrap().as_slice(), &[3, 1]);

    manager.shutdown().await;
}

// ── Scenario 5: worker fault and replacement ───────────────────

#[tokio::test]
async fn test_worker_fault_and_replacement() {
    let engine = NativeEngine::new();
    let crash = engine.crash_flag();
    let manager = manager_with(2, SharedDevices::All, vec![Arc::new(engine)]);
    manager.start_sweeper();

    let mut req = request("m1", "native", "{1}");
    req.batch_size = Some(2);
    req.max_batch_delay_ms = Some(100);
    manager.register(req).await.unwrap();
    let pool = manager.pool("m1", None).await.unwrap();

    crash.store(true, Ordering::Release);
    let mut a = manager.submit("m1", None, b"a".to_vec()).await.unwrap();
    let mut b = manager.submit("m1", None, b"b".to_vec()).await.unwrap();

    let err_a = a.next(Duration::from_secs(5)).await.unwrap_err();
    let err_b = b.next(Duration::from_secs(5)).await.unwrap_err();
    assert!(err_a.to_string().contains("worker fault"));
    assert!(err_b.to_string().contains("worker fault"));

    // The sweep replaces the dead worker within bounded time.
    let pool_ref = Arc::clone(&pool);
    wait_until(
        move || {
            pool_ref
                .worker_snapshots()
                .iter()
                .any(|w| w.state == WorkerState::Idle)
        },
        "replacement worker to reach Idle",
    )
    .await;
    assert_eq!(pool.live_workers(), pool.target());

    // And the pool serves again.
    let mut ok = manager.submit("m1", None, b"again".to_vec()).await.unwrap();
    let chunk = ok.next(Duration::from_secs(5)).await.unwrap().unwrap();
    assert_eq!(chunk.data, b"again");

    manager.shutdown().await;
}

// ── Scenario 6: scale down while busy ──────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scale_down_while_busy() {
    let engine = NativeEngine::with_delay(Duration::from_millis(300));
    let manager = manager_with(4, SharedDevices::All, vec![Arc::new(engine)]);

    let mut req = request("m1", "native", "*");
    req.batch_size = Some(1);
    req.max_batch_delay_ms = Some(5);
    req.max_workers = Some(4);
    req.queue_capacity = Some(8);
    manager.register(req).await.unwrap();
    let pool = manager.pool("m1", None).await.unwrap();
    assert_eq!(pool.live_workers(), 4);

    // Keep all four workers busy.
    let mut results = Vec::new();
    for i in 0..4u8 {
        results.push(manager.submit("m1", None, vec![i]).await.unwrap());
    }
    let pool_ref = Arc::clone(&pool);
    wait_until(
        move || {
            pool_ref
                .worker_snapshots()
                .iter()
                .filter(|w| w.state == WorkerState::Busy)
                .count()
                == 4
        },
        "all workers busy",
    )
    .await;

    manager.scale("m1", None, 0, 2).await.unwrap();

    // No in-flight work interrupted: every job still completes.
    for (i, result) in results.iter_mut().enumerate() {
        let chunk = result.next(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(chunk.data, vec![i as u8]);
    }

    let pool_ref = Arc::clone(&pool);
    wait_until(
        move || pool_ref.live_workers() == 2,
        "fleet to settle at two workers",
    )
    .await;
    assert_eq!(pool.target(), 2);

    // Drained workers released their devices.
    let shared_count = manager
        .registry()
        .occupancy()
        .iter()
        .filter(|&&o| o == Occupancy::Shared)
        .count();
    assert_eq!(shared_count, 2);

    manager.shutdown().await;
}

// ── Round trips ────────────────────────────────────────────────

#[tokio::test]
async fn test_register_unregister_restores_registry() {
    let manager = manager_with(8, SharedDevices::All, vec![Arc::new(NativeEngine::new())]);
    let before = manager.registry().occupancy();

    let mut req = request("m1", "native", "{2}");
    req.tensor_parallel_degree = Some(2);
    manager.register(req).await.unwrap();
    assert_ne!(manager.registry().occupancy(), before);

    manager.unregister("m1", None).await.unwrap();
    assert_eq!(manager.registry().occupancy(), before);

    // The pool is gone.
    assert!(matches!(
        manager.submit("m1", None, Vec::new()).await,
        Err(WlmError::ModelNotFound { .. })
    ));
}

#[tokio::test]
async fn test_scale_is_idempotent() {
    let manager = manager_with(4, SharedDevices::All, vec![Arc::new(NativeEngine::new())]);
    manager.register(request("m1", "native", "{1}")).await.unwrap();
    let pool = manager.pool("m1", None).await.unwrap();

    manager.scale("m1", None, 1, 3).await.unwrap();
    let pool_ref = Arc::clone(&pool);
    wait_until(move || pool_ref.live_workers() == 3, "scale up to three").await;

    let occ_after_first = manager.registry().occupancy();
    manager.scale("m1", None, 1, 3).await.unwrap();
    assert_eq!(pool.live_workers(), 3);
    assert_eq!(manager.registry().occupancy(), occ_after_first);

    manager.shutdown().await;
}

// ── Boundary behaviors ─────────────────────────────────────────

#[tokio::test]
async fn test_queue_full_rejects_then_recovers() {
    let engine = NativeEngine::with_delay(Duration::from_millis(300));
    let manager = manager_with(0, SharedDevices::All, vec![Arc::new(engine)]);

    let mut req = request("m1", "native", "");
    req.batch_size = Some(1);
    req.max_batch_delay_ms = Some(1);
    req.queue_capacity = Some(2);
    manager.register(req).await.unwrap();

    // First job goes straight to the single worker.
    let _inflight = manager.submit("m1", None, b"0".to_vec()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Two more fill the queue; the next is rejected immediately.
    let _q1 = manager.submit("m1", None, b"1".to_vec()).await.unwrap();
    let _q2 = manager.submit("m1", None, b"2".to_vec()).await.unwrap();
    let rejected = manager.submit("m1", None, b"3".to_vec()).await;
    assert!(matches!(rejected, Err(WlmError::QueueFull { capacity: 2 })));

    // After a batch dispatches, the same request succeeds.
    let pool = manager.pool("m1", None).await.unwrap();
    let pool_ref = Arc::clone(&pool);
    wait_until(move || pool_ref.queued_jobs() < 2, "queue to drain").await;
    manager.submit("m1", None, b"3".to_vec()).await.unwrap();

    manager.shutdown().await;
}

#[tokio::test]
async fn test_insufficient_slots_refused() {
    let manager = manager_with(4, SharedDevices::All, vec![Arc::new(NativeEngine::new())]);
    let mut req = request("m1", "native", "{3}");
    req.tensor_parallel_degree = Some(2);
    let err = manager.register(req).await.unwrap_err();
    assert!(matches!(
        err,
        WlmError::Plan(device_planner::PlanError::InsufficientSlots { .. })
    ));
    // Nothing was committed.
    assert!(manager
        .registry()
        .occupancy()
        .iter()
        .all(|&o| o == Occupancy::Free));
}

#[tokio::test]
async fn test_idle_sweep_respects_min_workers() {
    let engine = NativeEngine::new();
    let manager = manager_with(4, SharedDevices::All, vec![Arc::new(engine)]);
    manager.start_sweeper();

    let mut req = request("m1", "native", "{3}");
    req.min_workers = Some(1);
    req.max_workers = Some(3);
    req.max_idle_ms = Some(50);
    manager.register(req).await.unwrap();
    let pool = manager.pool("m1", None).await.unwrap();
    assert_eq!(pool.live_workers(), 3);

    // Idle retirement shrinks the fleet, but never below min_workers.
    let pool_ref = Arc::clone(&pool);
    wait_until(move || pool_ref.live_workers() == 1, "idle retirement").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.live_workers(), 1);

    manager.shutdown().await;
}

// ── Failure admission paths ────────────────────────────────────

#[tokio::test]
async fn test_engine_load_failure_releases_slots() {
    let manager = manager_with(4, SharedDevices::All, vec![Arc::new(BrokenEngine)]);
    let err = manager
        .register(request("m1", "broken", "{2}-"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("corrupt"));

    // Atomic registration: no workers, no devices held, no pool.
    assert!(manager
        .registry()
        .occupancy()
        .iter()
        .all(|&o| o == Occupancy::Free));
    assert!(manager.pool("m1", None).await.is_err());
}

#[tokio::test]
async fn test_duplicate_and_unknown_registrations() {
    let manager = manager_with(0, SharedDevices::All, vec![]);
    manager.register(request("m1", "echo", "")).await.unwrap();

    assert!(matches!(
        manager.register(request("m1", "echo", "")).await,
        Err(WlmError::AlreadyRegistered { .. })
    ));
    assert!(matches!(
        manager.register(request("m2", "tensorrt", "")).await,
        Err(WlmError::Spec(model_spec::SpecError::UnknownEngine(_)))
    ));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_submit_after_shutdown() {
    let manager = manager_with(0, SharedDevices::All, vec![]);
    manager.register(request("m1", "echo", "")).await.unwrap();
    manager.shutdown().await;

    // The pool map is drained on shutdown.
    assert!(manager.submit("m1", None, Vec::new()).await.is_err());
}

// ── Translation ────────────────────────────────────────────────

struct UppercaseTranslator;

impl model_spec::Translator for UppercaseTranslator {
    fn name(&self) -> &str {
        "upper"
    }
    fn pre_process(&self, payload: &[u8]) -> Result<Vec<u8>, EngineError> {
        Ok(payload.to_vec())
    }
    fn post_process(&self, chunk: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        Ok(chunk.to_ascii_uppercase())
    }
}

#[tokio::test]
async fn test_translator_applied_to_outputs() {
    let mut engines = EngineRegistry::with_builtins();
    engines.register_translator(Arc::new(UppercaseTranslator));
    let manager = WorkloadManager::with_registry(
        test_config(),
        gpu_registry(0, SharedDevices::All),
        engines,
    );

    let mut req = request("m1", "echo", "");
    req.translator = Some("upper".to_string());
    manager.register(req).await.unwrap();

    let mut result = manager.submit("m1", None, b"hello".to_vec()).await.unwrap();
    let chunk = result.next(Duration::from_secs(5)).await.unwrap().unwrap();
    assert_eq!(chunk.data, b"HELLO");

    // An unknown translator refuses registration.
    let mut bad = request("m2", "echo", "");
    bad.translator = Some("nonexistent".to_string());
    assert!(matches!(
        manager.register(bad).await,
        Err(WlmError::Spec(model_spec::SpecError::UnknownTranslator(_)))
    ));

    manager.shutdown().await;
}

// ── Streaming ordering ─────────────────────────────────────────

#[tokio::test]
async fn test_chunk_order_is_production_order() {
    let manager = manager_with(0, SharedDevices::All, vec![Arc::new(TrickleEngine)]);
    let mut req = request("m1", "trickle", "");
    req.max_batch_delay_ms = Some(5);
    manager.register(req).await.unwrap();

    let mut result = manager
        .submit("m1", None, b"abc".to_vec())
        .await
        .unwrap();
    let mut seen = Vec::new();
    loop {
        match result.next(Duration::from_secs(5)).await.unwrap() {
            Some(chunk) => {
                seen.extend_from_slice(&chunk.data);
                if chunk.last {
                    break;
                }
            }
            None => break,
        }
    }
    assert_eq!(seen, b"abc");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_steady_state_matches_target() {
    let manager = manager_with(4, SharedDevices::All, vec![Arc::new(NativeEngine::new())]);
    let mut req = request("m1", "native", "{2}");
    req.max_workers = Some(2);
    manager.register(req).await.unwrap();

    let pool = manager.pool("m1", None).await.unwrap();
    assert_eq!(pool.live_workers(), pool.target());

    manager.shutdown().await;
}
