// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The admission façade.
//!
//! [`WorkloadManager`] is what the front end talks to: `register`,
//! `unregister`, `scale`, and `submit`. It owns the device registry, the
//! engine registry, the per-model pools, and the background sweep task
//! that replaces dead workers and retires idle ones.

use crate::{Result, ServerConfig, WlmError, WorkerPool};
use device_registry::{DeviceRegistry, MeminfoProbe};
use model_spec::{EngineRegistry, ModelInfo, ModelStoreEntry};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use streaming::StreamingResult;

/// Parameters of a `register` call. Unset fields fall back to the
/// server defaults.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RegisterRequest {
    /// Model name.
    pub name: String,
    /// Optional model version.
    pub version: Option<String>,
    /// Model url handed to the engine.
    pub url: String,
    /// Engine adapter name; defaults to the server's `default_engine`.
    pub engine: Option<String>,
    /// Raw device spec.
    #[serde(default)]
    pub device_spec: String,
    /// Devices one replica spans.
    pub tensor_parallel_degree: Option<usize>,
    /// Idle-retirement floor.
    pub min_workers: Option<usize>,
    /// Worker target.
    pub max_workers: Option<usize>,
    /// Jobs per batch.
    pub batch_size: Option<usize>,
    /// Batch delay in milliseconds.
    pub max_batch_delay_ms: Option<u64>,
    /// Idle threshold in milliseconds.
    pub max_idle_ms: Option<u64>,
    /// Launch replicas as a multi-process group.
    #[serde(default)]
    pub mpi: bool,
    /// Pending-queue capacity override.
    pub queue_capacity: Option<usize>,
    /// Translator name; `None` means the identity translator.
    pub translator: Option<String>,
    /// Memory needed on a shared device.
    #[serde(default)]
    pub required_memory_bytes: u64,
    /// Memory headroom to keep on a shared device.
    #[serde(default)]
    pub reserved_memory_bytes: u64,
    /// Opaque engine options.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// The core workload manager: admission, pools, and the sweep task.
pub struct WorkloadManager {
    config: ServerConfig,
    registry: Arc<DeviceRegistry>,
    engines: EngineRegistry,
    pools: tokio::sync::Mutex<HashMap<String, Arc<WorkerPool>>>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl WorkloadManager {
    /// Creates a manager: discovers devices, resolves the shared window,
    /// and registers the built-in engines.
    pub fn new(mut config: ServerConfig) -> Result<Arc<Self>> {
        config.apply_env();
        let shared = config.shared_devices()?;
        let devices = device_registry::discover(config.device_count);
        let registry = Arc::new(DeviceRegistry::new(
            devices,
            shared,
            Box::new(MeminfoProbe::default()),
        ));
        Ok(Self::with_registry(
            config,
            registry,
            EngineRegistry::with_builtins(),
        ))
    }

    /// Creates a manager over a prepared registry and engine set (the
    /// seam used by tests and dry runs).
    pub fn with_registry(
        config: ServerConfig,
        registry: Arc<DeviceRegistry>,
        engines: EngineRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            engines,
            pools: tokio::sync::Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// The process device registry.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// The server configuration in effect.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Starts the background sweep task. Idempotent.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            loop {
                let interval = manager.sweep_interval().await;
                tokio::time::sleep(interval).await;
                if manager.shutting_down.load(Ordering::Acquire) {
                    return;
                }
                let pools: Vec<Arc<WorkerPool>> =
                    manager.pools.lock().await.values().cloned().collect();
                for pool in pools {
                    pool.sweep().await;
                }
            }
        }));
    }

    /// Sweep period: the configured interval, clamped to half the
    /// smallest idle threshold among registered models.
    async fn sweep_interval(&self) -> std::time::Duration {
        let mut interval = self.config.sweep_interval();
        for pool in self.pools.lock().await.values() {
            let idle = pool.model().max_idle();
            if !idle.is_zero() {
                interval = interval.min(idle / 2);
            }
        }
        interval.max(std::time::Duration::from_millis(1))
    }

    /// Registers a model and spawns its worker pool.
    pub async fn register(&self, request: RegisterRequest) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(WlmError::Shutdown);
        }
        let info = self.model_info(request);
        let key = info.key();

        let engine = self
            .engines
            .get(&info.engine)
            .ok_or_else(|| WlmError::Spec(model_spec::SpecError::UnknownEngine(info.engine.clone())))?;
        let translator_name = info.translator.as_deref().unwrap_or("identity");
        let translator = self.engines.translator(translator_name).ok_or_else(|| {
            WlmError::Spec(model_spec::SpecError::UnknownTranslator(
                translator_name.to_string(),
            ))
        })?;

        let mut pools = self.pools.lock().await;
        if pools.contains_key(&key) {
            return Err(WlmError::AlreadyRegistered { key });
        }
        let pool = WorkerPool::start(
            info,
            engine,
            translator,
            Arc::clone(&self.registry),
            self.config.stream_config(),
        )
        .await?;
        pools.insert(key, pool);
        Ok(())
    }

    /// Unregisters a model: drains its queue and fleet, releases devices.
    pub async fn unregister(&self, name: &str, version: Option<&str>) -> Result<()> {
        let key = Self::key(name, version);
        let pool = self
            .pools
            .lock()
            .await
            .remove(&key)
            .ok_or_else(|| WlmError::ModelNotFound { key: key.clone() })?;
        pool.shutdown().await;
        Ok(())
    }

    /// Adjusts a pool's worker bounds.
    pub async fn scale(
        &self,
        name: &str,
        version: Option<&str>,
        min_workers: usize,
        max_workers: usize,
    ) -> Result<()> {
        let pool = self.pool(name, version).await?;
        pool.scale(min_workers, max_workers).await
    }

    /// Submits a payload to a model, returning the result stream.
    pub async fn submit(
        &self,
        name: &str,
        version: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<StreamingResult> {
        let pool = self.pool(name, version).await?;
        pool.submit(payload)
    }

    /// The pool serving a model, if registered.
    pub async fn pool(&self, name: &str, version: Option<&str>) -> Result<Arc<WorkerPool>> {
        let key = Self::key(name, version);
        self.pools
            .lock()
            .await
            .get(&key)
            .cloned()
            .ok_or(WlmError::ModelNotFound { key })
    }

    /// Registered model keys, sorted.
    pub async fn model_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pools.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Loads every model found in a model-store directory. Returns how
    /// many registered; the first registration failure aborts startup.
    pub async fn load_model_store(&self, root: &Path) -> Result<usize> {
        let entries = model_spec::scan_store(root)?;
        let count = entries.len();
        for entry in entries {
            self.register_entry(entry).await?;
        }
        Ok(count)
    }

    /// Registers one parsed model-store token.
    pub async fn register_entry(&self, entry: ModelStoreEntry) -> Result<()> {
        self.register(RegisterRequest {
            name: entry.name,
            version: entry.version,
            url: entry.url,
            engine: entry.engine,
            device_spec: entry.device_spec,
            ..RegisterRequest::default()
        })
        .await
    }

    /// Drains every pool and stops the sweep task.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("workload manager shutting down");
        let handle = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
        let pools: Vec<Arc<WorkerPool>> = self.pools.lock().await.drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.shutdown().await;
        }
        tracing::info!("workload manager stopped");
    }

    fn key(name: &str, version: Option<&str>) -> String {
        match version {
            Some(v) => format!("{name}:{v}"),
            None => name.to_string(),
        }
    }

    /// Fills a request out into a validated-ready descriptor using the
    /// server defaults.
    fn model_info(&self, request: RegisterRequest) -> ModelInfo {
        let mut info = ModelInfo::new(request.name, request.url);
        info.version = request.version;
        info.engine = request
            .engine
            .unwrap_or_else(|| self.config.default_engine.clone());
        info.device_spec = request.device_spec;
        info.tensor_parallel_degree = request.tensor_parallel_degree.unwrap_or(1);
        info.min_workers = request.min_workers.unwrap_or(0);
        info.max_workers = request.max_workers.unwrap_or(1);
        info.batch_size = request.batch_size.unwrap_or(self.config.batch_size);
        info.max_batch_delay_ms = request
            .max_batch_delay_ms
            .unwrap_or(self.config.max_batch_delay_ms);
        info.max_idle_ms = request.max_idle_ms.unwrap_or(self.config.max_idle_ms);
        info.mpi = request.mpi;
        info.queue_capacity = request.queue_capacity;
        info.translator = request.translator;
        info.required_memory_bytes = request.required_memory_bytes;
        info.reserved_memory_bytes = request.reserved_memory_bytes;
        info.options = request.options;
        info
    }
}

impl std::fmt::Debug for WorkloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadManager")
            .field("devices", &self.registry.num_devices())
            .field("engines", &self.engines.names())
            .finish()
    }
}
