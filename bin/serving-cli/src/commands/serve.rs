// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `serving serve` command: run the workload manager until interrupted.

use super::CliError;
use anyhow::anyhow;
use model_spec::ModelStoreEntry;
use std::path::PathBuf;
use wlm::{ServerConfig, WorkloadManager};

pub async fn execute(
    config_path: Option<PathBuf>,
    model_store: Option<PathBuf>,
    device_count: Option<usize>,
    shared_devices: Option<String>,
    models: Vec<String>,
) -> Result<(), CliError> {
    // ── Configuration ──────────────────────────────────────────
    let mut config = match config_path {
        Some(path) => ServerConfig::from_file(&path).map_err(CliError::config)?,
        None => ServerConfig::default(),
    };
    if let Some(count) = device_count {
        config.device_count = Some(count);
    }
    if let Some(shared) = shared_devices {
        config.shared_devices = Some(shared);
    }
    if let Some(store) = model_store {
        config.model_store = Some(store);
    }

    // Parse startup tokens before touching any hardware.
    let entries: Vec<ModelStoreEntry> = models
        .iter()
        .map(|token| ModelStoreEntry::parse(token))
        .collect::<Result<_, _>>()
        .map_err(CliError::config)?;

    // ── Startup ────────────────────────────────────────────────
    let manager = WorkloadManager::new(config).map_err(CliError::config)?;
    println!(
        "serving: {} device(s), engines: {}",
        manager.registry().num_devices(),
        manager.config().default_engine,
    );

    if let Some(store) = manager.config().model_store.clone() {
        let count = manager
            .load_model_store(&store)
            .await
            .map_err(CliError::startup)?;
        println!("serving: loaded {count} model(s) from {}", store.display());
    }
    for entry in entries {
        let name = entry.name.clone();
        manager
            .register_entry(entry)
            .await
            .map_err(CliError::startup)?;
        println!("serving: registered model '{name}'");
    }

    let keys = manager.model_keys().await;
    if keys.is_empty() {
        println!("serving: no models registered (use --model or --model-store)");
    } else {
        println!("serving: ready with models: {}", keys.join(", "));
    }
    manager.start_sweeper();

    // ── Serve until interrupted ────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::startup(anyhow!("failed to listen for shutdown signal: {e}")))?;
    println!("serving: shutting down");
    manager.shutdown().await;
    println!("serving: stopped");
    Ok(())
}
