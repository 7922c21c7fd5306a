// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The engine adapter interface.
//!
//! Concrete engines (python runners, native runtimes) live outside the
//! core; the workload manager only sees this small capability-tagged
//! surface. Variant behaviour is expressed by [`Capabilities`] data, not
//! by subtyping. Adapters are chosen by name at registration through the
//! [`EngineRegistry`].

use crate::EngineError;
use device_registry::DeviceSet;
use std::collections::HashMap;
use std::sync::Arc;

/// What an engine can do; consulted by the planner and the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Capabilities {
    /// The engine can execute on accelerator devices.
    pub accelerator: bool,
    /// The engine emits incremental output chunks.
    pub streaming: bool,
}

/// One output chunk, routed to the job at `job` within the batch.
///
/// Adapters that produce a single combined output for a batch split it
/// along the batch dimension before emitting, so the worker always
/// receives per-job chunks in production order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineChunk {
    /// Index of the target job within the dispatched batch.
    pub job: usize,
    /// Chunk payload.
    pub data: Vec<u8>,
    /// Terminal chunk for this job.
    pub last: bool,
}

/// A loaded model instance bound to a device set.
///
/// Unloading is the drop of the handle.
pub trait EngineHandle: Send {
    /// Runs one batch and returns the output chunk stream.
    ///
    /// The iterator yields chunks in production order; an `Err` item is a
    /// fault that kills the stream.
    fn infer(
        &mut self,
        batch: &[Vec<u8>],
    ) -> Result<Box<dyn Iterator<Item = Result<EngineChunk, EngineError>> + Send + '_>, EngineError>;
}

/// An engine adapter: loads models and reports its capabilities.
pub trait EngineAdapter: Send + Sync {
    /// Adapter name, matched case-insensitively at registration.
    fn name(&self) -> &str;

    /// Static capabilities of this adapter.
    fn capabilities(&self) -> Capabilities;

    /// Loads a model onto a device set.
    fn load(
        &self,
        url: &str,
        devices: &DeviceSet,
        options: &HashMap<String, String>,
    ) -> Result<Box<dyn EngineHandle>, EngineError>;
}

/// Name-keyed set of engine adapters and translators, built once at
/// startup.
pub struct EngineRegistry {
    adapters: HashMap<String, Arc<dyn EngineAdapter>>,
    translators: HashMap<String, Arc<dyn crate::Translator>>,
}

impl EngineRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            translators: HashMap::new(),
        }
    }

    /// A registry holding the built-ins: the [`EchoEngine`] adapter and
    /// the identity translator.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoEngine::default()));
        registry.register_translator(Arc::new(crate::IdentityTranslator));
        registry
    }

    /// Registers an adapter under its own name.
    pub fn register(&mut self, adapter: Arc<dyn EngineAdapter>) {
        let name = adapter.name().to_lowercase();
        tracing::info!(engine = %name, "engine adapter registered");
        self.adapters.insert(name, adapter);
    }

    /// Registers a translator under its own name.
    pub fn register_translator(&mut self, translator: Arc<dyn crate::Translator>) {
        let name = translator.name().to_lowercase();
        tracing::info!(translator = %name, "translator registered");
        self.translators.insert(name, translator);
    }

    /// Looks up an adapter by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn EngineAdapter>> {
        self.adapters.get(&name.to_lowercase()).cloned()
    }

    /// Looks up a translator by name.
    pub fn translator(&self, name: &str) -> Option<Arc<dyn crate::Translator>> {
        self.translators.get(&name.to_lowercase()).cloned()
    }

    /// Registered adapter names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// A CPU engine that echoes each payload back in a fixed number of
/// chunks. Backs the CLI demo and the test suites; real adapters replace
/// it in deployments.
#[derive(Debug, Clone)]
pub struct EchoEngine {
    chunks_per_job: usize,
}

impl EchoEngine {
    /// Creates an echo engine splitting each payload into `chunks_per_job`
    /// pieces (at least one).
    pub fn new(chunks_per_job: usize) -> Self {
        Self {
            chunks_per_job: chunks_per_job.max(1),
        }
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new(1)
    }
}

impl EngineAdapter for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            accelerator: false,
            streaming: true,
        }
    }

    fn load(
        &self,
        url: &str,
        devices: &DeviceSet,
        _options: &HashMap<String, String>,
    ) -> Result<Box<dyn EngineHandle>, EngineError> {
        tracing::debug!(url, %devices, "echo engine loaded");
        Ok(Box::new(EchoHandle {
            chunks_per_job: self.chunks_per_job,
        }))
    }
}

struct EchoHandle {
    chunks_per_job: usize,
}

impl EngineHandle for EchoHandle {
    fn infer(
        &mut self,
        batch: &[Vec<u8>],
    ) -> Result<Box<dyn Iterator<Item = Result<EngineChunk, EngineError>> + Send + '_>, EngineError>
    {
        let mut chunks = Vec::new();
        for (job, payload) in batch.iter().enumerate() {
            let pieces = split_payload(payload, self.chunks_per_job);
            let total = pieces.len();
            for (i, data) in pieces.into_iter().enumerate() {
                chunks.push(Ok(EngineChunk {
                    job,
                    data,
                    last: i + 1 == total,
                }));
            }
        }
        Ok(Box::new(chunks.into_iter()))
    }
}

/// Splits a payload into up to `parts` contiguous pieces, preserving
/// order. Short payloads produce fewer pieces; empty payloads produce one
/// empty terminal piece.
fn split_payload(payload: &[u8], parts: usize) -> Vec<Vec<u8>> {
    if payload.is_empty() {
        return vec![Vec::new()];
    }
    let parts = parts.min(payload.len());
    let chunk_len = payload.len().div_ceil(parts);
    payload.chunks(chunk_len).map(|c| c.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(handle: &mut Box<dyn EngineHandle>, batch: &[Vec<u8>]) -> Vec<EngineChunk> {
        handle
            .infer(batch)
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
    }

    #[test]
    fn test_echo_roundtrip() {
        let engine = EchoEngine::default();
        let mut handle = engine
            .load("file:///m", &DeviceSet::cpu(), &HashMap::new())
            .unwrap();

        let chunks = collect(&mut handle, &[b"hello".to_vec()]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].job, 0);
        assert_eq!(chunks[0].data, b"hello");
        assert!(chunks[0].last);
    }

    #[test]
    fn test_echo_chunked_stream() {
        let engine = EchoEngine::new(3);
        let mut handle = engine
            .load("file:///m", &DeviceSet::cpu(), &HashMap::new())
            .unwrap();

        let chunks = collect(&mut handle, &[b"abcdef".to_vec()]);
        assert_eq!(chunks.len(), 3);
        assert!(!chunks[0].last);
        assert!(!chunks[1].last);
        assert!(chunks[2].last);

        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(joined, b"abcdef");
    }

    #[test]
    fn test_echo_batched_jobs() {
        let engine = EchoEngine::default();
        let mut handle = engine
            .load("file:///m", &DeviceSet::cpu(), &HashMap::new())
            .unwrap();

        let chunks = collect(&mut handle, &[b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].job, 0);
        assert_eq!(chunks[1].job, 1);
        assert!(chunks.iter().all(|c| c.last));
    }

    #[test]
    fn test_echo_empty_payload() {
        let engine = EchoEngine::new(4);
        let mut handle = engine
            .load("file:///m", &DeviceSet::cpu(), &HashMap::new())
            .unwrap();

        let chunks = collect(&mut handle, &[Vec::new()]);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].last);
        assert!(chunks[0].data.is_empty());
    }

    #[test]
    fn test_split_payload_counts() {
        assert_eq!(split_payload(b"abcdef", 3).len(), 3);
        assert_eq!(split_payload(b"ab", 4).len(), 2);
        assert_eq!(split_payload(b"", 4).len(), 1);
    }

    #[test]
    fn test_registry_lookup_case_insensitive() {
        let registry = EngineRegistry::with_builtins();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("Echo").is_some());
        assert!(registry.get("tensorrt").is_none());
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }
}
