// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for model descriptors and engine adapters.

/// Errors from model descriptors and the model store.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// A model-store URL token could not be parsed.
    #[error("invalid model url '{url}': {detail}")]
    BadUrl { url: String, detail: String },

    /// A model descriptor failed validation.
    #[error("invalid model configuration: {0}")]
    Validation(String),

    /// No engine adapter is registered under this name.
    #[error("unknown engine '{0}'")]
    UnknownEngine(String),

    /// No translator is registered under this name.
    #[error("unknown translator '{0}'")]
    UnknownTranslator(String),

    /// Filesystem error while scanning the model store.
    #[error("model store error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from engine adapters.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine could not load the model.
    #[error("engine failed to load model from '{url}': {detail}")]
    Load { url: String, detail: String },

    /// Inference on a batch failed mid-flight.
    #[error("inference failed: {0}")]
    Inference(String),
}
