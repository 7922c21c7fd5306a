// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Payload translation.
//!
//! A translator adapts caller payloads to what an engine consumes and
//! engine chunks back to what the caller expects. Like engines,
//! translators are chosen by name at registration; the identity
//! translator is the default.

use crate::EngineError;

/// Converts payloads on the way into and out of an engine.
pub trait Translator: Send + Sync {
    /// Translator name, matched case-insensitively at registration.
    fn name(&self) -> &str;

    /// Prepares one caller payload for the engine. Runs at submission,
    /// before the job is queued.
    fn pre_process(&self, payload: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Converts one engine output chunk for the caller. Runs on the
    /// worker, per chunk.
    fn post_process(&self, chunk: Vec<u8>) -> Result<Vec<u8>, EngineError>;
}

/// Passes payloads and chunks through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTranslator;

impl Translator for IdentityTranslator {
    fn name(&self) -> &str {
        "identity"
    }

    fn pre_process(&self, payload: &[u8]) -> Result<Vec<u8>, EngineError> {
        Ok(payload.to_vec())
    }

    fn post_process(&self, chunk: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        Ok(chunk)
    }
}
