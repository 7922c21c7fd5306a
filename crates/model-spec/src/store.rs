// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model-store URL syntax and directory scanning.
//!
//! A store token is `[<name>[:<ver>[:<engine>[:<device-spec>]]]=]<url>`.
//! Empty endpoint fields mean "unset"; without an endpoint the model name
//! is inferred from the last url segment. A store directory maps each
//! subdirectory to one token, inferring the engine from marker files.

use crate::SpecError;
use std::path::Path;

/// One parsed model-store token.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ModelStoreEntry {
    /// Model name.
    pub name: String,
    /// Optional version.
    pub version: Option<String>,
    /// Optional engine adapter name.
    pub engine: Option<String>,
    /// Raw device spec (may be empty).
    pub device_spec: String,
    /// Model url.
    pub url: String,
}

impl ModelStoreEntry {
    /// Parses a store token.
    ///
    /// The endpoint part (before `=`) may be wrapped in `[...]`. A `=`
    /// that appears after a `/` or a scheme separator belongs to the url,
    /// not an endpoint.
    pub fn parse(token: &str) -> Result<Self, SpecError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SpecError::BadUrl {
                url: token.to_string(),
                detail: "empty token".to_string(),
            });
        }

        let (endpoint, url) = match token.find('=') {
            Some(pos) if !token[..pos].contains('/') && !token[..pos].contains("://") => {
                (Some(&token[..pos]), &token[pos + 1..])
            }
            _ => (None, token),
        };
        if url.is_empty() {
            return Err(SpecError::BadUrl {
                url: token.to_string(),
                detail: "missing url after '='".to_string(),
            });
        }

        let Some(endpoint) = endpoint else {
            return Ok(Self {
                name: infer_model_name(url),
                version: None,
                engine: None,
                device_spec: String::new(),
                url: url.to_string(),
            });
        };

        let endpoint = endpoint
            .strip_prefix('[')
            .and_then(|e| e.strip_suffix(']'))
            .unwrap_or(endpoint);
        let mut fields = endpoint.split(':');

        let name = fields.next().unwrap_or_default();
        if name.is_empty() {
            return Err(SpecError::BadUrl {
                url: token.to_string(),
                detail: "endpoint has no model name".to_string(),
            });
        }
        let version = fields.next().filter(|s| !s.is_empty()).map(str::to_string);
        let engine = fields.next().filter(|s| !s.is_empty()).map(str::to_string);
        let device_spec = fields.next().unwrap_or_default().to_string();
        if fields.next().is_some() {
            return Err(SpecError::BadUrl {
                url: token.to_string(),
                detail: "endpoint has more than four fields".to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            version,
            engine,
            device_spec,
            url: url.to_string(),
        })
    }
}

/// Infers a model name from the last url segment, stripping one extension.
pub fn infer_model_name(url: &str) -> String {
    let segment = url
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(url);
    match segment.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem.to_string(),
        _ => segment.to_string(),
    }
}

/// Infers an engine name from marker files in a model directory.
pub fn infer_engine(model_dir: &Path) -> Option<&'static str> {
    let dir_name = model_dir.file_name()?.to_string_lossy().to_string();
    if model_dir.join("model.py").is_file() || model_dir.join(format!("{dir_name}.py")).is_file() {
        Some("python")
    } else if model_dir.join(format!("{dir_name}.pt")).is_file() {
        Some("pytorch")
    } else if model_dir.join(format!("{dir_name}.onnx")).is_file() {
        Some("onnx")
    } else {
        None
    }
}

/// Scans a model-store directory, producing one entry per subdirectory.
///
/// Hidden directories and directories whose engine cannot be inferred are
/// skipped with a log line, matching a best-effort startup load.
pub fn scan_store(root: &Path) -> Result<Vec<ModelStoreEntry>, SpecError> {
    let mut entries = Vec::new();
    for item in std::fs::read_dir(root)? {
        let item = item?;
        let path = item.path();
        let name = item.file_name().to_string_lossy().to_string();
        if !path.is_dir() || name.starts_with('.') {
            continue;
        }
        let Some(engine) = infer_engine(&path) else {
            tracing::warn!(model_dir = %path.display(), "cannot infer engine, skipping");
            continue;
        };
        tracing::info!(model = %name, engine, "found model in store");
        entries.push(ModelStoreEntry {
            name,
            version: None,
            engine: Some(engine.to_string()),
            device_spec: "*".to_string(),
            url: format!("file://{}", path.display()),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
