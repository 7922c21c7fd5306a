// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommand implementations and shared CLI plumbing.

pub mod plan;
pub mod serve;
pub mod status;

/// How a command failed, mapped onto the process exit codes:
/// 1 for configuration errors, 2 for startup errors.
pub struct CliError {
    pub error: anyhow::Error,
    kind: CliErrorKind,
}

enum CliErrorKind {
    Config,
    Startup,
}

impl CliError {
    pub fn config(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            kind: CliErrorKind::Config,
        }
    }

    pub fn startup(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            kind: CliErrorKind::Startup,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind {
            CliErrorKind::Config => 1,
            CliErrorKind::Startup => 2,
        }
    }
}

/// Initialises tracing based on `-v` count.
pub fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}
