// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # serving
//!
//! Command-line front end for the serving workload manager.
//!
//! ## Usage
//! ```bash
//! # Run the workload manager, loading models from a store directory
//! serving serve --model-store /opt/models --device-count 8
//!
//! # Dry-run a device plan for a model-store token
//! serving plan --devices 8 "llama:v1:python:{2}-=file:///opt/models/llama"
//!
//! # Show discovered devices and memory headroom
//! serving status
//! ```
//!
//! Exit codes: 0 normal, 1 configuration error, 2 startup error.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "serving",
    about = "Model-serving workload manager",
    version
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the workload manager and serve until interrupted.
    Serve {
        /// Model-store directory to load at startup.
        #[arg(short, long)]
        model_store: Option<std::path::PathBuf>,

        /// Fixed device count (skips hardware probing).
        #[arg(short, long)]
        device_count: Option<usize>,

        /// Shared-device window: integer count or float ratio in (0, 1].
        #[arg(short, long)]
        shared_devices: Option<String>,

        /// Model-store tokens to register at startup
        /// (`[name[:ver[:engine[:spec]]]=]url`).
        #[arg(long = "model")]
        models: Vec<String>,
    },

    /// Dry-run the device planner for one model-store token.
    Plan {
        /// The model-store token to plan.
        token: String,

        /// Device count to plan against.
        #[arg(short, long, default_value_t = 8)]
        devices: usize,

        /// Shared-device window setting.
        #[arg(short, long)]
        shared_devices: Option<String>,

        /// Tensor-parallel degree.
        #[arg(long, default_value_t = 1)]
        tensor_parallel: usize,

        /// Plan for MPI mode with this many workers per slot group.
        #[arg(long)]
        mpi_workers: Option<usize>,
    },

    /// Show discovered devices and memory headroom.
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    commands::init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Serve {
            model_store,
            device_count,
            shared_devices,
            models,
        } => {
            commands::serve::execute(
                cli.config,
                model_store,
                device_count,
                shared_devices,
                models,
            )
            .await
        }
        Commands::Plan {
            token,
            devices,
            shared_devices,
            tensor_parallel,
            mpi_workers,
        } => commands::plan::execute(token, devices, shared_devices, tensor_parallel, mpi_workers),
        Commands::Status => commands::status::execute(),
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e.error);
        std::process::exit(e.exit_code());
    }
}
