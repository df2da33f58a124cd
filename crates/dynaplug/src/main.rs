// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! dynaplug binary entry point.
//!
//! Parses CLI arguments, loads configuration, and dispatches to the
//! requested subcommand.

mod commands;
mod serve;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// dynaplug - build, load and serve Rust plugins at runtime.
#[derive(Parser, Debug)]
#[command(name = "dynaplug", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the default hierarchy.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway, auto-load plugins and run health checks.
    Serve,
    /// Parse and validate a plugin manifest.
    Validate {
        /// Path to a plugin.toml file.
        manifest: PathBuf,
        /// Disable colored output.
        #[arg(long)]
        plain: bool,
    },
    /// Inspect or clear the build cache.
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Show cached artifacts.
    Info,
    /// Remove every cached artifact.
    Clear,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => dynaplug_config::load_and_validate_path(path),
        None => dynaplug_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            dynaplug_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Validate { manifest, plain }) => commands::run_validate(&manifest, plain),
        Some(Commands::Cache { action }) => match action {
            CacheCommands::Info => commands::run_cache_info(&config),
            CacheCommands::Clear => commands::run_cache_clear(&config),
        },
        None => {
            println!("dynaplug: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
