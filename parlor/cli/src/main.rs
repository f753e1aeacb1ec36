//! Parlor - Terminal Chat
//!
//! Interactive REPL on top of the generation controller.
//!
//! # Usage
//!
//! ```bash
//! # Chat with the default model on a local Ollama
//! parlor
//!
//! # No model needed: the dev backend echoes the prompt after a few seconds
//! parlor --dev
//!
//! # Different model, one completed reply per turn
//! parlor --model llama3.2 --mode complete
//!
//! # Verbose logging (goes to stderr)
//! RUST_LOG=debug parlor
//! ```
//!
//! # Signals
//!
//! - `SIGINT` while generating: stop the reply
//! - `SIGINT` at the prompt: exit

mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use parlor_core::{
    build_backend, default_config_path, load_config_from_path, BackendKind, ConfigOverrides,
    GenerationController, GenerationMode,
};

use repl::Repl;

/// Parlor - chat with a local language model
#[derive(Parser, Debug)]
#[command(name = "parlor")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "PARLOR_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model to chat with
    #[arg(short = 'm', long, value_name = "NAME")]
    model: Option<String>,

    /// Inference backend (ollama, dev)
    #[arg(short = 'b', long, value_name = "BACKEND")]
    backend: Option<BackendKind>,

    /// Use the developer backend (shorthand for --backend dev)
    #[arg(short = 'd', long)]
    dev: bool,

    /// Generation mode (streaming, complete)
    #[arg(long, value_name = "MODE")]
    mode: Option<GenerationMode>,

    /// System prompt; pass an empty string to disable it
    #[arg(short = 's', long, value_name = "TEXT")]
    system_prompt: Option<String>,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref model) = self.model {
            overrides = overrides.with_model(model.clone());
        }
        if self.dev {
            overrides = overrides.with_backend(BackendKind::Dev);
        } else if let Some(backend) = self.backend {
            overrides = overrides.with_backend(backend);
        }
        if let Some(mode) = self.mode {
            overrides = overrides.with_mode(mode);
        }
        if let Some(ref prompt) = self.system_prompt {
            overrides = overrides.with_system_prompt(prompt.clone());
        }
        overrides
    }
}

/// Initialize logging to stderr so it never interleaves with the reply
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("parlor_cli={level},parlor_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line options")?;

    info!(
        model = %config.model,
        backend = %config.backend,
        mode = %config.mode,
        source = %config.source(),
        "Starting parlor"
    );

    if config.backend == BackendKind::Dev {
        println!("-- !! Developer Mode Enabled !! --");
    }

    let backend = build_backend(&config.backend_config())
        .with_context(|| format!("Failed to create {} backend", config.backend))?;
    let controller = Arc::new(GenerationController::new(
        backend,
        config.controller_config(),
    ));

    let repl = Repl::new(Arc::clone(&controller), config.model_short_name());
    let result = repl.run().await;

    controller.shutdown().await;
    println!("> Exiting ...");

    result
}
