//! `magic-mirror` - runs the Syncer (polling tick loop) or the Reactor
//! (webhook server) half of the PR-mirroring engine.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mirror_core::Config;
use tracing_subscriber::EnvFilter;

mod bootstrap;
mod reactor_cmd;
mod syncer_cmd;
mod webhook;

/// Magic Mirror: cherry-picks merged upstream pull requests onto fork
/// branches, opens tracking PRs, and drives them to merge.
#[derive(Parser)]
#[command(name = "magic-mirror", version, about)]
struct Cli {
    /// Path to `config.json`. Defaults to `./config.json`, falling back to
    /// `/etc/magic-mirror/config.json`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll upstream repos for newly merged PRs and drive each tuple's sync
    /// state machine forward, one tick at a time.
    Syncer,
    /// Serve the webhook endpoint that reacts to tracking-issue closures,
    /// CI signals, and sync-PR closures between Syncer ticks.
    Reactor {
        /// Port to listen on.
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load(&path),
        None => Config::load_default(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            // Logging isn't set up yet without a config's log_level, so this
            // one failure path prints directly to stderr.
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async move {
        match cli.command {
            Commands::Syncer => syncer_cmd::run(config).await,
            Commands::Reactor { port } => reactor_cmd::run(config, port).await,
        }
    });

    if let Err(e) = result {
        tracing::error!(error = %e, "exiting on fatal error");
        std::process::exit(1);
    }
}
