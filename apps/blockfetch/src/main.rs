//! blockfetch entry point.

mod app;
mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use blockfetch_transfer::FetchStrategy;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "blockfetch", version)]
#[command(about = "Serve a file over UDP, or fetch one in fixed-size blocks")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one file until Ctrl-C
    Serve {
        /// File to serve
        #[arg(long)]
        file: Option<PathBuf>,

        /// Address to bind
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Longest range a client may request
        #[arg(long)]
        max_block_size: Option<u64>,
    },

    /// Fetch the served file
    Fetch {
        /// Server address
        #[arg(long)]
        server: Option<SocketAddr>,

        /// Destination path
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Block size in bytes
        #[arg(long)]
        block_size: Option<u64>,

        /// Concurrent block workers
        #[arg(long)]
        window: Option<u64>,

        /// Block assignment: strided or work-queue
        #[arg(long)]
        strategy: Option<FetchStrategy>,

        /// Attempts per block before giving up (0 = unlimited)
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::load(cli.config.as_deref())?;
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Serve {
            file,
            bind,
            max_block_size,
        } => {
            let server = &mut config.server;
            if let Some(file) = file {
                server.file = file;
            }
            if let Some(bind) = bind {
                server.bind = bind;
            }
            if let Some(max) = max_block_size {
                server.max_block_size = max;
            }

            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                file = %server.file.display(),
                "starting chunk server"
            );
            rt.block_on(app::serve(server.to_server_config()))?;
            tracing::info!("server shut down cleanly");
        }

        Commands::Fetch {
            server,
            output,
            block_size,
            window,
            strategy,
            max_attempts,
        } => {
            let client = &mut config.client;
            if let Some(server) = server {
                client.server = server;
            }
            if let Some(output) = output {
                client.output = output;
            }
            if let Some(size) = block_size {
                client.block_size = size;
            }
            if let Some(window) = window {
                client.window_size = window;
            }
            if let Some(strategy) = strategy {
                client.strategy = strategy;
            }
            if let Some(max) = max_attempts {
                client.max_attempts = max;
            }

            let summary = rt.block_on(app::fetch(
                client.server,
                &client.output,
                client.to_fetch_config(),
            ))?;
            println!(
                "fetched {} bytes into {} in {:.2}s ({} retries)",
                summary.file_size,
                client.output.display(),
                summary.elapsed.as_secs_f64(),
                summary.stats.retries
            );
        }
    }

    Ok(())
}
