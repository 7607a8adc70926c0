//! Lingua RPC Server - JSON-RPC backend for a reader front end.
//!
//! This binary provides a JSON-RPC 2.0 server that wraps the lingua-core
//! library, plus a model file proxy for front ends that cannot reach the
//! model storage directly.

mod handler;
mod proxy;
mod server;

use anyhow::Result;
use clap::Parser;
use lingua_core::{LinguaApi, ModelsJsonParser};
use server::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lingua-rpc")]
#[command(about = "JSON-RPC server for local translation models")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// URL of the model registry document
    #[arg(long, env = "LINGUA_REGISTRY_URL")]
    registry_url: String,

    /// Base URL that registry file paths are relative to
    #[arg(long, env = "LINGUA_STORAGE_BASE_URL")]
    storage_base_url: String,

    /// Model cache directory (defaults to the user cache directory)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Intermediate language for pivot translation
    #[arg(long)]
    hub_language: Option<String>,

    /// Fetch model files through this proxy
    #[arg(long)]
    proxy: Option<String>,

    /// Translation worker executable
    #[arg(long)]
    worker_command: Option<PathBuf>,

    /// Extra argument passed to the worker (repeatable)
    #[arg(long = "worker-arg")]
    worker_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Lingua RPC Server");

    // Normalized the same way the registry parser joins file paths.
    let storage_base = ModelsJsonParser::new(&args.storage_base_url)?
        .storage_base()
        .clone();

    let mut builder = LinguaApi::builder()
        .registry_url(&args.registry_url)
        .storage_base_url(&args.storage_base_url)
        .worker_args(args.worker_args);
    if let Some(dir) = args.cache_dir {
        builder = builder.cache_dir(dir);
    }
    if let Some(hub) = args.hub_language {
        builder = builder.hub_language(hub);
    }
    if let Some(proxy) = args.proxy {
        builder = builder.proxy(proxy);
    }
    if let Some(command) = args.worker_command {
        builder = builder.worker_command(command);
    }

    // Create the API instance
    let api = builder.build().await?;
    info!("Model cache: {}", api.cache_dir().display());

    // Start the server
    let state = Arc::new(AppState::new(api, storage_base)?);
    let addr = server::start_server(state.clone(), &args.host, args.port).await?;

    // Print port for the front end to read (intentional stdout for IPC)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    state.api.shutdown().await;

    Ok(())
}
