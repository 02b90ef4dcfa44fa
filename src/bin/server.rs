//! AllyKV Server Binary
//!
//! Opens the engine, starts background maintenance and serves the TCP
//! protocol until Ctrl+C.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use allykv::network::Server;
use allykv::{Config, Engine, MaintenanceScheduler};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// AllyKV Server
#[derive(Parser, Debug)]
#[command(name = "allykv-server")]
#[command(about = "Log-structured key-value store")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, default_value = "allykv.toml")]
    config: PathBuf,

    /// Override the data directory from the config file
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Override the listen port from the config file
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,allykv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("AllyKV Server v{}", allykv::VERSION);

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            process::exit(1);
        }
    };
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Listen address: {}", config.listen_addr());

    if let Err(e) = run(config) {
        tracing::error!("Server error: {}", e);
        process::exit(1);
    }

    tracing::info!("Server stopped");
}

fn run(config: Config) -> allykv::Result<()> {
    let engine = Arc::new(Engine::open(config.clone())?);
    tracing::info!("Engine initialized successfully");

    let scheduler = MaintenanceScheduler::start(Arc::clone(&engine), config.maintenance)?;
    let server = Server::bind(config, Arc::clone(&engine))?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, initiating shutdown...");
        shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .map_err(|e| allykv::AllyError::Config(format!("cannot install signal handler: {}", e)))?;

    let served = server.run();
    drop(server);
    scheduler.shutdown()?;

    // Buffered writes and the index reach disk before exit
    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.close()?,
        Err(engine) => {
            engine.flush_new()?;
            engine.flush_edits()?;
            engine.persist_index()?;
        }
    }

    served
}
