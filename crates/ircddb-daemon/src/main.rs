//! ircddb-daemon: gateway that mirrors the shared tables of an IRC channel.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ircddb_core::{
    ConnectionLifecycle, InMemoryStore, Membership, SendQueueSlot, SessionProtocol, SyncEngine,
};
use ircddb_daemon::{Config, ConnectionManager, EngineLoop, TcpTransport, spawn_driver};

#[derive(Parser, Debug)]
#[command(name = "ircddb-daemon")]
#[command(about = "Replicated key/value tables over an IRC channel")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "ircddb.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,ircddb_core=debug,ircddb_daemon=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting ircddb-daemon {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&args.config)?;
    let session_config = config
        .session_config()
        .context("Invalid session configuration")?;
    let engine_config = config
        .engine_config()
        .context("Invalid engine configuration")?;

    info!(
        "Server {}:{}, channel {}, {} table(s)",
        config.irc_server_name,
        config.irc_server_port,
        config.irc_channel,
        engine_config.num_tables()
    );

    let membership = Arc::new(Membership::new());
    let slot = SendQueueSlot::new();

    let store = InMemoryStore::new(engine_config.num_tables());
    let engine = SyncEngine::new(engine_config, store, Arc::clone(&membership), slot.clone());

    let transport = TcpTransport::new(ConnectionManager::new(
        config.irc_server_name.clone(),
        config.irc_server_port,
    ));
    let session = SessionProtocol::new(session_config, Arc::clone(&membership), slot.clone());
    let lifecycle = ConnectionLifecycle::new(transport, session, membership, slot);

    let (tx, rx) = mpsc::unbounded_channel();
    let driver = spawn_driver(lifecycle, tx);
    let engine_loop = EngineLoop::new(engine, rx, config.dump_userdb_filename.clone());

    info!("Gateway running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = engine_loop.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    driver.abort();
    info!("Shutting down");
    Ok(())
}
