//! Pairlink Server - Main Entry Point
//!
//! TCP (optionally TLS) listener for two-party room signaling.

use anyhow::Result;
use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use pairlink::config::resolve_log_level;
use pairlink::{serve, tls, Relay, RoomRegistry, ServerConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "pairlink-server")]
#[command(about = "Pairlink signaling server - pairs two peers per room")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// Override host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Override signaling port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = if args.config.exists() {
        Some(ServerConfig::from_file(&args.config)?)
    } else {
        None
    };
    let found_config = config.is_some();
    let config = config.unwrap_or_default();

    // Initialize logging
    let log_level = resolve_log_level(args.log_level.as_deref(), &config.log_level);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if !found_config {
        info!("Config file {} not found, using defaults", args.config.display());
    }

    let host = args.host.unwrap_or_else(|| config.host.clone());
    let port = args.port.unwrap_or(config.port);

    let acceptor = match config.tls_files() {
        Some((certfile, keyfile)) => {
            info!("TLS enabled with certificate {}", certfile.display());
            Some(tls::acceptor(certfile, keyfile)?)
        }
        None => None,
    };

    let relay = Arc::new(Relay::new(RoomRegistry::new(config.code_length)));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Pairlink signaling server listening on {}", addr);

    tokio::select! {
        result = serve(listener, acceptor, relay.clone(), config.max_frame_bytes) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!(
                "Shutting down with {} connection(s) and {} room(s) active",
                relay.connection_count(),
                relay.registry().room_count()
            );
        }
    }

    Ok(())
}
