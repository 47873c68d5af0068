//! API gateway binary.
//!
//! Single ingress point in front of the platform's backend services
//! (logistics core, social module, CMS, AI/communications). Loads the
//! service table at boot, composes one policy pipeline per service, and
//! proxies until shutdown.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::config::{load_config, GatewayConfig};
use api_gateway::lifecycle::Shutdown;
use api_gateway::observability::logging;
use api_gateway::GatewayServer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    logging::init_tracing(&args.log_level);

    let config = if args.config.exists() {
        load_config(&args.config)?
    } else {
        tracing::warn!(path = %args.config.display(), "Config file not found, using defaults");
        GatewayConfig::default()
    };

    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        environment = %config.auth.environment,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let server = GatewayServer::new(config)?;
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
