mod server;

use anyhow::Result;
use clap::Parser;
use rtmprelay_core::{config::load_config, logging, GstLaunchEngine, RelayPlugin, RtmpRelay};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rtmprelay")]
#[command(about = "WebRTC to RTMP relay node", long_about = None)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen host, overrides server.host
    #[arg(long, env = "RTMPRELAY_HOST")]
    host: Option<String>,

    /// HTTP listen port, overrides server.http_port
    #[arg(long, env = "RTMPRELAY_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = load_config(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.http_port = port;
    }

    // 2. Initialize logging
    let _log_guard = logging::init_logging(&config.logging)?;
    info!("rtmprelay starting...");
    info!("HTTP address: {}", config.http_address());
    info!(
        gst_launch = %config.pipeline.gst_launch_path,
        port_base = config.ports.base,
        port_max = config.ports.max,
        "Pipeline settings"
    );

    // 3. Bring up the relay
    let engine = Arc::new(GstLaunchEngine::new(&config.pipeline));
    let relay = Arc::new(RtmpRelay::new(&config, engine));
    relay.init().await?;

    // 4. Serve until a shutdown signal arrives
    let result = server::serve(relay.clone(), &config.http_address(), shutdown_signal()).await;
    if let Err(e) = &result {
        error!("HTTP server error: {e}");
    }

    // 5. Tear down every relay before exiting
    relay.shutdown().await;
    info!("rtmprelay stopped");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
