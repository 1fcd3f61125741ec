//! indra - intraday index-options trading engine.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

/// Intraday index-options trading engine (NIFTY, SENSEX).
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (also via the INDRA_CONFIG env var).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    indra_telemetry::init_logging()?;
    info!("starting indra v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .or_else(|| std::env::var("INDRA_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());
    info!(config_path = %config_path, "loading configuration");

    let config = match indra_engine::AppConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration invalid");
            std::process::exit(1);
        }
    };

    let engine = match indra_engine::Engine::new(config).await {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "engine startup failed");
            std::process::exit(1);
        }
    };

    // SIGINT/SIGTERM request a graceful drain through the cancel token.
    let shutdown = engine.shutdown_token();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("sigterm handler");
            tokio::select! {
                _ = ctrl_c => info!("SIGINT received"),
                _ = sigterm.recv() => info!("SIGTERM received"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("SIGINT received");
        }
        shutdown.cancel();
    });

    if let Err(e) = engine.run().await {
        error!(error = %e, "engine exited with failure");
        std::process::exit(1);
    }
    Ok(())
}
