use anyhow::Result;
use clap::Parser;
use fnbridge_api::{create_router, AppState};
use fnbridge_core::{logging, Config};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "fnbridge", about = "Jellyfin-compatible gateway for fnOS media servers")]
struct Cli {
    /// Path to a config file (TOML/YAML/JSON); environment variables with
    /// the FNBRIDGE prefix override it
    #[arg(short, long, env = "FNBRIDGE_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}");
        eprintln!("Using default configuration");
        Config::default()
    });

    logging::init_logging(&config.logging)?;

    info!("fnbridge starting...");
    info!("Listen address: {}", config.listen_address());
    info!("Backend: {}", config.backend.url);

    let listen_address = config.listen_address();
    let state = AppState::new(config);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_address).await?;
    info!("Serving on {listen_address}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("fnbridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}
