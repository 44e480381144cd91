//! Music daemon
//!
//! Serves the shared play queue over TCP until SIGINT or SIGTERM.
//! Usage: `musicbotd [CONFIG_FILE]`

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use musicbotd::{
    config::{AppConfig, LoggingConfig},
    constants::PLAYBACK_TICK,
    music::MusicRegistry,
    network::{Server, ServerHandle},
    player::{PlaybackDriver, Player, QueuePlayer},
};

#[tokio::main]
async fn main() -> Result<()> {
    let explicit = std::env::args().nth(1).map(PathBuf::from);
    let source = AppConfig::locate(explicit.as_deref());
    let config = AppConfig::load(source.as_deref()).context("Failed to load configuration")?;

    init_logging(&config.logging)?;
    match &source {
        Some(path) => tracing::info!("Loaded configuration from {}", path.display()),
        None => tracing::warn!("No configuration file found, using defaults"),
    }
    tracing::info!("Starting musicbotd on port {}", config.server.port);

    let registry = Arc::new(MusicRegistry::new());
    let (player, events) = QueuePlayer::new();
    let player: Arc<dyn Player> = Arc::new(player);

    let mut driver = PlaybackDriver::start(registry.clone(), player.clone(), events, PLAYBACK_TICK)
        .context("Failed to start playback driver")?;

    let mut server =
        Server::bind(&config.server, registry, player).context("Failed to bind listeners")?;
    let handle = server.handle();

    tokio::spawn(stop_on_signal(handle));

    tokio::task::spawn_blocking(move || server.run())
        .await
        .context("Server thread failed")?;

    driver.stop();
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let file_layer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// Stop the server on Ctrl+C or SIGTERM
async fn stop_on_signal(handle: ServerHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }

    handle.stop();
}
