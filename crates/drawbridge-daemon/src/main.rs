//! Drawbridge - Main Entry Point

use drawbridge_daemon::{Daemon, DaemonConfig, Exit, DEFAULT_CONFIG_PATH};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status asking the supervisor for a restart
const REBOOT_EXIT_CODE: i32 = 75;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Drawbridge v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let config = DaemonConfig::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!(path = %config_path, error = %e, "Config not loaded, using defaults");
        DaemonConfig::default()
    });

    let daemon = Daemon::bind(config).await?;
    match daemon.run().await? {
        Exit::Reboot => std::process::exit(REBOOT_EXIT_CODE),
    }
}
