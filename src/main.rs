use anyhow::Result;
use booking_pipeline::config::{Cli, Role};
use booking_pipeline::services;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Cli::parse().into_config()?;
    info!(role = %config.role, "Booking pipeline starting");

    match config.role {
        Role::Server => services::run_server(config).await,
        Role::Notifier => services::run_notifier(config).await,
    }
}
