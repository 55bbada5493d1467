//! # Courier Server
//!
//! Standalone routing daemon for the Courier socket protocol.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! courier
//!
//! # Run with a config file at ./courier.toml or /etc/courier/courier.toml
//! courier
//!
//! # Run with environment variables
//! COURIER_PORT=5000 COURIER_HOST=0.0.0.0 courier
//! ```

use anyhow::Result;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier_server::{metrics, Config, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    info!("Starting Courier server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    let server = Server::bind(config).await?;
    server
        .run(|socket| {
            debug!(socket = %socket.id(), "socket connected");
        })
        .await
}
