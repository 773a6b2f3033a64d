//! Teller - bank integration gateway

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teller::{config::Args, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("teller={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Teller - Bank Integration Gateway");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Aggregator: {}", args.aggregator_url);
    info!(
        "Aggregator credentials: {}",
        if args.aggregator_configured() { "configured" } else { "MISSING" }
    );
    info!("Scraper: {}", args.scraper_url);
    info!(
        "Scraper retries: {} (attempt timeout {}s, connect deadline {}s)",
        args.scraper_max_retries, args.scraper_attempt_timeout_secs, args.connect_deadline_secs
    );
    info!("Summary TTL: {}s", args.summary_ttl_secs);
    info!("======================================");

    // Wire MongoDB, the vault, both provider clients, and the services.
    // Any failure here is fatal: no route can serve without them.
    let state = match AppState::new(args).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };
    info!("MongoDB connected, services wired");

    // Run the server
    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
