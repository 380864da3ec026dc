//! Broadside relay server -- two-player WebSocket message relay.
//!
//! An axum WebSocket server that forwards every text message from a
//! connected game client to all connected clients, and serves the game's
//! prebuilt frontend bundle. The relay is payload-agnostic: frames pass
//! through verbatim, with no schema and no validation.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8000
//! cargo run --bin broadside-relay
//!
//! # Run on custom address with a different bundle directory
//! cargo run --bin broadside-relay -- --bind 127.0.0.1:8080 --assets-dir frontend/dist
//!
//! # Or via environment variable
//! BROADSIDE_ADDR=127.0.0.1:8080 cargo run --bin broadside-relay
//! ```

use std::sync::Arc;

use broadside_relay::config::{RelayCliArgs, RelayConfig};
use broadside_relay::relay::{self, RelayState};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting broadside relay server");

    let state = Arc::new(RelayState::new());

    match relay::start_server_with_state(&config.bind_addr, &config.assets_dir, Arc::clone(&state))
        .await
    {
        Ok((bound_addr, mut handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            tokio::select! {
                result = &mut handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "relay server task failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down, closing client connections");
                    state.close_all().await;
                    handle.abort();
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
