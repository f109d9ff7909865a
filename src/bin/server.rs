// packflow - main server binary
// Run with: cargo run --bin server

//! # packflow Server Binary
//!
//! Reads configuration from flags and environment variables (see
//! [`packflow::Config`]), wires the in-memory stores into the engine,
//! starts the background maintenance tasks and serves the REST API.
//!
//! ```text
//! main()
//!   ↓ parses
//! Config (clap + .env)
//!   ↓ builds
//! AppState (stores → registry, broker, dispatcher)
//!   ↓ spawns
//! action expiry + optional dead pack sweeper
//!   ↓ serves
//! ApiServer (axum)
//! ```
//!
//! ## Rust Learning Notes:
//!
//! ### Async Main Function
//! `#[tokio::main]` turns the async `main` into a synchronous one that
//! starts the tokio runtime first.
//!
//! ### anyhow in Binaries
//! Library code returns the typed `PackflowError`; the binary only needs to
//! report a startup failure, so it returns `anyhow::Result`.

use clap::Parser;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use packflow::engine::sweeper::{spawn_action_expiry, spawn_dead_pack_sweeper};
use packflow::{ApiServerBuilder, AppState, Config};

fn init_tracing(config: &Config) {
    let filter = config
        .loglevel
        .as_deref()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let dotenv_result = dotenv();

    let config = Config::parse();
    init_tracing(&config);

    if let Err(e) = dotenv_result {
        info!("No .env file loaded ({}), using process environment", e);
    }

    info!("🚀 Starting packflow...");
    info!("=====================================");
    info!("Server: {}", config.bind_address());
    info!("Action TTL: {}s", config.ttl_in_seconds);
    info!("dependsOn mode: {:?}", config.depends_on_mode);

    let state = AppState::in_memory(config.depends_on_mode);

    spawn_action_expiry(
        state.actions.clone(),
        config.action_expiry_interval(),
        config.action_ttl(),
    );

    if config.should_delete_dead_packs {
        info!(
            "✅ Dead packs are removed daily at {} UTC after {}s of silence",
            config.delete_dead_packs_at.format("%H:%M"),
            config.pack_grace_period_in_seconds
        );
        spawn_dead_pack_sweeper(
            state.registry.clone(),
            config.delete_dead_packs_at,
            config.pack_grace_period(),
        );
    }

    ApiServerBuilder::new()
        .with_host(config.host.clone())
        .with_port(config.port)
        .with_state(state)
        .build()
        .run()
        .await
}
