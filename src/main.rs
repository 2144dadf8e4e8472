use std::sync::Arc;

use clap::Parser;
use pricing_server::config::Config;
use pricing_server::server::{self, Hub};
use pricing_server::storage::MemoryStore;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "pricing-server", about = "Simulated price feed and contract evaluation server")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override the listen address from the config
    #[arg(long)]
    listen: Option<String>,

    /// Override the PRNG seed for a reproducible price sequence
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        toml::from_str(include_str!("../config.toml.example")).expect("Invalid default config")
    });
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(seed) = cli.seed {
        config.engine.seed = Some(seed);
    }

    pricing_server::telemetry::init_telemetry(&config.telemetry)?;

    let store = Arc::new(MemoryStore::new());
    let hub = Hub::new(&config, store);
    hub.start().await;

    let listener = TcpListener::bind(&config.server.listen_addr).await?;
    tracing::info!(addr = %config.server.listen_addr, "pricing server listening");

    tokio::select! {
        result = server::serve(listener, hub.clone()) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    hub.shutdown().await;
    Ok(())
}
