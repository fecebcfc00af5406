use std::sync::Arc;

use checkin_core::{CheckinConfig, FallbackInsightClient, InsightBackend};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use checkin_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "checkin.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match CheckinConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level)),
        )
        .init();

    // The one storage handle for the process; handlers borrow it through state.
    let store = match checkin_core::store::build_store(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to set up {:?} storage: {}", config.storage.backend, e);
            std::process::exit(1);
        }
    };

    if args.health {
        let result = store.health().await;
        store.close().await;
        match result {
            Ok(v) => {
                println!("✅ Storage ({}) reachable: {}", store.name(), v);
                return Ok(());
            }
            Err(e) => {
                println!("❌ Storage ({}) check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }
    }

    let insight: Arc<dyn InsightBackend> =
        Arc::new(FallbackInsightClient::from_settings(&config.insight));

    let (tx, rx) = broadcast::channel(1);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            // Keep the sender alive so the server is not shut down by a closed channel.
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        let _ = tx.send(());
    });

    let state = Arc::new(HttpState {
        store: store.clone(),
        insight,
        config,
    });

    let served = http::start_http_server(state, rx).await;

    store.close().await;
    tracing::info!(backend = store.name(), "Storage closed");

    served
}
