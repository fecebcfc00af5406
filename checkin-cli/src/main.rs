//! checkin-cli: terminal front end for the location capture-and-submit flow
//!
//! The terminal has no geolocation capability of its own, so the fix is
//! supplied on the command line and replayed through the same flow a browser
//! page would drive.
//!
//! # Subcommands
//! - `capture --lat <deg> --lng <deg>`: run one capture and submission
//! - `status`                         : show server health
//! - `insight --lat <deg> --lng <deg>`: ask the server for a location insight

use std::sync::Arc;
use std::time::Duration;

use checkin_cli::{
    CaptureFlow, CaptureOutcome, FlowSnapshot, FlowState, GeolocationHost, HostError,
    HostPosition, StaticHost,
};
use checkin_core::config::{ErrorPolicy, FlowConfig, SyncMode};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_SERVER: &str = "http://127.0.0.1:3001";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "checkin-cli", version, about = "Location check-in from the terminal")]
struct Cli {
    /// Config file; only the [flow] section is read
    #[arg(short, long, default_value = "checkin.toml")]
    config: String,

    /// Check-in server URL (also read from CHECKIN_SERVER). When given, the
    /// capture endpoint becomes <server>/api/location.
    #[arg(long, env = "CHECKIN_SERVER")]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Capture a location and submit it
    Capture {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Accuracy radius in meters
        #[arg(long, default_value_t = 20.0)]
        accuracy: f64,

        /// Simulate the host failing with this reason
        #[arg(long, value_enum)]
        fail: Option<FailReason>,

        /// Simulate an environment with no geolocation capability
        #[arg(long)]
        unsupported: bool,

        /// Delay before the host answers, in milliseconds
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,

        /// Submission target (defaults to the config, then <server>/api/location)
        #[arg(long)]
        endpoint: Option<String>,

        /// Show GRANTED immediately and write in the background
        #[arg(long)]
        background: bool,

        /// Report submission failures instead of swallowing them
        #[arg(long)]
        surface_errors: bool,
    },

    /// Show server health
    Status,

    /// Ask the server for a short insight about a point
    Insight {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FailReason {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
}

impl From<FailReason> for HostError {
    fn from(r: FailReason) -> Self {
        match r {
            FailReason::PermissionDenied => HostError::PermissionDenied,
            FailReason::PositionUnavailable => HostError::PositionUnavailable,
            FailReason::Timeout => HostError::Timeout,
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn render(snapshot: &FlowSnapshot) {
    match snapshot.state {
        FlowState::Initial => {}
        FlowState::Processing => println!("📍 Requesting your location..."),
        FlowState::Syncing => println!("🔄 Syncing your check-in..."),
        FlowState::Granted => match snapshot.point {
            Some(p) => println!(
                "✅ Checked in at {:.4}, {:.4}",
                p.latitude(),
                p.longitude()
            ),
            None => println!("✅ Checked in"),
        },
        FlowState::Denied => {
            let message = snapshot
                .failure
                .as_ref()
                .map(|f| f.message.as_str())
                .unwrap_or("Location unavailable.");
            println!("❌ {}", message);
        }
    }
}

/// `--endpoint` wins, then an explicit `--server`, then the config file.
fn apply_endpoint(config: &mut FlowConfig, endpoint: Option<String>, server: Option<&str>) {
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    } else if let Some(server) = server {
        config.endpoint = format!("{}/api/location", server.trim_end_matches('/'));
    }
}

/// `RUST_LOG` when set and valid, otherwise warnings only.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

// ============================================================================
// Subcommands
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn run_capture(
    mut config: FlowConfig,
    server: Option<&str>,
    lat: f64,
    lng: f64,
    accuracy: f64,
    fail: Option<FailReason>,
    unsupported: bool,
    delay_ms: u64,
    endpoint: Option<String>,
    background: bool,
    surface_errors: bool,
) -> anyhow::Result<bool> {
    apply_endpoint(&mut config, endpoint, server);
    if background {
        config.sync_mode = SyncMode::Background;
    }
    if surface_errors {
        config.error_policy = ErrorPolicy::Surface;
    }

    let host: Option<Arc<dyn GeolocationHost>> = if unsupported {
        None
    } else {
        let outcome = match fail {
            Some(reason) => Err(HostError::from(reason)),
            None => Ok(HostPosition {
                latitude: lat,
                longitude: lng,
                accuracy,
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            }),
        };
        let host: Arc<dyn GeolocationHost> =
            Arc::new(StaticHost::new(outcome).with_delay(Duration::from_millis(delay_ms)));
        Some(host)
    };

    let flow = CaptureFlow::from_config(host, config)?;
    let mut rx = flow.transitions();
    let renderer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(snapshot) => render(&snapshot),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let outcome = flow.request_capture().await;
    flow.drain().await;

    let stats = flow.submission_stats();
    tracing::debug!(
        succeeded = stats.succeeded(),
        failed = stats.failed(),
        "Submission stats"
    );

    // Dropping the flow closes the transition channel and ends the renderer.
    drop(flow);
    renderer.await?;

    Ok(matches!(outcome, CaptureOutcome::Granted { .. }))
}

async fn run_status(server: &str) -> anyhow::Result<bool> {
    let url = format!("{}/health", server.trim_end_matches('/'));
    let response = match reqwest::get(&url).await {
        Ok(r) => r,
        Err(e) => {
            println!("❌ Check-in server unreachable at {}: {}", server, e);
            return Ok(false);
        }
    };

    let healthy = response.status().is_success();
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    if healthy {
        println!("✅ Check-in server healthy ({})", server);
    } else {
        println!("❌ Check-in server unhealthy ({})", server);
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(healthy)
}

async fn run_insight(server: &str, lat: f64, lng: f64) -> anyhow::Result<bool> {
    let url = format!("{}/api/insight", server.trim_end_matches('/'));
    let body: serde_json::Value = reqwest::Client::new()
        .post(&url)
        .json(&serde_json::json!({ "coordinates": [lng, lat] }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    println!("{}", body["summary"].as_str().unwrap_or_default());
    println!("💡 {}", body["funFact"].as_str().unwrap_or_default());
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref()),
        )
        .with_writer(std::io::stderr)
        .init();

    let server = cli
        .server
        .clone()
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());

    let ok = match cli.command {
        Commands::Capture {
            lat,
            lng,
            accuracy,
            fail,
            unsupported,
            delay_ms,
            endpoint,
            background,
            surface_errors,
        } => {
            let config = FlowConfig::load(&cli.config)?;
            run_capture(
                config,
                cli.server.as_deref(),
                lat,
                lng,
                accuracy,
                fail,
                unsupported,
                delay_ms,
                endpoint,
                background,
                surface_errors,
            )
            .await?
        }
        Commands::Status => run_status(&server).await?,
        Commands::Insight { lat, lng } => run_insight(&server, lat, lng).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
