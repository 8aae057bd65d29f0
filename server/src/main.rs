//! Plant Doctor prediction server
//!
//! Loads a checkpoint once at startup and serves `POST /predict`.

mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use plant_doctor::utils::logging::{init_logging, LogConfig, LogLevel};
use tracing::info;

use crate::state::{AppState, ServerConfig};

/// Plant Doctor prediction server
#[derive(Parser, Debug)]
#[command(name = "plant_doctor_server")]
#[command(version)]
#[command(about = "HTTP prediction service for the plant disease classifier")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "5000", env = "PLANT_DOCTOR_PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "PLANT_DOCTOR_HOST")]
    host: String,

    /// Checkpoint bundle to serve
    #[arg(
        short,
        long,
        default_value = "model/model.pt",
        env = "PLANT_DOCTOR_CHECKPOINT"
    )]
    checkpoint: PathBuf,

    /// JSON file mapping labels to advice lists
    #[arg(long, env = "PLANT_DOCTOR_ADVICE")]
    advice: Option<PathBuf>,

    /// Serve random predictions without loading model weights
    #[arg(long)]
    stub: bool,

    /// Run on the CPU even when a GPU is available
    #[arg(long)]
    cpu: bool,

    /// Maximum upload size in bytes
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    body_limit: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PLANT_DOCTOR_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig {
        level: LogLevel::parse(&cli.log_level),
        ..LogConfig::production()
    })?;

    let config = ServerConfig {
        checkpoint: cli.checkpoint,
        advice: cli.advice,
        stub: cli.stub,
        force_cpu: cli.cpu,
        body_limit: cli.body_limit,
    };

    info!("Plant Doctor server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Checkpoint: {:?}", config.checkpoint);
    info!("  Advice:     {:?}", config.advice);
    info!("  Stub mode:  {}", config.stub);

    // Model loading is blocking work
    let state = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || AppState::from_config(&config)).await??
    };
    let app = routes::router(Arc::new(state), config.body_limit);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
