//! reel-wu (Work Unit correlation) - Groups recorded agent sessions
//! into work units
//!
//! Serves the work unit HTTP API for the session viewer. Correlation
//! runs on demand via POST /work-units/recompute.

use anyhow::Result;
use clap::Parser;
use reel_common::config::{database_path, ensure_root_folder, resolve_root_folder, DEFAULT_WU_PORT};
use reel_common::db::init_database;
use reel_wu::correlation::CorrelationConfig;
use reel_wu::{build_router, AppState};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "reel-wu", about = "Reel work unit correlation service")]
struct Args {
    /// Root folder holding reel.db (overrides REEL_ROOT_FOLDER and config file)
    #[arg(long)]
    root_folder: Option<String>,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_WU_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!(
        "Starting Reel Work Unit service (reel-wu) v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();

    let root_folder = resolve_root_folder(args.root_folder.as_deref())?;
    ensure_root_folder(&root_folder)?;
    let db_path = database_path(&root_folder);
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path).await?;
    info!("Database initialized");

    let config = CorrelationConfig::load(&pool).await?;
    info!(
        high = config.high_threshold,
        medium = config.medium_threshold,
        horizon_seconds = config.time_horizon_seconds,
        "Loaded correlation tunables"
    );

    let state = AppState::new(pool, config);
    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("reel-wu listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
