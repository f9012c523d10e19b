//! rollcall-ar (Attendance Reconciliation) - Main entry point
//!
//! Serves the scan ingestion and administration API and runs the nightly
//! reconciliation scheduler until shut down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rollcall_ar::config::AttendanceSettings;
use rollcall_ar::directory::SqliteDirectory;
use rollcall_ar::reconcile::ReconciliationScheduler;
use rollcall_ar::{build_router, AppState};
use rollcall_common::config::{database_path, resolve_root_folder, TomlConfig};
use rollcall_common::db::init_database;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for rollcall-ar
#[derive(Parser, Debug)]
#[command(name = "rollcall-ar")]
#[command(about = "Attendance ingestion and nightly reconciliation service")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Bootstrap TOML config file
    #[arg(short, long, env = "ROLLCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides TOML)
    #[arg(short, long, env = "ROLLCALL_AR_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides TOML)
    #[arg(long, env = "ROLLCALL_AR_HOST")]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = TomlConfig::load_or_default(args.config.as_deref());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("rollcall_ar={0},rollcall_common={0},tower_http=info", toml_config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting Rollcall Attendance Reconciliation (rollcall-ar) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // Config was read before the subscriber existed; report what was used
    info!(
        host = %toml_config.host,
        port = toml_config.port,
        log_level = %toml_config.logging.level,
        "Bootstrap configuration"
    );

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let db_path = database_path(&root_folder, &toml_config);
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let settings = AttendanceSettings::from_database(&pool)
        .await
        .context("Invalid attendance settings")?;

    let directory = Arc::new(SqliteDirectory::new(pool.clone()));
    let state = AppState::new(pool, directory, settings);

    let cancel = CancellationToken::new();
    let scheduler = ReconciliationScheduler::new(state.reconciler.clone()).spawn(cancel.clone());

    let app = build_router(state);

    let host = args.host.unwrap_or(toml_config.host.clone());
    let port = args.port.unwrap_or(toml_config.port);
    let addr = format!("{}:{}", host, port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("rollcall-ar listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Err(e) = scheduler.await {
        error!("Scheduler task ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels background tasks
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    cancel.cancel();
}
