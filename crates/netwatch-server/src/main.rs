use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use netwatch_core::NetwatchConfig;
use netwatch_monitor::MonitorExecutor;
use netwatch_results::{Notifier, ResultRecorder, ResultStore};
use netwatch_scheduler::{SchedulerEngine, SqliteScheduleStore};
use tracing::{info, warn};

mod app;
mod http;

#[derive(Debug, Parser)]
#[command(name = "netwatch", version, about = "Scheduled speed tests and packet-loss monitoring")]
struct Cli {
    /// Path to netwatch.toml (default: ~/.netwatch/netwatch.toml).
    #[arg(short, long, env = "NETWATCH_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "netwatch=info,netwatch_server=info,netwatch_scheduler=info,\
                 netwatch_monitor=info,netwatch_results=info,tower_http=info"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = NetwatchConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({e}), using defaults");
        NetwatchConfig::default()
    });
    let tz = config.scheduler.tz()?;

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    // Each subsystem gets its own connection; WAL lets them share the file.
    let jobs = Arc::new(SqliteScheduleStore::new(open_db(&db_path)?, tz)?);
    let results = Arc::new(ResultStore::new(open_db(&db_path)?)?);
    info!("database migrations complete");

    if config.database.retention_days > 0 {
        results.prune_older_than(config.database.retention_days)?;
    }

    let notifier = if config.notifications.enabled {
        info!(
            webhooks = config.notifications.webhooks.len(),
            "webhook notifications enabled"
        );
        Some(Notifier::new(config.notifications.clone())?)
    } else {
        None
    };
    let recorder = Arc::new(ResultRecorder::new(results.clone(), notifier));
    let executor = Arc::new(MonitorExecutor::from_config(&config));

    let engine = Arc::new(SchedulerEngine::new(
        jobs.clone(),
        executor,
        recorder,
        &config.scheduler,
    ));
    engine.start();

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = Arc::new(app::AppState::new(config, jobs, results, engine.clone()));
    let router = app::build_router(state);

    info!("netwatch listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, waiting for scheduler loop");
    engine.stop().await;
    Ok(())
}

fn open_db(path: &str) -> rusqlite::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), "could not create database directory: {e}");
            }
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
