//! recast-server - HTTP entry point for the Recast publishing pipeline
//!
//! Serves the cron trigger, schedule management, credential status, and
//! feed resync endpoints. `--once` runs a single publish batch without
//! binding a listener, which is handy under a plain system cron.

use clap::Parser;
use tracing::{info, warn};

use librecast::logging::{LogFormat, LoggingConfig};
use librecast::Config;
use recast_server::{router, AppState};

#[derive(Parser, Debug)]
#[command(name = "recast-server")]
#[command(version)]
#[command(about = "HTTP server for the Recast publishing pipeline")]
struct Cli {
    /// Path to the config file (default: ~/.config/recast/config.toml,
    /// overridable via RECAST_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Bind address override (e.g. 0.0.0.0:8080)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Process due posts once and exit instead of serving
    #[arg(long)]
    once: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        LoggingConfig::new(LogFormat::Text, "debug".to_string(), true).init();
    } else {
        librecast::logging::init_default();
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("no config file loaded ({}), using defaults", e);
            Config::default_config()
        }),
    };

    let state = AppState::from_config(&config).await?;

    if cli.once {
        let now = chrono::Utc::now().timestamp();
        let summary = state.worker.run_once(now).await?;
        info!(
            processed = summary.processed,
            published = summary.published,
            failed = summary.failed,
            "single publish pass complete"
        );
        return Ok(());
    }

    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("recast-server listening on {}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("recast-server stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM so in-flight requests can drain.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install ctrl-c handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
