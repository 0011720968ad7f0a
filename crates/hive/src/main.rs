//! Hive Host
//!
//! Launches the configured mini-apps on headless contexts and keeps them
//! running until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hive_context::HeadlessFactory;
use hive::{HostConfig, LogConfig, Shell};

/// Hive mini-app host
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(about = "Hive mini-app host", long_about = None)]
struct Args {
    /// Path to the host configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Launch only this app id (repeatable)
    #[arg(short, long)]
    app: Vec<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Don't keep the idle pool topped up after navigation
    #[arg(long)]
    no_preload: bool,
}

fn main() -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(async_main())
}

fn init_tracing(log: &LogConfig, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if json || log.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    let mut config = HostConfig::load(args.config.as_deref())
        .with_context(|| match &args.config {
            Some(path) => format!("failed to load {}", path.display()),
            None => "failed to load configuration".to_string(),
        })?;

    init_tracing(&config.log, args.log_json);
    info!("Starting Hive host v{}", env!("CARGO_PKG_VERSION"));

    if args.no_preload {
        config.host.preload = false;
    }
    if config.apps.is_empty() {
        info!("No apps configured, launching the demo app");
        config.apps.push(HostConfig::demo_app());
    }

    let manifests = if args.app.is_empty() {
        config.apps.clone()
    } else {
        let mut selected = Vec::new();
        for id in &args.app {
            match config.app(id) {
                Some(manifest) => selected.push(manifest.clone()),
                None => bail!("app '{id}' is not configured"),
            }
        }
        selected
    };

    info!(
        target_idle = config.host.pool.target_idle,
        max_idle = config.host.pool.max_idle,
        preload = config.host.preload,
        policy = ?config.host.policy,
        "host settings"
    );

    let shell = Shell::new(config.host, Arc::new(HeadlessFactory::new()));
    for manifest in manifests {
        let app_id = manifest.app_id.clone();
        if let Err(e) = shell.launch(manifest).await {
            error!(app = %app_id, error = %e, "Failed to launch app");
        }
    }

    let running = shell.running();
    if running.is_empty() {
        shell.shutdown().await;
        bail!("no app could be launched");
    }
    for id in &running {
        if let Some(app) = shell.app(id) {
            match app.status().await {
                Ok(status) => info!(
                    app = %id,
                    session = %status.session,
                    pages = status.pages.len(),
                    idle = status.pool.idle,
                    "  - running"
                ),
                Err(e) => error!(app = %id, error = %e, "status unavailable"),
            }
        }
    }

    shutdown_signal().await;
    info!("Shutting down...");
    shell.shutdown().await;

    info!("Host shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
