//! Waterfall SFU process entry point.
//!
//! Loads configuration, wires the Matrix signaling adapter to the Router,
//! and runs until `SIGINT`/`SIGTERM` or the signaling transport gives out.
//! Exits 0 on clean shutdown, non-zero on config-load or signaling failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use waterfall_common::config::{self, AppConfig};
use waterfall_signaling::MatrixSignalingAdapter;
use waterfall_sfu::{Router, RouterStats};

/// How often the health-summary line is logged.
const HEALTH_SUMMARY_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "waterfall", about = "Cascadable WebRTC SFU for group calls")]
struct Cli {
    /// Path to the YAML configuration file. Falls back to the
    /// WATERFALL_CONFIG environment variable (a path, or inline YAML) when
    /// absent.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match config::init(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("waterfall: failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        homeserver = %config.matrix.homeserver_url,
        "starting waterfall"
    );

    let adapter = Arc::new(MatrixSignalingAdapter::new(
        config.matrix.homeserver_url.clone(),
        config.matrix.access_token.clone(),
    ));
    let keep_alive_timeout = Duration::from_secs(config.conference.keep_alive_timeout);
    let router = Router::new(adapter, keep_alive_timeout);

    tokio::spawn(log_health_summary(router.clone()));

    tokio::select! {
        () = run_router(router) => {
            tracing::error!("signaling transport ended, exiting");
            std::process::exit(1);
        }
        () = wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received, exiting");
        }
    }

    Ok(())
}

async fn run_router(router: Arc<Router>) {
    router.run().await;
}

async fn log_health_summary(router: Arc<Router>) {
    let mut ticker = tokio::time::interval(HEALTH_SUMMARY_INTERVAL);
    loop {
        ticker.tick().await;
        let RouterStats { active_conferences, total_participants } = router.stats();
        tracing::info!(active_conferences, total_participants, "health summary");
    }
}

/// Waits for either `SIGINT` (Ctrl+C) or `SIGTERM`, whichever comes first.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing(config: &AppConfig) {
    let level = config.log.as_tracing_level();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("waterfall={level}"))),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}
