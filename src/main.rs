use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use request_observatory::config::AppConfig;
use request_observatory::context::{SharedContext, SharedUser};
use request_observatory::interceptor;
use request_observatory::monitor::Monitor;
use request_observatory::{server, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal observatory error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    // ── 1. Configuration ─────────────────────────────────────────
    let config = AppConfig::load().context("load configuration")?;
    let normalizer = Arc::new(config.normalizer().context("parse backend map")?);

    // ── 2. Metrics pipeline ──────────────────────────────────────
    let context = Arc::new(SharedContext::new());
    let user = Arc::new(SharedUser::new());
    let (monitor, _aggregator) =
        Monitor::start_with_user(config.monitor.clone(), context.clone(), user.clone())
            .context("start metrics monitor")?;

    // ── 3. Wrap the process-wide entry point ─────────────────────
    let entry = interceptor::global();
    entry.install(&monitor);

    // ── 4. Shared state + router ─────────────────────────────────
    let state = Arc::new(AppState::new(
        monitor,
        context,
        user,
        entry,
        normalizer,
        config.probe_targets.clone(),
    ));
    let app = server::create_router(state);

    // ── 5. Bind & serve ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("bind {}", config.listen_addr))?;

    info!(addr = %config.listen_addr, "query API listening");
    info!(targets = config.probe_targets.len(), "probe targets configured");

    axum::serve(listener, app)
        .await
        .context("server exited with error")?;

    entry.uninstall();
    Ok(())
}
