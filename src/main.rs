//! Signal digest service: binary entrypoint.
//! Loads configuration, resolves stale runs, and serves the control API.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use signal_digest::config::AppConfig;
use signal_digest::metrics::Metrics;
use signal_digest::schedule;
use signal_digest::store::{DynStore, MemoryStore, Store};
use signal_digest::{create_router, AppState, Pipeline, PipelineController};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs, `RUST_LOG` overrides the default filter. `try_init` leaves a
/// subscriber the host runtime already installed in place.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("signal_digest=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load()?;

    let store = match &cfg.runtime.state_path {
        Some(path) => MemoryStore::open(path)?,
        None => MemoryStore::new(),
    };
    let stale = store
        .fail_stale_runs("interrupted by restart")
        .await
        .context("resolving stale runs")?;
    if stale > 0 {
        tracing::warn!(runs = stale, "stale running runs marked failed");
        store.flush().await?;
    }
    let store: DynStore = Arc::new(store);

    let pipeline = Pipeline::from_config(&cfg, store)?;
    let controller = PipelineController::new(pipeline);
    let metrics = Metrics::init()?;

    match cfg.schedule {
        Some(slot) => {
            schedule::spawn_weekly(controller.clone(), slot);
        }
        None => tracing::info!("weekly scheduler disabled"),
    }

    let router = create_router(AppState::new(controller)).merge(metrics.router());
    tracing::info!(
        delivery = ?cfg.runtime.delivery_mode,
        ai_enabled = cfg.ai.enabled,
        "signal digest service ready"
    );

    Ok(router.into())
}
