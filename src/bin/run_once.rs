//! Run the pipeline once as a scheduled run and exit.
//!
//! `--dry-run` keeps state in memory and writes deliveries to the outbox
//! instead of sending them. Exits non-zero unless the run completed.

use std::process::ExitCode;
use std::sync::Arc;

use signal_digest::config::{AppConfig, DeliveryMode};
use signal_digest::schedule::SCHEDULED_RUN_TYPE;
use signal_digest::store::{DynStore, MemoryStore, RunStatus};
use signal_digest::{Pipeline, PipelineControl};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let dry_run = std::env::args().skip(1).any(|a| a == "--dry-run");
    match run(dry_run).await {
        Ok(RunStatus::Completed) => ExitCode::SUCCESS,
        Ok(status) => {
            eprintln!("run finished as {}", status.as_str());
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("run-once failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(dry_run: bool) -> anyhow::Result<RunStatus> {
    let mut cfg = AppConfig::load()?;
    if dry_run {
        cfg.runtime.delivery_mode = DeliveryMode::Mock;
        cfg.runtime.state_path = None;
        tracing::info!("dry run: mock delivery, in-memory state");
    }

    let store = match &cfg.runtime.state_path {
        Some(path) => MemoryStore::open(path)?,
        None => MemoryStore::new(),
    };
    let store: DynStore = Arc::new(store);
    let pipeline = Pipeline::from_config(&cfg, store)?;

    let report = pipeline
        .run(&PipelineControl::new(), SCHEDULED_RUN_TYPE)
        .await?;
    println!(
        "run {} {}: {} collected, {} scored, {} deliveries",
        report.run.id,
        report.run.status.as_str(),
        report.run.signals_collected,
        report.run.signals_scored,
        report.deliveries.len()
    );
    Ok(report.run.status)
}
