use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::analyze::AnalysisMethod;
use crate::store::RunStatus;

pub const SIGNALS_SCORED: &str = "signals_scored_total";
pub const SCORING_FALLBACKS: &str = "scoring_fallbacks_total";
pub const BATCH_DEMOTIONS: &str = "batch_demotions_total";
pub const PIPELINE_RUNS: &str = "pipeline_runs_total";
pub const PIPELINE_LAST_RUN_TS: &str = "pipeline_last_run_ts";
pub const TRENDS_UPDATED: &str = "trends_updated_total";
pub const SCHEDULED_RUNS: &str = "scheduled_runs_total";
pub const SCHEDULER_NEXT_RUN_TS: &str = "scheduler_next_run_ts";

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe every series once.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        describe_counter!(SIGNALS_SCORED, "Signals scored, by analysis method");
        describe_counter!(
            SCORING_FALLBACKS,
            "Remote scoring attempts that fell back to the heuristic, by reason"
        );
        describe_counter!(
            BATCH_DEMOTIONS,
            "Remote batches discarded and rescored per signal, by reason"
        );
        describe_counter!(PIPELINE_RUNS, "Finished pipeline runs, by terminal status");
        describe_counter!(TRENDS_UPDATED, "Trend keys updated by pipeline runs");
        describe_gauge!(PIPELINE_LAST_RUN_TS, "Unix time of the last finished run");
        describe_counter!(SCHEDULED_RUNS, "Weekly scheduler slots, by outcome (started/skipped)");
        describe_gauge!(SCHEDULER_NEXT_RUN_TS, "Unix time of the next scheduled run");

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

// Recording helpers are no-ops until a recorder is installed (tests).

pub fn record_scored(method: AnalysisMethod) {
    counter!(SIGNALS_SCORED, "method" => method.as_str()).increment(1);
}

pub fn record_fallback(reason: &'static str) {
    counter!(SCORING_FALLBACKS, "reason" => reason).increment(1);
}

pub fn record_batch_demotion(reason: &'static str) {
    counter!(BATCH_DEMOTIONS, "reason" => reason).increment(1);
}

pub fn record_trends_updated(n: usize) {
    counter!(TRENDS_UPDATED).increment(n as u64);
}

pub fn record_run_finished(status: RunStatus) {
    counter!(PIPELINE_RUNS, "status" => status.as_str()).increment(1);
    gauge!(PIPELINE_LAST_RUN_TS).set(chrono::Utc::now().timestamp() as f64);
}
