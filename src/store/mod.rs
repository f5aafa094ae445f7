//! Persistence contract for the pipeline.
//!
//! The engine behind it is not part of the core: [`MemoryStore`] (optionally
//! mirrored to a JSON file) is the bundled implementation. Every method that
//! writes more than one record does so as one atomic unit:
//! - `commit_analysis`: analysis + category rows + signal status
//! - `commit_trend`: trend + its weekly snapshot
//! - `finish_run`: terminal status + counts, exactly once per run

pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyze::Analysis;
use crate::signal::{CollectedSignal, Signal, SignalStatus};

pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub collected: usize,
    pub validated: usize,
    pub scored: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: i64,
    pub run_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub signals_collected: usize,
    pub signals_validated: usize,
    pub signals_scored: usize,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Momentum {
    New,
    Spike,
    Rising,
    Stable,
    Declining,
}

impl Momentum {
    pub fn as_str(&self) -> &'static str {
        match self {
            Momentum::New => "new",
            Momentum::Spike => "spike",
            Momentum::Rising => "rising",
            Momentum::Stable => "stable",
            Momentum::Declining => "declining",
        }
    }

    /// Display order for summaries: spike first, declining last.
    pub fn rank(&self) -> u8 {
        match self {
            Momentum::Spike => 1,
            Momentum::Rising => 2,
            Momentum::New => 3,
            Momentum::Stable => 4,
            Momentum::Declining => 5,
        }
    }

    pub fn is_notable(&self) -> bool {
        matches!(self, Momentum::New | Momentum::Spike | Momentum::Rising)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendType {
    CategorySignalType,
    SignalType,
    Category,
    Competitor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub key: String,
    pub trend_type: TrendType,
    pub label: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Cumulative over all runs.
    pub occurrence_count: u64,
    /// Contribution of the most recent run; the baseline for the next momentum.
    pub last_run_count: u64,
    pub avg_score: f64,
    pub max_score: f64,
    pub momentum: Momentum,
    pub week_over_week_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub trend_key: String,
    pub week: u32,
    pub year: i32,
    pub signal_count: u64,
    pub avg_score: f64,
    pub top_signal_id: Option<i64>,
    pub recorded_at: DateTime<Utc>,
}

/// Result of offering a collected signal to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    /// Already known by `external_id`; status reset to `new` for rescoring.
    Requeued(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Requeued(id) => *id,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert by `external_id`, or reset an existing row to `new`.
    async fn upsert_signal(&self, signal: CollectedSignal) -> Result<UpsertOutcome>;
    async fn signal(&self, id: i64) -> Result<Option<Signal>>;
    /// Ordered by id.
    async fn signals_by_status(&self, status: SignalStatus) -> Result<Vec<Signal>>;
    async fn set_signal_status(&self, id: i64, status: SignalStatus) -> Result<()>;

    /// Replace the signal's analysis and category rows and mark it scored.
    async fn commit_analysis(&self, analysis: &Analysis) -> Result<()>;
    async fn analysis_for(&self, signal_id: i64) -> Result<Option<Analysis>>;
    /// Signal ids associated with a category through committed analyses.
    async fn signals_in_category(&self, category_id: &str) -> Result<Vec<i64>>;

    async fn trend(&self, key: &str) -> Result<Option<Trend>>;
    /// Write the trend and upsert its (week, year) snapshot together.
    async fn commit_trend(&self, trend: &Trend, snapshot: &TrendSnapshot) -> Result<()>;
    /// Overwrite a trend without touching its snapshots.
    async fn save_trend(&self, trend: &Trend) -> Result<()>;
    async fn trends(&self) -> Result<Vec<Trend>>;
    /// Oldest first.
    async fn snapshots_for(&self, key: &str) -> Result<Vec<TrendSnapshot>>;

    async fn start_run(&self, run_type: &str) -> Result<PipelineRun>;
    /// Fails if the run is unknown or already final.
    async fn finish_run(
        &self,
        id: i64,
        status: RunStatus,
        counts: RunCounts,
        error_message: Option<String>,
    ) -> Result<PipelineRun>;
    /// Newest first.
    async fn runs(&self, limit: usize) -> Result<Vec<PipelineRun>>;
    /// Resolve every `running` record to `failed`; returns how many.
    async fn fail_stale_runs(&self, reason: &str) -> Result<usize>;

    /// Make committed state durable (no-op for pure in-memory stores).
    async fn flush(&self) -> Result<()>;
}

pub type DynStore = Arc<dyn Store>;
