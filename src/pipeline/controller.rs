//! Owns at most one active run and its control handle.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;

use super::{Pipeline, PipelineControl, RunReport, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("a pipeline run is already active")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("no pipeline run is active")]
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub running: bool,
    pub run_type: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub stage: Stage,
    pub paused: bool,
    pub cancel_requested: bool,
}

struct ActiveRun {
    control: PipelineControl,
    run_type: String,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct Shared {
    active: Mutex<Option<ActiveRun>>,
    last_report: Mutex<Option<RunReport>>,
    idle: Notify,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct PipelineController {
    pipeline: Arc<Pipeline>,
    shared: Arc<Shared>,
}

impl PipelineController {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Spawn a run on the tokio runtime. Rejected, never queued, while another
    /// run is active.
    pub fn start(&self, run_type: &str) -> Result<PipelineControl, StartError> {
        let control = {
            let mut active = lock(&self.shared.active);
            if active.is_some() {
                return Err(StartError::AlreadyRunning);
            }
            let control = PipelineControl::new();
            *active = Some(ActiveRun {
                control: control.clone(),
                run_type: run_type.to_string(),
                started_at: Utc::now(),
            });
            control
        };
        tracing::info!(run_type, "pipeline run requested");

        let pipeline = self.pipeline.clone();
        let shared = self.shared.clone();
        let run_control = control.clone();
        let run_type = run_type.to_string();
        tokio::spawn(async move {
            let task = {
                let pipeline = pipeline.clone();
                tokio::spawn(async move { pipeline.run(&run_control, &run_type).await })
            };
            match task.await {
                Ok(Ok(report)) => *lock(&shared.last_report) = Some(report),
                Ok(Err(e)) => {
                    tracing::error!(error = %format!("{e:#}"), "pipeline run could not be recorded");
                }
                Err(join) => {
                    tracing::error!(error = %join, "pipeline run task aborted");
                    let reason = format!("run task aborted: {join}");
                    match pipeline.store.fail_stale_runs(&reason).await {
                        Ok(n) => tracing::warn!(runs = n, "aborted run marked failed"),
                        Err(e) => tracing::error!(error = %format!("{e:#}"), "could not mark aborted run"),
                    }
                    if let Err(e) = pipeline.store.flush().await {
                        tracing::warn!(error = %format!("{e:#}"), "store flush failed");
                    }
                }
            }
            *lock(&shared.active) = None;
            shared.idle.notify_waiters();
        });

        Ok(control)
    }

    fn with_active<R>(&self, f: impl FnOnce(&ActiveRun) -> R) -> Result<R, ControlError> {
        lock(&self.shared.active)
            .as_ref()
            .map(f)
            .ok_or(ControlError::NotRunning)
    }

    pub fn pause(&self) -> Result<(), ControlError> {
        self.with_active(|a| a.control.pause())
    }

    pub fn resume(&self) -> Result<(), ControlError> {
        self.with_active(|a| a.control.resume())
    }

    pub fn cancel(&self) -> Result<(), ControlError> {
        self.with_active(|a| a.control.cancel())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.active).is_some()
    }

    pub fn status(&self) -> ControllerStatus {
        match &*lock(&self.shared.active) {
            Some(a) => ControllerStatus {
                running: true,
                run_type: Some(a.run_type.clone()),
                started_at: Some(a.started_at),
                stage: a.control.current_stage(),
                paused: a.control.is_paused(),
                cancel_requested: a.control.is_cancelled(),
            },
            None => ControllerStatus {
                running: false,
                run_type: None,
                started_at: None,
                stage: Stage::Idle,
                paused: false,
                cancel_requested: false,
            },
        }
    }

    pub fn last_report(&self) -> Option<RunReport> {
        lock(&self.shared.last_report).clone()
    }

    /// Resolves once no run is active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}
