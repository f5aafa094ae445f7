//! Cooperative pause / resume / cancel for one pipeline run.
//!
//! A [`PipelineControl`] is a cheap clonable handle. The orchestrator calls
//! [`PipelineControl::check_point`] at stage boundaries and inside loops; the
//! controller (and through it the HTTP API) flips the pause gate or cancels.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Idle,
    Collection,
    Validation,
    Scoring,
    Trends,
    Composition,
    Delivery,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Collection => "collection",
            Stage::Validation => "validation",
            Stage::Scoring => "scoring",
            Stage::Trends => "trends",
            Stage::Composition => "composition",
            Stage::Delivery => "delivery",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by a check point once the run has been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("pipeline cancelled")]
pub struct Cancelled;

/// How a run ended early.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

struct Inner {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    stage: RwLock<Stage>,
}

#[derive(Clone)]
pub struct PipelineControl {
    inner: Arc<Inner>,
}

impl Default for PipelineControl {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PipelineControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineControl")
            .field("stage", &self.current_stage())
            .field("paused", &self.is_paused())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl PipelineControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cancel: CancellationToken::new(),
                paused,
                stage: RwLock::new(Stage::Idle),
            }),
        }
    }

    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
        tracing::info!(stage = %self.current_stage(), "pipeline paused");
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
        tracing::info!(stage = %self.current_stage(), "pipeline resumed");
    }

    /// Also releases a run blocked on the pause gate.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        tracing::info!(stage = %self.current_stage(), "pipeline cancellation requested");
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await
    }

    pub fn current_stage(&self) -> Stage {
        match self.inner.stage.read() {
            Ok(s) => *s,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_stage(&self, stage: Stage) {
        match self.inner.stage.write() {
            Ok(mut s) => *s = stage,
            Err(poisoned) => *poisoned.into_inner() = stage,
        }
    }

    /// Waits while paused; `Err(Cancelled)` once cancelled.
    pub async fn check_point(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        let mut rx = self.inner.paused.subscribe();
        loop {
            let paused = *rx.borrow_and_update();
            if !paused {
                break;
            }
            tokio::select! {
                _ = self.inner.cancel.cancelled() => return Err(Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(())
    }
}
