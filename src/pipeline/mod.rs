//! Stage orchestrator.
//!
//! `collection -> validation -> scoring -> trends -> composition -> delivery`,
//! with a check point at every stage boundary and inside every per-item loop.
//! Each run records exactly one [`PipelineRun`] and leaves the control handle
//! at [`Stage::Idle`] however it ends.

pub mod collaborators;
pub mod control;
pub mod controller;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

pub use collaborators::{
    Collector, ComposedDigest, Composer, Deliverer, DeliveryReceipt, Validation, Validator,
    VerificationLevel,
};
pub use control::{Cancelled, PipelineControl, RunError, Stage};
pub use controller::{ControlError, ControllerStatus, PipelineController, StartError};

use crate::analyze::ai_adapter::{build_backend, DynBackend, RemoteAnalyst};
use crate::analyze::{Analysis, ScoringEngine};
use crate::collect::{JsonFileCollector, SingleSourceValidator};
use crate::compose::{save_digest_html, HtmlDigestComposer};
use crate::config::{AiConfig, AppConfig, Catalog, Recipient, ScoringConfig};
use crate::metrics;
use crate::signal::{Signal, SignalStatus};
use crate::store::{DynStore, PipelineRun, RunCounts, RunStatus, UpsertOutcome};
use crate::trends::{TrendAggregator, TrendUpdate};

/// Everything a run needs. Cheap to clone; the controller shares one per process.
#[derive(Clone)]
pub struct Pipeline {
    pub store: DynStore,
    pub catalog: Arc<Catalog>,
    pub scoring: ScoringConfig,
    pub ai: AiConfig,
    pub backend: DynBackend,
    pub collector: Arc<dyn Collector>,
    pub validator: Arc<dyn Validator>,
    pub composer: Arc<dyn Composer>,
    pub deliverer: Arc<dyn Deliverer>,
    pub recipients: Vec<Recipient>,
    pub digest_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: PipelineRun,
    pub trends: Option<TrendUpdate>,
    pub digest_subject: Option<String>,
    pub digest_path: Option<PathBuf>,
    pub deliveries: Vec<DeliveryReceipt>,
}

#[derive(Default)]
struct Progress {
    counts: RunCounts,
    trends: Option<TrendUpdate>,
    digest_subject: Option<String>,
    digest_path: Option<PathBuf>,
    deliveries: Vec<DeliveryReceipt>,
}

impl Pipeline {
    /// Default collaborators for the configured environment.
    pub fn from_config(cfg: &AppConfig, store: DynStore) -> Result<Self> {
        let backend = build_backend(&cfg.ai, &cfg.catalog)?;
        let deliverer = crate::notify::deliverer_for(&cfg.runtime)?;
        Ok(Self {
            store,
            catalog: Arc::new(cfg.catalog.clone()),
            scoring: cfg.scoring.clone(),
            ai: cfg.ai.clone(),
            backend,
            collector: Arc::new(JsonFileCollector::new(&cfg.runtime.seed_signals_path)),
            validator: Arc::new(SingleSourceValidator),
            composer: Arc::new(HtmlDigestComposer::default()),
            deliverer,
            recipients: cfg.recipients.clone(),
            digest_dir: cfg.runtime.digest_dir.clone(),
        })
    }

    /// Drive one full run. Errors only when the run record itself cannot be
    /// created or finalized; stage failures end up in the record.
    pub async fn run(&self, control: &PipelineControl, run_type: &str) -> Result<RunReport> {
        let run = self.store.start_run(run_type).await?;
        tracing::info!(run_id = run.id, run_type, "pipeline run started");

        let mut progress = Progress::default();
        let outcome = self.drive(control, &mut progress).await;
        control.set_stage(Stage::Idle);

        let (status, error) = match &outcome {
            Ok(()) => (RunStatus::Completed, None),
            Err(RunError::Cancelled(_)) => {
                tracing::warn!(run_id = run.id, "pipeline cancelled");
                (RunStatus::Cancelled, Some("cancelled by user".to_string()))
            }
            Err(RunError::Failed(e)) => {
                tracing::error!(run_id = run.id, error = %format!("{e:#}"), "pipeline failed");
                (RunStatus::Failed, Some(format!("{e:#}")))
            }
        };

        let finished = self
            .store
            .finish_run(run.id, status, progress.counts, error)
            .await;
        metrics::record_run_finished(status);
        if let Err(e) = self.store.flush().await {
            tracing::warn!(error = %format!("{e:#}"), "store flush after run failed");
        }
        let run = finished?;
        tracing::info!(
            run_id = run.id,
            status = status.as_str(),
            collected = run.signals_collected,
            validated = run.signals_validated,
            scored = run.signals_scored,
            "pipeline run finished"
        );

        Ok(RunReport {
            run,
            trends: progress.trends,
            digest_subject: progress.digest_subject,
            digest_path: progress.digest_path,
            deliveries: progress.deliveries,
        })
    }

    async fn drive(&self, control: &PipelineControl, p: &mut Progress) -> Result<(), RunError> {
        control.set_stage(Stage::Collection);
        control.check_point().await?;
        p.counts.collected = self.collect_stage().await?;
        control.check_point().await?;

        control.set_stage(Stage::Validation);
        p.counts.validated = self.validate_stage(control).await?;
        control.check_point().await?;

        control.set_stage(Stage::Scoring);
        let digest = self.score_stage(control).await?;
        control.check_point().await?;
        if digest.is_empty() {
            tracing::warn!("no signals above threshold for digest");
            return Ok(());
        }
        p.counts.scored = digest.len();

        control.set_stage(Stage::Trends);
        let aggregator = TrendAggregator::new(self.store.clone(), self.catalog.clone());
        let update = aggregator
            .update_trends(&digest, Utc::now())
            .await
            .context("updating trends")?;
        let notable = update.notable.clone();
        p.trends = Some(update);
        control.check_point().await?;

        control.set_stage(Stage::Composition);
        let composed = self
            .composer
            .compose(&digest, &notable, &self.catalog, Utc::now())
            .context("composing digest")?;
        p.digest_path = Some(save_digest_html(&self.digest_dir, &composed).await?);
        p.digest_subject = Some(composed.subject.clone());
        control.check_point().await?;

        control.set_stage(Stage::Delivery);
        self.deliver_stage(control, &composed, p).await?;

        if p.deliveries.iter().any(|r| r.delivered) {
            for (signal, _) in &digest {
                self.store
                    .set_signal_status(signal.id, SignalStatus::Published)
                    .await?;
            }
        }
        Ok(())
    }

    async fn collect_stage(&self) -> Result<usize> {
        let items = self
            .collector
            .collect()
            .await
            .with_context(|| format!("collector {}", self.collector.name()))?;
        let (mut inserted, mut requeued) = (0usize, 0usize);
        for item in items {
            match self.store.upsert_signal(item.normalized()).await? {
                UpsertOutcome::Inserted(_) => inserted += 1,
                UpsertOutcome::Requeued(_) => requeued += 1,
            }
        }
        tracing::info!(inserted, requeued, "collection finished");
        Ok(inserted + requeued)
    }

    async fn validate_stage(&self, control: &PipelineControl) -> Result<usize, RunError> {
        let pending = self.store.signals_by_status(SignalStatus::New).await?;
        let mut validated = 0;
        for signal in &pending {
            control.check_point().await?;
            let v = self.validator.validate(signal).await?;
            tracing::debug!(
                signal_id = signal.id,
                level = ?v.level,
                sources = v.source_count,
                "signal validated"
            );
            self.store
                .set_signal_status(signal.id, SignalStatus::Validated)
                .await?;
            validated += 1;
        }
        tracing::info!(validated, "validation finished");
        Ok(validated)
    }

    /// Score every validated signal batch by batch and return the digest set:
    /// threshold survivors ranked by composite, capped.
    async fn score_stage(&self, control: &PipelineControl) -> Result<Vec<(Signal, Analysis)>, RunError> {
        let pending = self.store.signals_by_status(SignalStatus::Validated).await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let engine = ScoringEngine::new(
            self.catalog.clone(),
            self.scoring.dimensions.clone(),
            RemoteAnalyst::new(self.backend.clone(), &self.ai),
        );
        if engine.remote_available() {
            tracing::info!(backend = engine.backend_name(), "remote scoring available");
        } else {
            tracing::warn!("remote scoring unavailable, heuristic only");
        }

        let threshold = self.scoring.thresholds.include_in_digest;
        let mut survivors = Vec::new();
        let mut remote = 0usize;
        for (n, batch) in pending.chunks(self.ai.batch_size.max(1)).enumerate() {
            control.check_point().await?;
            let analyses = tokio::select! {
                biased;
                _ = control.cancelled() => return Err(Cancelled.into()),
                a = engine.score_batch(batch) => a,
            };
            // A pause or cancel that arrived mid-batch holds or drops the results.
            control.check_point().await?;

            for (signal, analysis) in batch.iter().zip(analyses) {
                self.store.commit_analysis(&analysis).await?;
                if analysis.analysis_method != crate::analyze::AnalysisMethod::Heuristic {
                    remote += 1;
                }
                if analysis.composite >= threshold {
                    let mut signal = signal.clone();
                    signal.status = SignalStatus::Scored;
                    survivors.push((signal, analysis));
                } else {
                    tracing::debug!(
                        composite = analysis.composite,
                        threshold,
                        title = %signal.short_title(),
                        "signal below threshold"
                    );
                }
            }
            self.store.flush().await?;
            tracing::debug!(batch = n, size = batch.len(), "scoring batch committed");
        }

        survivors.sort_by(|a, b| {
            b.1.composite
                .partial_cmp(&a.1.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let cap = self.scoring.thresholds.max_signals_per_digest;
        if survivors.len() > cap {
            tracing::info!(from = survivors.len(), to = cap, "capping digest");
            survivors.truncate(cap);
        }
        tracing::info!(
            scored = pending.len(),
            remote,
            heuristic = pending.len() - remote,
            in_digest = survivors.len(),
            "scoring finished"
        );
        Ok(survivors)
    }

    async fn deliver_stage(
        &self,
        control: &PipelineControl,
        digest: &ComposedDigest,
        p: &mut Progress,
    ) -> Result<(), RunError> {
        for recipient in self.recipients.iter().filter(|r| r.active) {
            control.check_point().await?;
            let receipt = match self.deliverer.deliver(digest, recipient).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(to = %recipient.email, error = %format!("{e:#}"), "delivery failed");
                    DeliveryReceipt::failed(recipient, format!("{e:#}"))
                }
            };
            p.deliveries.push(receipt);
        }
        let sent = p.deliveries.iter().filter(|r| r.delivered).count();
        tracing::info!(
            sent,
            total = p.deliveries.len(),
            via = self.deliverer.name(),
            "delivery finished"
        );
        Ok(())
    }
}
