// tests/pipeline_control.rs
//
// Cooperative pause / resume / cancel, both on a bare control handle and
// through the controller that owns the active run.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use signal_digest::config::Recipient;
use signal_digest::pipeline::{
    Collector, ComposedDigest, ControlError, Deliverer, DeliveryReceipt, PipelineControl,
    PipelineController, Stage, StartError,
};
use signal_digest::signal::{CollectedSignal, SignalStatus};
use signal_digest::store::RunStatus;

use common::{ai_config, collected, pipeline, pipeline_with, remote_json, GatedBackend};

fn items(n: usize) -> Vec<CollectedSignal> {
    (1..=n)
        .map(|i| collected(i, &format!("Robot sensor story {i}"), ""))
        .collect()
}

async fn wait_for_stage(control: &PipelineControl, stage: Stage) {
    for _ in 0..200 {
        if control.current_stage() == stage {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("never reached stage {stage}");
}

#[tokio::test]
async fn cancel_during_scoring_batch_keeps_earlier_batches_only() {
    let dir = tempfile::tempdir().unwrap();
    let first_batch = json!([
        remote_json("robotics", "technology-trend", 7),
        remote_json("industrial-sensors", "market-shift", 6),
    ]);
    let backend = Arc::new(GatedBackend::new(vec![first_batch.to_string()]));
    let fx = pipeline_with(items(4), dir.path(), backend.clone(), ai_config(2));
    let control = PipelineControl::new();

    let run = {
        let p = fx.pipeline.clone();
        let c = control.clone();
        tokio::spawn(async move { p.run(&c, "full").await })
    };

    // Second batch is now parked inside the backend.
    tokio::time::timeout(Duration::from_secs(5), backend.entered.notified())
        .await
        .expect("second batch dispatched");
    assert_eq!(control.current_stage(), Stage::Scoring);
    control.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run ended")
        .expect("join")
        .expect("run recorded");
    assert_eq!(report.run.status, RunStatus::Cancelled);
    assert_eq!(report.run.error_message.as_deref(), Some("cancelled by user"));
    assert!(report.trends.is_none());
    assert_eq!(control.current_stage(), Stage::Idle);

    for id in [1, 2] {
        let a = fx.store.analysis_for(id).await.unwrap();
        assert!(a.is_some(), "signal {id} from the finished batch is kept");
        let s = fx.store.signal(id).await.unwrap().unwrap();
        assert_eq!(s.status, SignalStatus::Scored);
    }
    for id in [3, 4] {
        assert!(fx.store.analysis_for(id).await.unwrap().is_none());
        let s = fx.store.signal(id).await.unwrap().unwrap();
        assert_eq!(s.status, SignalStatus::Validated);
    }
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn paused_run_waits_then_finishes_after_resume() {
    let dir = tempfile::tempdir().unwrap();
    let fx = pipeline(items(2), dir.path());
    let control = PipelineControl::new();
    control.pause();

    let run = {
        let p = fx.pipeline.clone();
        let c = control.clone();
        tokio::spawn(async move { p.run(&c, "full").await })
    };
    wait_for_stage(&control, Stage::Collection).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!run.is_finished(), "held at the first check point");
    assert!(fx.store.signals_by_status(SignalStatus::New).await.unwrap().is_empty());

    control.resume();
    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run ended")
        .expect("join")
        .expect("run recorded");
    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(report.run.signals_collected, 2);
}

#[tokio::test]
async fn cancel_releases_a_paused_run() {
    let dir = tempfile::tempdir().unwrap();
    let fx = pipeline(items(2), dir.path());
    let control = PipelineControl::new();
    control.pause();

    let run = {
        let p = fx.pipeline.clone();
        let c = control.clone();
        tokio::spawn(async move { p.run(&c, "full").await })
    };
    wait_for_stage(&control, Stage::Collection).await;
    control.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run ended")
        .expect("join")
        .expect("run recorded");
    assert_eq!(report.run.status, RunStatus::Cancelled);
    assert_eq!(report.run.signals_collected, 0);
    let runs = fx.store.runs(5).await.unwrap();
    assert_eq!(runs[0].status, RunStatus::Cancelled);
}

#[tokio::test]
async fn controller_rejects_second_start_and_idle_controls() {
    let dir = tempfile::tempdir().unwrap();
    let fx = pipeline(items(3), dir.path());
    let controller = PipelineController::new(fx.pipeline.clone());

    assert_eq!(controller.pause(), Err(ControlError::NotRunning));
    assert_eq!(controller.cancel(), Err(ControlError::NotRunning));
    assert!(!controller.status().running);

    let control = controller.start("full").unwrap();
    control.pause();
    assert_eq!(controller.start("full").err(), Some(StartError::AlreadyRunning));
    let status = controller.status();
    assert!(status.running);
    assert!(status.paused);
    assert_eq!(status.run_type.as_deref(), Some("full"));

    controller.resume().unwrap();
    tokio::time::timeout(Duration::from_secs(5), controller.wait_idle())
        .await
        .expect("run finished");

    let report = controller.last_report().expect("report kept");
    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(controller.status().stage, Stage::Idle);
    assert!(controller.start("full").is_ok(), "idle again");
    controller.wait_idle().await;
}

#[tokio::test]
async fn controller_cancel_ends_active_run() {
    let dir = tempfile::tempdir().unwrap();
    let fx = pipeline(items(3), dir.path());
    let controller = PipelineController::new(fx.pipeline.clone());

    let control = controller.start("manual").unwrap();
    control.pause();
    controller.cancel().unwrap();
    assert!(controller.status().cancel_requested || !controller.is_running());
    tokio::time::timeout(Duration::from_secs(5), controller.wait_idle())
        .await
        .expect("run finished");

    let report = controller.last_report().unwrap();
    assert_eq!(report.run.run_type, "manual");
    assert_eq!(report.run.status, RunStatus::Cancelled);
}

struct ExplodingCollector;

#[async_trait]
impl Collector for ExplodingCollector {
    fn name(&self) -> &str {
        "exploding"
    }
    async fn collect(&self) -> Result<Vec<CollectedSignal>> {
        panic!("collector exploded");
    }
}

#[tokio::test]
async fn panicking_run_is_recorded_as_failed() {
    let dir = tempfile::tempdir().unwrap();
    let mut fx = pipeline(items(1), dir.path());
    fx.pipeline.collector = Arc::new(ExplodingCollector);
    let controller = PipelineController::new(fx.pipeline);

    controller.start("manual").unwrap();
    tokio::time::timeout(Duration::from_secs(5), controller.wait_idle())
        .await
        .expect("supervisor finished");

    assert!(!controller.is_running());
    assert!(controller.last_report().is_none());
    let runs = fx.store.runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].completed_at.is_some());
    let msg = runs[0].error_message.as_deref().unwrap();
    assert!(msg.contains("panicked"), "{msg}");

    // The controller accepts the next run.
    assert!(controller.start("manual").is_ok());
    controller.wait_idle().await;
}

/// Sends to the first recipient, then cancels the run it belongs to.
struct CancelAfterFirst {
    control: PipelineControl,
    sent: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl Deliverer for CancelAfterFirst {
    fn name(&self) -> &'static str {
        "cancel-after-first"
    }
    async fn deliver(&self, digest: &ComposedDigest, r: &Recipient) -> Result<DeliveryReceipt> {
        self.sent.lock().unwrap().push(r.email.clone());
        self.control.cancel();
        Ok(DeliveryReceipt::sent(r, digest.subject.clone()))
    }
}

#[tokio::test]
async fn cancel_between_recipients_stops_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let mut fx = pipeline(items(2), dir.path());
    let control = PipelineControl::new();
    let deliverer = Arc::new(CancelAfterFirst {
        control: control.clone(),
        sent: Default::default(),
    });
    fx.pipeline.deliverer = deliverer.clone();

    let report = fx.pipeline.run(&control, "full").await.unwrap();
    assert_eq!(report.run.status, RunStatus::Cancelled);
    assert_eq!(report.run.error_message.as_deref(), Some("cancelled by user"));
    assert_eq!(report.deliveries.len(), 1);
    assert_eq!(report.deliveries[0].recipient, "ops@example.com");
    assert_eq!(*deliverer.sent.lock().unwrap(), vec!["ops@example.com"]);
    // Digest was composed, but nothing is marked published.
    assert!(report.digest_path.is_some());
    let published = fx.store.signals_by_status(SignalStatus::Published).await.unwrap();
    assert!(published.is_empty());
    assert_eq!(control.current_stage(), Stage::Idle);
}
