// tests/common/mod.rs
//
// Shared fixtures: a small catalogue, signal builders, and stand-in
// collaborators for driving the pipeline without files or network.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Notify;

use signal_digest::ai_adapter::{BackendError, DisabledBackend, DynBackend, ReasoningBackend};
use signal_digest::collect::SingleSourceValidator;
use signal_digest::compose::HtmlDigestComposer;
use signal_digest::config::{AiConfig, Catalog, Recipient, ScoringConfig};
use signal_digest::pipeline::{Collector, ComposedDigest, Deliverer, DeliveryReceipt, Pipeline};
use signal_digest::signal::{CollectedSignal, Signal, SignalStatus};
use signal_digest::store::{DynStore, MemoryStore};

pub const CATALOG: &str = r#"
fallback_category = "industrial-sensors"
competitors = ["Kistler", "HBK"]

[[categories]]
id = "industrial-sensors"
name = "Industrial Sensors"
keywords = ["sensor", "load cell", "torque sensor", "strain gage"]

[[categories]]
id = "robotics"
name = "Robotics Components"
keywords = ["robot", "cobot", "gripper", "humanoid"]

[[categories]]
id = "legacy"
name = "Legacy"
active = false
keywords = ["datalogger"]
"#;

pub fn catalog() -> Catalog {
    Catalog::from_toml_str(CATALOG).expect("test catalog")
}

pub fn signal(id: i64, title: &str, summary: &str) -> Signal {
    Signal {
        id,
        external_id: format!("ext-{id}"),
        title: title.to_string(),
        summary: summary.to_string(),
        url: format!("https://news.example.com/{id}"),
        source_id: "wire".to_string(),
        source_tier: 1,
        published_at: None,
        status: SignalStatus::Validated,
    }
}

pub fn collected(n: usize, title: &str, summary: &str) -> CollectedSignal {
    CollectedSignal {
        title: title.to_string(),
        summary: summary.to_string(),
        url: format!("https://news.example.com/item-{n}"),
        source_id: "wire".to_string(),
        source_tier: 1,
        published_at: None,
    }
}

pub fn recipient(email: &str, active: bool) -> Recipient {
    Recipient {
        email: email.to_string(),
        name: String::new(),
        active,
    }
}

/// AI config with retries but no backoff delay.
pub fn ai_config(batch_size: usize) -> AiConfig {
    AiConfig {
        enabled: true,
        api_key: "test".into(),
        batch_size,
        backoff_base_ms: 0,
        ..AiConfig::default()
    }
}

/// Returns the same items on every run.
pub struct StaticCollector(pub Vec<CollectedSignal>);

#[async_trait]
impl Collector for StaticCollector {
    fn name(&self) -> &str {
        "static"
    }
    async fn collect(&self) -> Result<Vec<CollectedSignal>> {
        Ok(self.0.clone())
    }
}

/// Records every send; addresses containing "fail" error out.
#[derive(Default)]
pub struct RecordingDeliverer {
    pub sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Deliverer for RecordingDeliverer {
    fn name(&self) -> &'static str {
        "recording"
    }
    async fn deliver(&self, digest: &ComposedDigest, r: &Recipient) -> Result<DeliveryReceipt> {
        if r.email.contains("fail") {
            anyhow::bail!("mailbox unavailable");
        }
        self.sent.lock().unwrap().push(r.email.clone());
        Ok(DeliveryReceipt::sent(r, digest.subject.clone()))
    }
}

/// Answers the first `free_calls` requests from `replies`, then parks every
/// later call until the test drops it, notifying `entered` on the way in.
pub struct GatedBackend {
    replies: Mutex<Vec<String>>,
    free_calls: usize,
    calls: AtomicUsize,
    pub entered: Notify,
}

impl GatedBackend {
    pub fn new(replies: Vec<String>) -> Self {
        let free_calls = replies.len();
        Self {
            replies: Mutex::new(replies.into_iter().rev().collect()),
            free_calls,
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningBackend for GatedBackend {
    fn name(&self) -> &'static str {
        "gated"
    }
    fn available(&self) -> bool {
        true
    }
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.free_calls {
            let reply = self.replies.lock().unwrap().pop();
            return reply.ok_or(BackendError::NotConfigured);
        }
        self.entered.notify_one();
        std::future::pending::<()>().await;
        Err(BackendError::NotConfigured)
    }
}

pub struct Fixture {
    pub pipeline: Pipeline,
    pub store: DynStore,
    pub deliverer: Arc<RecordingDeliverer>,
}

/// Heuristic-only pipeline over an in-memory store.
pub fn pipeline(items: Vec<CollectedSignal>, digest_dir: &Path) -> Fixture {
    pipeline_with(items, digest_dir, Arc::new(DisabledBackend), AiConfig::default())
}

pub fn pipeline_with(
    items: Vec<CollectedSignal>,
    digest_dir: &Path,
    backend: DynBackend,
    ai: AiConfig,
) -> Fixture {
    let store: DynStore = Arc::new(MemoryStore::new());
    let deliverer = Arc::new(RecordingDeliverer::default());
    let pipeline = Pipeline {
        store: store.clone(),
        catalog: Arc::new(catalog()),
        scoring: ScoringConfig::default(),
        ai,
        backend,
        collector: Arc::new(StaticCollector(items)),
        validator: Arc::new(SingleSourceValidator),
        composer: Arc::new(HtmlDigestComposer::default()),
        deliverer: deliverer.clone(),
        recipients: vec![
            recipient("ops@example.com", true),
            recipient("fail@example.com", true),
            recipient("retired@example.com", false),
        ],
        digest_dir: digest_dir.to_path_buf(),
    };
    Fixture {
        pipeline,
        store,
        deliverer,
    }
}

/// A valid remote analysis object for `category`.
pub fn remote_json(category: &str, signal_type: &str, score: u8) -> serde_json::Value {
    serde_json::json!({
        "signal_type": signal_type,
        "category_matches": [{"category_id": category, "relevance": 0.9}],
        "scores": {
            "revenue_impact": score,
            "time_sensitivity": score,
            "strategic_alignment": score,
            "competitive_pressure": score
        },
        "headline": format!("Remote view ({score})"),
        "what_summary": "Summarised remotely.",
        "why_it_matters": "Matters for the sensor line.",
        "quick_win": "Call the account team.",
        "suggested_owner": "Sales",
        "estimated_impact": "$1M-$5M potential revenue impact"
    })
}
