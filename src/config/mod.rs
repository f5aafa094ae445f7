//! Application configuration.
//!
//! Everything lives in one directory (default `config/`, override with
//! `SIGNAL_DIGEST_CONFIG_DIR`):
//! - `catalog.toml`    : categories, fallback, strategic context, competitors (required)
//! - `scoring.toml`    : dimension weights + digest thresholds (required)
//! - `ai.json`         : reasoning backend (optional, disabled when absent)
//! - `recipients.toml` : digest recipients plus the weekly `[delivery]` slot (optional)
//!
//! Runtime knobs come from the environment (`.env` is loaded by `main`):
//! `DELIVERY_MODE`, `DIGEST_OUTPUT_DIR`, `SIGNAL_STATE_PATH`, `SEED_SIGNALS_PATH`.
//! Any validation failure here is fatal at startup.

pub mod ai;
pub mod catalog;
pub mod scoring;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::schedule::WeeklySchedule;

pub use ai::AiConfig;
pub use catalog::{Catalog, Category, StrategicContext};
pub use scoring::{Dimension, DimensionSpec, Dimensions, ScoringConfig, Thresholds};

pub const ENV_CONFIG_DIR: &str = "SIGNAL_DIGEST_CONFIG_DIR";
pub const DEFAULT_CONFIG_DIR: &str = "config";

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "yes")]
    pub active: bool,
}

fn default_send_day() -> String {
    "monday".into()
}

fn default_send_time() -> String {
    "07:00".into()
}

/// `[delivery]` table of `recipients.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Run the weekly scheduler at all.
    #[serde(default = "yes")]
    pub scheduled: bool,
    #[serde(default = "default_send_day")]
    pub send_day: String,
    /// `HH:MM` in `utc_offset_hours`.
    #[serde(default = "default_send_time", alias = "send_time_et")]
    pub send_time: String,
    #[serde(default)]
    pub utc_offset_hours: i32,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            scheduled: true,
            send_day: default_send_day(),
            send_time: default_send_time(),
            utc_offset_hours: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RecipientsFile {
    #[serde(default)]
    recipients: Vec<Recipient>,
    #[serde(default)]
    delivery: Option<DeliverySettings>,
}

/// How composed digests leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Write each message to the digest directory instead of sending it.
    Mock,
    Smtp,
}

impl DeliveryMode {
    pub fn from_env() -> Self {
        match env::var("DELIVERY_MODE")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "smtp" | "email" => DeliveryMode::Smtp,
            _ => DeliveryMode::Mock,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub delivery_mode: DeliveryMode,
    /// Local copies of every composed digest (and mock deliveries).
    pub digest_dir: PathBuf,
    /// JSON state file for the store; in-memory only when `None`.
    pub state_path: Option<PathBuf>,
    /// Input file for the bundled JSON collector.
    pub seed_signals_path: PathBuf,
}

impl RuntimeSettings {
    pub fn from_env(config_dir: &Path) -> Self {
        let digest_dir = env::var("DIGEST_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("digests"));
        let state_path = match env::var("SIGNAL_STATE_PATH") {
            Ok(v) if v.trim().is_empty() || v.trim().eq_ignore_ascii_case("memory") => None,
            Ok(v) => Some(PathBuf::from(v)),
            Err(_) => Some(PathBuf::from("state/signal_digest.json")),
        };
        let seed_signals_path = env::var("SEED_SIGNALS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir.join("seed-signals.json"));
        Self {
            delivery_mode: DeliveryMode::from_env(),
            digest_dir,
            state_path,
            seed_signals_path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub catalog: Catalog,
    pub scoring: ScoringConfig,
    pub ai: AiConfig,
    pub recipients: Vec<Recipient>,
    /// Weekly slot; `None` without a `[delivery]` table or when switched off.
    pub schedule: Option<WeeklySchedule>,
    pub runtime: RuntimeSettings,
}

impl AppConfig {
    /// Load from `SIGNAL_DIGEST_CONFIG_DIR` or `config/`.
    pub fn load() -> Result<Self> {
        let dir = env::var(ENV_CONFIG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));
        Self::load_from_dir(&dir)
    }

    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let catalog = Catalog::load_from(&dir.join("catalog.toml"))?;
        let scoring = ScoringConfig::load_from(&dir.join("scoring.toml"))?;

        let ai_path = dir.join("ai.json");
        let ai = if ai_path.exists() {
            AiConfig::load_from_file(&ai_path)
                .with_context(|| format!("loading AI config from {}", ai_path.display()))?
        } else {
            tracing::info!(path = %ai_path.display(), "no AI config, heuristic scoring only");
            AiConfig::default()
        };

        let file = load_recipients(&dir.join("recipients.toml"))?;
        let schedule = match &file.delivery {
            Some(d) => WeeklySchedule::from_settings(d).context("invalid [delivery] schedule")?,
            None => None,
        };
        let recipients = file.recipients;

        let cfg = Self {
            catalog,
            scoring,
            ai,
            recipients,
            schedule,
            runtime: RuntimeSettings::from_env(dir),
        };
        tracing::info!(
            dir = %dir.display(),
            categories = cfg.catalog.active().count(),
            recipients = cfg.active_recipients().count(),
            ai_enabled = cfg.ai.usable(),
            provider = %cfg.ai.provider,
            schedule = %cfg.schedule.map(|s| s.to_string()).unwrap_or_else(|| "off".into()),
            "configuration loaded"
        );
        Ok(cfg)
    }

    pub fn active_recipients(&self) -> impl Iterator<Item = &Recipient> {
        self.recipients.iter().filter(|r| r.active)
    }
}

fn load_recipients(path: &Path) -> Result<RecipientsFile> {
    if !path.exists() {
        return Ok(RecipientsFile::default());
    }
    let s = fs::read_to_string(path)
        .with_context(|| format!("reading recipients from {}", path.display()))?;
    let file: RecipientsFile =
        toml::from_str(&s).with_context(|| format!("parsing recipients {}", path.display()))?;
    for r in &file.recipients {
        if !r.email.contains('@') {
            anyhow::bail!("recipient '{}' is not an email address", r.email);
        }
    }
    Ok(file)
}
