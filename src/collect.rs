//! Bundled collection and validation collaborators.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::pipeline::{Collector, Validation, Validator, VerificationLevel};
use crate::signal::{CollectedSignal, Signal};

/// Reads a JSON array of collected signals from disk on every run.
///
/// A missing file is an empty collection, not an error.
#[derive(Debug, Clone)]
pub struct JsonFileCollector {
    path: PathBuf,
}

impl JsonFileCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Collector for JsonFileCollector {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn collect(&self) -> Result<Vec<CollectedSignal>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "seed signals file not found");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        let items: Vec<CollectedSignal> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        let kept: Vec<CollectedSignal> = items
            .into_iter()
            .filter(|s| !s.title.trim().is_empty() && !s.url.trim().is_empty())
            .collect();
        tracing::debug!(path = %self.path.display(), count = kept.len(), "signals read");
        Ok(kept)
    }
}

/// Counts only the originating publisher, so every signal is `unverified`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleSourceValidator;

#[async_trait]
impl Validator for SingleSourceValidator {
    async fn validate(&self, _signal: &Signal) -> Result<Validation> {
        Ok(Validation {
            level: VerificationLevel::from_source_count(1),
            source_count: 1,
        })
    }
}
