//! Scoring engine and batch coordinator.
//!
//! `score_signal` tries the remote path and falls back to the heuristic on
//! anything but a validated result. `score_batch` sends one combined request and
//! never partially trusts it: a malformed or mis-sized reply demotes the whole
//! batch to per-signal scoring, a single bad element demotes only that signal.
//! Both are infallible; output length and order always match the input.

use std::sync::Arc;

use serde_json::Value;

use super::ai_adapter::{RemoteAnalyst, RemoteReply};
use super::{heuristic, prompts, validate};
use super::{Analysis, AnalysisMethod, ScoreOutcome};
use crate::config::{Catalog, Dimensions};
use crate::metrics;
use crate::signal::Signal;

pub struct ScoringEngine {
    catalog: Arc<Catalog>,
    weights: Dimensions,
    analyst: RemoteAnalyst,
    /// Built once per engine; the pipeline makes one engine per run.
    system_prompt: String,
}

impl ScoringEngine {
    pub fn new(catalog: Arc<Catalog>, weights: Dimensions, analyst: RemoteAnalyst) -> Self {
        let system_prompt = prompts::system_prompt(&catalog);
        Self {
            catalog,
            weights,
            analyst,
            system_prompt,
        }
    }

    pub fn remote_available(&self) -> bool {
        self.analyst.available()
    }

    pub fn backend_name(&self) -> &'static str {
        self.analyst.backend_name()
    }

    pub fn score_heuristic(&self, signal: &Signal) -> Analysis {
        heuristic::score(signal, &self.catalog, &self.weights)
    }

    /// Remote path only.
    pub async fn score_remote(&self, signal: &Signal) -> ScoreOutcome {
        if !self.analyst.available() {
            return ScoreOutcome::Unavailable;
        }
        let user = prompts::signal_prompt(signal, &self.weights);
        match self.analyst.request(&self.system_prompt, &user).await {
            RemoteReply::Json(v) => self.accept(&v, signal, AnalysisMethod::Ai),
            RemoteReply::Unavailable => ScoreOutcome::Unavailable,
            RemoteReply::Unparseable(e) => ScoreOutcome::Invalid(e),
        }
    }

    /// Remote first, heuristic on any failure.
    pub async fn score_signal(&self, signal: &Signal) -> Analysis {
        let remote_on = self.analyst.available();
        let analysis = match self.score_remote(signal).await {
            ScoreOutcome::Scored(a) => a,
            ScoreOutcome::Unavailable => {
                if remote_on {
                    metrics::record_fallback("unavailable");
                    tracing::info!(title = %signal.short_title(), "remote unavailable, heuristic scoring");
                }
                self.score_heuristic(signal)
            }
            ScoreOutcome::Invalid(reason) => {
                metrics::record_fallback("invalid");
                tracing::warn!(title = %signal.short_title(), %reason, "remote result rejected, heuristic scoring");
                self.score_heuristic(signal)
            }
        };
        metrics::record_scored(analysis.analysis_method);
        tracing::debug!(
            signal_id = signal.id,
            composite = analysis.composite,
            signal_type = %analysis.signal_type,
            method = analysis.analysis_method.as_str(),
            "signal scored"
        );
        analysis
    }

    /// One request for the whole batch when it pays off. Length and order of the
    /// result always equal the input.
    pub async fn score_batch(&self, signals: &[Signal]) -> Vec<Analysis> {
        if !self.analyst.available() || signals.len() <= 1 {
            return self.score_each(signals).await;
        }

        let user = prompts::batch_prompt(signals, &self.weights);
        let items = match self.analyst.request(&self.system_prompt, &user).await {
            RemoteReply::Json(Value::Array(items)) if items.len() == signals.len() => items,
            RemoteReply::Json(Value::Array(items)) => {
                metrics::record_batch_demotion("length_mismatch");
                tracing::warn!(
                    expected = signals.len(),
                    got = items.len(),
                    "batch result count mismatch, scoring individually"
                );
                return self.score_each(signals).await;
            }
            other => {
                metrics::record_batch_demotion("malformed");
                tracing::warn!(reply = short(&other), "batch analysis failed, scoring individually");
                return self.score_each(signals).await;
            }
        };

        let mut out = Vec::with_capacity(signals.len());
        for (i, (signal, raw)) in signals.iter().zip(items.iter()).enumerate() {
            match self.accept(raw, signal, AnalysisMethod::AiBatch) {
                ScoreOutcome::Scored(a) => {
                    metrics::record_scored(a.analysis_method);
                    out.push(a);
                }
                _ => {
                    tracing::warn!(index = i, title = %signal.short_title(), "batch element invalid, scoring individually");
                    out.push(self.score_signal(signal).await);
                }
            }
        }
        out
    }

    async fn score_each(&self, signals: &[Signal]) -> Vec<Analysis> {
        let mut out = Vec::with_capacity(signals.len());
        for s in signals {
            out.push(self.score_signal(s).await);
        }
        out
    }

    fn accept(&self, raw: &Value, signal: &Signal, method: AnalysisMethod) -> ScoreOutcome {
        match validate::validate_remote(raw, signal, &self.catalog, &self.weights, method) {
            Ok(a) => ScoreOutcome::Scored(a),
            Err(reason) => ScoreOutcome::Invalid(reason),
        }
    }
}

fn short(reply: &RemoteReply) -> &'static str {
    match reply {
        RemoteReply::Json(_) => "non-array json",
        RemoteReply::Unavailable => "unavailable",
        RemoteReply::Unparseable(_) => "unparseable",
    }
}
