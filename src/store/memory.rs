//! In-memory [`Store`], optionally mirrored to a JSON state file.
//!
//! All state sits behind one `Mutex`; each trait method takes the lock once, so
//! every multi-record write is atomic with respect to other callers. The lock is
//! never held across an `.await`. `flush` serializes under the lock and writes
//! the file outside it (tmp + rename).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{
    PipelineRun, RunCounts, RunStatus, Store, Trend, TrendSnapshot, UpsertOutcome,
};
use crate::analyze::{Analysis, CategoryMatch};
use crate::signal::{CollectedSignal, Signal, SignalStatus};

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    next_signal_id: i64,
    next_run_id: i64,
    signals: BTreeMap<i64, Signal>,
    by_external_id: BTreeMap<String, i64>,
    analyses: BTreeMap<i64, Analysis>,
    category_links: BTreeMap<i64, Vec<CategoryMatch>>,
    trends: BTreeMap<String, Trend>,
    /// Per trend key, one entry per (year, week).
    snapshots: BTreeMap<String, Vec<TrendSnapshot>>,
    runs: BTreeMap<i64, PipelineRun>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Pure in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store mirrored to `path`; existing state is loaded if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading store state {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing store state {}", path.display()))?
        } else {
            State::default()
        };
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| anyhow!("store state lock poisoned"))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_signal(&self, signal: CollectedSignal) -> Result<UpsertOutcome> {
        let external_id = signal.external_id();
        let mut st = self.state()?;
        if let Some(&id) = st.by_external_id.get(&external_id) {
            if let Some(existing) = st.signals.get_mut(&id) {
                existing.status = SignalStatus::New;
            }
            return Ok(UpsertOutcome::Requeued(id));
        }
        st.next_signal_id += 1;
        let id = st.next_signal_id;
        let row = Signal {
            id,
            external_id: external_id.clone(),
            title: signal.title,
            summary: signal.summary,
            url: signal.url,
            source_id: signal.source_id,
            source_tier: signal.source_tier,
            published_at: signal.published_at,
            status: SignalStatus::New,
        };
        st.signals.insert(id, row);
        st.by_external_id.insert(external_id, id);
        Ok(UpsertOutcome::Inserted(id))
    }

    async fn signal(&self, id: i64) -> Result<Option<Signal>> {
        Ok(self.state()?.signals.get(&id).cloned())
    }

    async fn signals_by_status(&self, status: SignalStatus) -> Result<Vec<Signal>> {
        Ok(self
            .state()?
            .signals
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn set_signal_status(&self, id: i64, status: SignalStatus) -> Result<()> {
        let mut st = self.state()?;
        let s = st
            .signals
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown signal {id}"))?;
        s.status = status;
        Ok(())
    }

    async fn commit_analysis(&self, analysis: &Analysis) -> Result<()> {
        if analysis.category_matches.is_empty() {
            bail!(
                "refusing analysis for signal {} without a category match",
                analysis.signal_id
            );
        }
        let mut st = self.state()?;
        let signal = st
            .signals
            .get_mut(&analysis.signal_id)
            .ok_or_else(|| anyhow!("unknown signal {}", analysis.signal_id))?;
        signal.status = SignalStatus::Scored;
        st.category_links
            .insert(analysis.signal_id, analysis.category_matches.clone());
        st.analyses.insert(analysis.signal_id, analysis.clone());
        Ok(())
    }

    async fn analysis_for(&self, signal_id: i64) -> Result<Option<Analysis>> {
        Ok(self.state()?.analyses.get(&signal_id).cloned())
    }

    async fn signals_in_category(&self, category_id: &str) -> Result<Vec<i64>> {
        Ok(self
            .state()?
            .category_links
            .iter()
            .filter(|(_, links)| links.iter().any(|m| m.category_id == category_id))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn trend(&self, key: &str) -> Result<Option<Trend>> {
        Ok(self.state()?.trends.get(key).cloned())
    }

    async fn commit_trend(&self, trend: &Trend, snapshot: &TrendSnapshot) -> Result<()> {
        if snapshot.trend_key != trend.key {
            bail!(
                "snapshot key '{}' does not match trend '{}'",
                snapshot.trend_key,
                trend.key
            );
        }
        let mut st = self.state()?;
        st.trends.insert(trend.key.clone(), trend.clone());
        let snaps = st.snapshots.entry(trend.key.clone()).or_default();
        match snaps
            .iter_mut()
            .find(|s| s.year == snapshot.year && s.week == snapshot.week)
        {
            Some(existing) => *existing = snapshot.clone(),
            None => {
                snaps.push(snapshot.clone());
                snaps.sort_by_key(|s| (s.year, s.week));
            }
        }
        Ok(())
    }

    async fn save_trend(&self, trend: &Trend) -> Result<()> {
        let mut st = self.state()?;
        if !st.trends.contains_key(&trend.key) {
            bail!("unknown trend '{}'", trend.key);
        }
        st.trends.insert(trend.key.clone(), trend.clone());
        Ok(())
    }

    async fn trends(&self) -> Result<Vec<Trend>> {
        Ok(self.state()?.trends.values().cloned().collect())
    }

    async fn snapshots_for(&self, key: &str) -> Result<Vec<TrendSnapshot>> {
        Ok(self
            .state()?
            .snapshots
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn start_run(&self, run_type: &str) -> Result<PipelineRun> {
        let mut st = self.state()?;
        st.next_run_id += 1;
        let run = PipelineRun {
            id: st.next_run_id,
            run_type: run_type.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            signals_collected: 0,
            signals_validated: 0,
            signals_scored: 0,
            error_message: None,
        };
        st.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn finish_run(
        &self,
        id: i64,
        status: RunStatus,
        counts: RunCounts,
        error_message: Option<String>,
    ) -> Result<PipelineRun> {
        if !status.is_final() {
            bail!("cannot finish run {id} with non-terminal status");
        }
        let mut st = self.state()?;
        let run = st
            .runs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown run {id}"))?;
        if run.status.is_final() {
            bail!("run {id} already finished as {}", run.status.as_str());
        }
        run.status = status;
        run.completed_at = Some(Utc::now());
        run.signals_collected = counts.collected;
        run.signals_validated = counts.validated;
        run.signals_scored = counts.scored;
        run.error_message = error_message;
        Ok(run.clone())
    }

    async fn runs(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        Ok(self
            .state()?
            .runs
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fail_stale_runs(&self, reason: &str) -> Result<usize> {
        let mut st = self.state()?;
        let now = Utc::now();
        let mut n = 0;
        for run in st.runs.values_mut().filter(|r| r.status == RunStatus::Running) {
            run.status = RunStatus::Failed;
            run.completed_at = Some(now);
            run.error_message = Some(reason.to_string());
            n += 1;
        }
        Ok(n)
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = {
            let st = self.state()?;
            serde_json::to_string_pretty(&*st).context("serializing store state")?
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{AnalysisMethod, DimensionScores, SignalType};

    fn collected(title: &str) -> CollectedSignal {
        CollectedSignal {
            title: title.to_string(),
            summary: String::new(),
            url: format!("https://x.test/{}", title.replace(' ', "-")),
            source_id: "wire".to_string(),
            source_tier: 2,
            published_at: None,
        }
    }

    fn analysis(signal_id: i64, categories: &[&str]) -> Analysis {
        Analysis {
            signal_id,
            signal_type: SignalType::MarketShift,
            category_matches: categories
                .iter()
                .map(|c| CategoryMatch {
                    category_id: c.to_string(),
                    relevance: 0.5,
                })
                .collect(),
            dimension_scores: DimensionScores {
                revenue_impact: 5,
                time_sensitivity: 5,
                strategic_alignment: 5,
                competitive_pressure: 5,
            },
            composite: 5.0,
            headline: "h".into(),
            what_summary: "w".into(),
            why_it_matters: "y".into(),
            quick_win: "q".into(),
            suggested_owner: "o".into(),
            estimated_impact: "e".into(),
            outreach_template: None,
            analysis_method: AnalysisMethod::Heuristic,
        }
    }

    #[tokio::test]
    async fn recollecting_requeues_instead_of_duplicating() {
        let store = MemoryStore::new();
        let first = store.upsert_signal(collected("acme opens plant")).await.unwrap();
        store
            .set_signal_status(first.id(), SignalStatus::Scored)
            .await
            .unwrap();
        let again = store.upsert_signal(collected("acme opens plant")).await.unwrap();
        assert_eq!(again, UpsertOutcome::Requeued(first.id()));
        let new = store.signals_by_status(SignalStatus::New).await.unwrap();
        assert_eq!(new.len(), 1);
    }

    #[tokio::test]
    async fn commit_analysis_marks_scored_and_links_categories() {
        let store = MemoryStore::new();
        let id = store.upsert_signal(collected("one")).await.unwrap().id();
        store.commit_analysis(&analysis(id, &["a", "b"])).await.unwrap();
        assert_eq!(
            store.signal(id).await.unwrap().unwrap().status,
            SignalStatus::Scored
        );
        assert_eq!(store.signals_in_category("b").await.unwrap(), vec![id]);
        assert!(store.signals_in_category("z").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn analysis_without_categories_is_refused_and_nothing_changes() {
        let store = MemoryStore::new();
        let id = store.upsert_signal(collected("one")).await.unwrap().id();
        assert!(store.commit_analysis(&analysis(id, &[])).await.is_err());
        assert!(store.analysis_for(id).await.unwrap().is_none());
        assert_eq!(
            store.signal(id).await.unwrap().unwrap().status,
            SignalStatus::New
        );
    }

    #[tokio::test]
    async fn runs_finish_exactly_once() {
        let store = MemoryStore::new();
        let run = store.start_run("manual").await.unwrap();
        store
            .finish_run(run.id, RunStatus::Completed, RunCounts::default(), None)
            .await
            .unwrap();
        assert!(store
            .finish_run(run.id, RunStatus::Failed, RunCounts::default(), None)
            .await
            .is_err());
        assert_eq!(store.runs(10).await.unwrap()[0].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn stale_runs_are_failed() {
        let store = MemoryStore::new();
        store.start_run("scheduled").await.unwrap();
        store.start_run("manual").await.unwrap();
        assert_eq!(store.fail_stale_runs("process restarted").await.unwrap(), 2);
        let runs = store.runs(10).await.unwrap();
        assert!(runs.iter().all(|r| r.status == RunStatus::Failed));
        assert_eq!(runs[0].id, 2);
        assert_eq!(runs[0].error_message.as_deref(), Some("process restarted"));
    }

    #[tokio::test]
    async fn state_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");
        {
            let store = MemoryStore::open(&path).unwrap();
            let id = store.upsert_signal(collected("persisted")).await.unwrap().id();
            store.commit_analysis(&analysis(id, &["a"])).await.unwrap();
            store.flush().await.unwrap();
        }
        let reopened = MemoryStore::open(&path).unwrap();
        let scored = reopened.signals_by_status(SignalStatus::Scored).await.unwrap();
        assert_eq!(scored.len(), 1);
        assert!(reopened.analysis_for(scored[0].id).await.unwrap().is_some());
        // ids continue after reload
        let next = reopened.upsert_signal(collected("later")).await.unwrap();
        assert_eq!(next, UpsertOutcome::Inserted(scored[0].id + 1));
    }
}
