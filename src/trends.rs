//! Trend aggregation over scored signals.
//!
//! Each run folds its scored signals into long-lived trend records keyed by
//! - `"<category>:<signal_type>"` for every matched category
//! - `"type:<signal_type>"`
//! - `"category:<category>"` for every matched category
//! - `"competitor:<name>"` for every competitor named in the text
//!
//! The previous run's count for a key is the momentum baseline. Occurrence
//! counts are cumulative, so feeding the same run twice double-counts; callers
//! run this once per pipeline run.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use crate::analyze::scoring::round_to;
use crate::analyze::Analysis;
use crate::config::Catalog;
use crate::signal::Signal;
use crate::store::{DynStore, Momentum, Trend, TrendSnapshot, TrendType};

/// A trend that is new, spiking or rising after this run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotableTrend {
    pub key: String,
    pub label: String,
    pub momentum: Momentum,
    pub count: u64,
    pub change_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendUpdate {
    pub trends_updated: usize,
    /// Stored trends this run did not touch, reset to a zero run count.
    pub trends_decayed: usize,
    pub notable: Vec<NotableTrend>,
    pub week: u32,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub trends: Vec<Trend>,
    /// Rising or spiking.
    pub rising: Vec<Trend>,
    pub new: Vec<Trend>,
    pub declining: Vec<Trend>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub week: u32,
    pub year: i32,
    pub count: u64,
    pub avg_score: f64,
}

#[derive(Debug)]
struct Bucket {
    trend_type: TrendType,
    label: String,
    count: u64,
    scores: Vec<f64>,
    signal_ids: Vec<i64>,
}

/// Momentum of an existing trend from the previous and current run counts.
pub fn classify_momentum(old: u64, new: u64) -> Momentum {
    if new as f64 > old as f64 * 1.5 {
        Momentum::Spike
    } else if new > old {
        Momentum::Rising
    } else if new < old {
        Momentum::Declining
    } else {
        Momentum::Stable
    }
}

/// `(new - old) / max(old, 1) × 100`, 1 decimal.
pub fn change_pct(old: u64, new: u64) -> f64 {
    let pct = (new as f64 - old as f64) / (old.max(1) as f64) * 100.0;
    round_to(pct, 1)
}

pub struct TrendAggregator {
    store: DynStore,
    catalog: Arc<Catalog>,
    /// (lowercased name, display name)
    competitors: Vec<(String, String)>,
}

impl TrendAggregator {
    pub fn new(store: DynStore, catalog: Arc<Catalog>) -> Self {
        let competitors = catalog
            .competitor_names()
            .into_iter()
            .map(|c| {
                let label = catalog.competitor_display(&c).unwrap_or(&c).to_string();
                (c, label)
            })
            .collect();
        Self {
            store,
            catalog,
            competitors,
        }
    }

    /// Trend keys, types and labels one scored signal contributes to.
    pub fn contributions(&self, signal: &Signal, analysis: &Analysis) -> Vec<(String, TrendType, String)> {
        let t = analysis.signal_type;
        let mut out = Vec::new();
        for m in &analysis.category_matches {
            let name = self.catalog.name_of(&m.category_id);
            out.push((
                format!("{}:{}", m.category_id, t.as_str()),
                TrendType::CategorySignalType,
                format!("{} - {}", name, t.label()),
            ));
        }
        out.push((format!("type:{}", t.as_str()), TrendType::SignalType, t.label()));
        for m in &analysis.category_matches {
            out.push((
                format!("category:{}", m.category_id),
                TrendType::Category,
                self.catalog.name_of(&m.category_id).to_string(),
            ));
        }
        let text = signal.match_text();
        for (name, label) in &self.competitors {
            if text.contains(name.as_str()) {
                out.push((format!("competitor:{name}"), TrendType::Competitor, label.clone()));
            }
        }
        out
    }

    /// Fold one run's scored signals into the trend records.
    pub async fn update_trends(
        &self,
        scored: &[(Signal, Analysis)],
        now: DateTime<Utc>,
    ) -> Result<TrendUpdate> {
        let iso = now.iso_week();
        let (week, year) = (iso.week(), iso.year());

        if scored.is_empty() {
            tracing::info!("no scored signals for trend analysis");
            return Ok(TrendUpdate {
                trends_updated: 0,
                trends_decayed: 0,
                notable: Vec::new(),
                week,
                year,
            });
        }

        // Highest composite first so each bucket's first id is its top signal.
        let mut ordered: Vec<&(Signal, Analysis)> = scored.iter().collect();
        ordered.sort_by(|a, b| {
            b.1.composite
                .partial_cmp(&a.1.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();
        for (signal, analysis) in ordered {
            for (key, trend_type, label) in self.contributions(signal, analysis) {
                let b = buckets.entry(key).or_insert_with(|| Bucket {
                    trend_type,
                    label,
                    count: 0,
                    scores: Vec::new(),
                    signal_ids: Vec::new(),
                });
                b.count += 1;
                b.scores.push(analysis.composite);
                b.signal_ids.push(signal.id);
            }
        }

        let decayed = self.decay_absent(&buckets).await?;

        let mut notable = Vec::new();
        let mut updated = 0;
        for (key, b) in buckets {
            let run_sum: f64 = b.scores.iter().sum();
            let run_avg = run_sum / b.count as f64;
            let run_max = b.scores.iter().cloned().fold(f64::MIN, f64::max);

            let trend = match self.store.trend(&key).await? {
                Some(old) => {
                    let momentum = classify_momentum(old.last_run_count, b.count);
                    let change = change_pct(old.last_run_count, b.count);
                    let total = old.occurrence_count + b.count;
                    let avg = (old.avg_score * old.occurrence_count as f64 + run_sum) / total as f64;
                    Trend {
                        key: key.clone(),
                        trend_type: old.trend_type,
                        label: b.label.clone(),
                        first_seen: old.first_seen,
                        last_seen: now,
                        occurrence_count: total,
                        last_run_count: b.count,
                        avg_score: round_to(avg, 2),
                        max_score: old.max_score.max(run_max),
                        momentum,
                        week_over_week_change: change,
                    }
                }
                None => Trend {
                    key: key.clone(),
                    trend_type: b.trend_type,
                    label: b.label.clone(),
                    first_seen: now,
                    last_seen: now,
                    occurrence_count: b.count,
                    last_run_count: b.count,
                    avg_score: round_to(run_avg, 2),
                    max_score: run_max,
                    momentum: Momentum::New,
                    week_over_week_change: 0.0,
                },
            };

            let snapshot = TrendSnapshot {
                trend_key: key.clone(),
                week,
                year,
                signal_count: b.count,
                avg_score: round_to(run_avg, 2),
                top_signal_id: b.signal_ids.first().copied(),
                recorded_at: now,
            };
            self.store.commit_trend(&trend, &snapshot).await?;
            updated += 1;

            if trend.momentum.is_notable() {
                notable.push(NotableTrend {
                    key,
                    label: trend.label.clone(),
                    momentum: trend.momentum,
                    count: b.count,
                    change_pct: trend.week_over_week_change,
                });
            }
        }

        crate::metrics::record_trends_updated(updated);
        tracing::info!(
            trends_updated = updated,
            trends_decayed = decayed,
            notable = notable.len(),
            week,
            year,
            "trends updated"
        );
        Ok(TrendUpdate {
            trends_updated: updated,
            trends_decayed: decayed,
            notable,
            week,
            year,
        })
    }

    /// A stored key with no contribution this run contributed zero: its
    /// baseline drops to 0 and momentum is judged against the previous count,
    /// so a key that skips a run reads as declining instead of keeping a stale
    /// `new` or `spike`.
    async fn decay_absent(&self, present: &BTreeMap<String, Bucket>) -> Result<usize> {
        let mut decayed = 0;
        for old in self.store.trends().await? {
            if present.contains_key(&old.key) {
                continue;
            }
            let momentum = classify_momentum(old.last_run_count, 0);
            if old.last_run_count == 0 && old.momentum == momentum {
                continue;
            }
            let trend = Trend {
                momentum,
                week_over_week_change: change_pct(old.last_run_count, 0),
                last_run_count: 0,
                ..old
            };
            self.store.save_trend(&trend).await?;
            tracing::debug!(key = %trend.key, momentum = trend.momentum.as_str(), "trend absent this run");
            decayed += 1;
        }
        Ok(decayed)
    }

    /// Trends ordered by momentum (spike, rising, new, stable, declining) then
    /// occurrence count, split into the groups a report shows.
    pub async fn trend_summary(&self, limit: usize) -> Result<TrendSummary> {
        let mut trends = self.store.trends().await?;
        trends.sort_by(|a, b| {
            a.momentum
                .rank()
                .cmp(&b.momentum.rank())
                .then(b.occurrence_count.cmp(&a.occurrence_count))
                .then(a.key.cmp(&b.key))
        });
        trends.truncate(limit);
        let pick = |f: fn(&Momentum) -> bool| -> Vec<Trend> {
            trends.iter().filter(|t| f(&t.momentum)).cloned().collect()
        };
        Ok(TrendSummary {
            rising: pick(|m| matches!(m, Momentum::Rising | Momentum::Spike)),
            new: pick(|m| *m == Momentum::New),
            declining: pick(|m| *m == Momentum::Declining),
            trends,
        })
    }

    /// The last `weeks` weekly snapshots of a trend, oldest first.
    pub async fn trend_history(&self, key: &str, weeks: usize) -> Result<Vec<HistoryPoint>> {
        let snaps = self.store.snapshots_for(key).await?;
        let skip = snaps.len().saturating_sub(weeks);
        Ok(snaps
            .into_iter()
            .skip(skip)
            .map(|s| HistoryPoint {
                week: s.week,
                year: s.year,
                count: s.signal_count,
                avg_score: s.avg_score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn momentum_thresholds() {
        assert_eq!(classify_momentum(10, 16), Momentum::Spike);
        assert_eq!(classify_momentum(10, 15), Momentum::Rising);
        assert_eq!(classify_momentum(10, 11), Momentum::Rising);
        assert_eq!(classify_momentum(10, 10), Momentum::Stable);
        assert_eq!(classify_momentum(10, 7), Momentum::Declining);
    }

    #[test]
    fn change_pct_uses_floor_of_one() {
        assert_eq!(change_pct(10, 16), 60.0);
        assert_eq!(change_pct(10, 7), -30.0);
        assert_eq!(change_pct(0, 3), 300.0);
        assert_eq!(change_pct(3, 4), 33.3);
    }
}
