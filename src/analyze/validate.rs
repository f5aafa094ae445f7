//! Validation and repair of remote analysis payloads.
//!
//! Remote JSON is untrusted. This is the only place it is inspected; everything
//! downstream works on [`Analysis`]. Rules:
//! - not an object, or no usable category match: rejected
//! - unknown `signal_type`: coerced to market-shift
//! - relevance: number or numeric string, default 0.5, clamped to [0,1]
//! - dimension scores: number or numeric string, default 5, rounded, clamped to [1,10]
//! - empty or placeholder narrative fields: filled from the signal and the
//!   heuristic templates, never left as "TBD"

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::heuristic;
use super::scoring::composite;
use super::{Analysis, AnalysisMethod, CategoryMatch, DimensionScores, SignalType};
use crate::config::{Catalog, Dimension, Dimensions};
use crate::signal::Signal;

const DEFAULT_RELEVANCE: f64 = 0.5;
const DEFAULT_DIMENSION: f64 = 5.0;

const PLACEHOLDERS: &[&str] = &["tbd", "n/a", "na", "none", "null", "pending", "unknown"];

/// Turn one remote JSON value into an [`Analysis`] for `signal`, or say why not.
pub fn validate_remote(
    raw: &Value,
    signal: &Signal,
    catalog: &Catalog,
    weights: &Dimensions,
    method: AnalysisMethod,
) -> Result<Analysis, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| format!("expected a JSON object, got {}", kind(raw)))?;

    let signal_type = match obj.get("signal_type").and_then(Value::as_str) {
        Some(s) => SignalType::parse(s).unwrap_or_else(|| {
            tracing::warn!(value = s, "unknown signal_type, using market-shift");
            SignalType::default()
        }),
        None => SignalType::default(),
    };

    let category_matches = category_matches(obj, catalog)?;
    let dimension_scores = dimension_scores(obj);

    let names = heuristic::category_names(&category_matches, catalog);
    let text = signal.match_text();

    let headline = text_field(obj, "headline").unwrap_or_else(|| signal.title.clone());
    let what_summary = text_field(obj, "what_summary").unwrap_or_else(|| {
        if signal.summary.trim().is_empty() {
            signal.title.clone()
        } else {
            signal.summary.clone()
        }
    });
    let why_it_matters = text_field(obj, "why_it_matters").unwrap_or_else(|| {
        heuristic::why_it_matters(
            signal_type,
            &names,
            catalog.strategy.production_hub.as_deref(),
        )
    });
    let quick_win = text_field(obj, "quick_win")
        .unwrap_or_else(|| heuristic::quick_win(signal_type).to_string());
    let suggested_owner = text_field(obj, "suggested_owner")
        .unwrap_or_else(|| heuristic::suggested_owner(signal_type).to_string());
    let estimated_impact = text_field(obj, "estimated_impact").unwrap_or_else(|| {
        heuristic::impact_from_text(&text).unwrap_or_else(|| {
            heuristic::revenue_tier(dimension_scores.revenue_impact).to_string()
        })
    });

    Ok(Analysis {
        signal_id: signal.id,
        signal_type,
        composite: composite(&dimension_scores, weights),
        category_matches,
        dimension_scores,
        headline,
        what_summary,
        why_it_matters,
        quick_win,
        suggested_owner,
        estimated_impact,
        outreach_template: text_field(obj, "outreach_template"),
        analysis_method: method,
    })
}

fn category_matches(obj: &Map<String, Value>, catalog: &Catalog) -> Result<Vec<CategoryMatch>, String> {
    let items = match obj.get("category_matches").and_then(Value::as_array) {
        Some(a) if !a.is_empty() => a,
        _ => return Err("category_matches missing or empty".to_string()),
    };

    let mut out: Vec<CategoryMatch> = Vec::with_capacity(items.len());
    for item in items {
        let Some(id) = item
            .get("category_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            continue;
        };
        if !catalog.get(id).is_some_and(|c| c.active) {
            tracing::debug!(category = id, "dropping unknown category from remote result");
            continue;
        }
        if out.iter().any(|m| m.category_id == id) {
            continue;
        }
        let relevance = item
            .get("relevance")
            .and_then(number_like)
            .filter(|r| r.is_finite())
            .unwrap_or(DEFAULT_RELEVANCE)
            .clamp(0.0, 1.0);
        out.push(CategoryMatch {
            category_id: id.to_string(),
            relevance,
        });
    }

    if out.is_empty() {
        return Err("no category match refers to a known active category".to_string());
    }
    out.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(Ordering::Equal)
    });
    Ok(out)
}

fn dimension_scores(obj: &Map<String, Value>) -> DimensionScores {
    let scores = obj.get("scores").and_then(Value::as_object);
    let get = |d: Dimension| -> u8 {
        let v = scores
            .and_then(|s| s.get(d.id()))
            .and_then(number_like)
            .filter(|x| x.is_finite())
            .unwrap_or(DEFAULT_DIMENSION);
        clamp_score(v)
    };
    DimensionScores {
        revenue_impact: get(Dimension::RevenueImpact),
        time_sensitivity: get(Dimension::TimeSensitivity),
        strategic_alignment: get(Dimension::StrategicAlignment),
        competitive_pressure: get(Dimension::CompetitivePressure),
    }
}

/// Round, then clamp into 1..=10.
pub fn clamp_score(v: f64) -> u8 {
    v.round().clamp(1.0, 10.0) as u8
}

fn number_like(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let s = obj.get(key)?.as_str()?.trim();
    if s.is_empty() || PLACEHOLDERS.iter().any(|p| s.eq_ignore_ascii_case(p)) {
        None
    } else {
        Some(s.to_string())
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_score_rounds_then_bounds() {
        assert_eq!(clamp_score(7.6), 8);
        assert_eq!(clamp_score(-3.0), 1);
        assert_eq!(clamp_score(42.0), 10);
        assert_eq!(clamp_score(0.4), 1);
    }

    #[test]
    fn number_like_accepts_numeric_strings() {
        assert_eq!(number_like(&Value::from(" 6.5 ")), Some(6.5));
        assert_eq!(number_like(&Value::from("high")), None);
        assert_eq!(number_like(&Value::Bool(true)), None);
    }

    #[test]
    fn placeholders_are_treated_as_missing() {
        let obj = serde_json::json!({"a": "TBD", "b": "  ", "c": "Call Acme"});
        let obj = obj.as_object().unwrap();
        assert_eq!(text_field(obj, "a"), None);
        assert_eq!(text_field(obj, "b"), None);
        assert_eq!(text_field(obj, "c").as_deref(), Some("Call Acme"));
        assert_eq!(text_field(obj, "missing"), None);
    }
}
