//! Keyword heuristic scorer. No external dependency, always available.
//!
//! Steps:
//! 1. classify the signal type with the ordered rules in [`super::rules`]
//! 2. match categories by vocabulary hits (keywords + products + industries)
//! 3. per-type dimension baselines, alignment from the top category relevance
//! 4. narrative fields from per-type templates naming the matched categories
//! 5. estimated impact: explicit `$<num>[bmk]` in the text first, then bands

use std::cmp::Ordering;

use once_cell::sync::OnceCell;
use regex::Regex;

use super::scoring::{composite, round_to};
use super::{rules, Analysis, AnalysisMethod, CategoryMatch, DimensionScores, SignalType};
use crate::config::{Catalog, Dimensions};
use crate::signal::Signal;

// Relevance rescaling: even one or two vocabulary hits should give a materially
// non-zero relevance. Empirically tuned, pending calibration review.
pub const RELEVANCE_FLOOR: f64 = 0.4;
pub const RELEVANCE_SPAN: f64 = 0.6;
pub const VOCAB_FRACTION: f64 = 0.25;

/// Alignment when no category vocabulary was hit at all.
const UNMATCHED_ALIGNMENT: u8 = 3;
const MIN_MATCHED_ALIGNMENT: u8 = 4;

/// Categories named in narrative templates.
const NAMED_CATEGORIES: usize = 3;

/// Revenue / time / competitive baselines for a signal type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub revenue_impact: u8,
    pub time_sensitivity: u8,
    pub competitive_pressure: u8,
}

pub fn baseline(t: SignalType) -> Baseline {
    let (revenue_impact, time_sensitivity, competitive_pressure) = match t {
        SignalType::CompetitiveThreat => (5, 7, 7),
        SignalType::RevenueOpportunity => (7, 7, 4),
        SignalType::TradeTariff => (7, 5, 6),
        SignalType::PartnershipSignal => (6, 5, 4),
        SignalType::TechnologyTrend => (5, 5, 4),
        SignalType::MarketShift | SignalType::CustomerIntelligence => (5, 5, 4),
    };
    Baseline {
        revenue_impact,
        time_sensitivity,
        competitive_pressure,
    }
}

/// Categories whose vocabulary appears in `text` (lowercased), sorted by
/// relevance descending. Ties keep catalogue order.
pub fn match_categories(text: &str, catalog: &Catalog) -> Vec<CategoryMatch> {
    let mut out = Vec::new();
    for cat in catalog.active() {
        let vocab: Vec<String> = cat
            .vocabulary()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if vocab.is_empty() {
            continue;
        }
        let hits = vocab.iter().filter(|k| text.contains(k.as_str())).count();
        if hits == 0 {
            continue;
        }
        out.push(CategoryMatch {
            category_id: cat.id.clone(),
            relevance: relevance(hits, vocab.len()),
        });
    }
    out.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(Ordering::Equal)
    });
    out
}

/// `min(0.4 + (hits / max(vocab × 0.25, 1)) × 0.6, 1.0)`, 3 decimals.
pub fn relevance(hits: usize, vocab_size: usize) -> f64 {
    let denom = (vocab_size as f64 * VOCAB_FRACTION).max(1.0);
    let r = (RELEVANCE_FLOOR + (hits as f64 / denom) * RELEVANCE_SPAN).min(1.0);
    round_to(r, 3)
}

/// Alignment score from the top category relevance, `None` if nothing matched.
pub fn alignment(top_relevance: Option<f64>) -> u8 {
    match top_relevance {
        Some(r) => {
            let scaled = (r * 10.0).floor().clamp(0.0, 10.0) as u8;
            scaled.max(MIN_MATCHED_ALIGNMENT)
        }
        None => UNMATCHED_ALIGNMENT,
    }
}

/// Up to three category display names joined with ", ".
pub fn category_names(matches: &[CategoryMatch], catalog: &Catalog) -> String {
    let names: Vec<&str> = matches
        .iter()
        .take(NAMED_CATEGORIES)
        .map(|m| catalog.name_of(&m.category_id))
        .collect();
    if names.is_empty() {
        "our business categories".to_string()
    } else {
        names.join(", ")
    }
}

pub fn why_it_matters(t: SignalType, categories: &str, production_hub: Option<&str>) -> String {
    match t {
        SignalType::CompetitiveThreat => format!(
            "A competitor move has been detected that could affect {categories}. \
             Monitoring competitor positioning and preparing a defensive response is advised."
        ),
        SignalType::RevenueOpportunity => format!(
            "This signal points to a potential revenue opportunity relevant to {categories}. \
             Early engagement could secure first-mover advantage."
        ),
        SignalType::TradeTariff => match production_hub {
            Some(hub) => format!(
                "Trade policy changes could create a cost advantage for our {hub} production \
                 relative to competitors sourcing from affected regions, benefiting {categories}."
            ),
            None => format!(
                "Trade policy changes could shift landed costs between us and competitors \
                 sourcing from affected regions, affecting {categories}."
            ),
        },
        SignalType::PartnershipSignal => format!(
            "A potential partnership or alliance opportunity has been identified that aligns \
             with {categories} strategic priorities."
        ),
        SignalType::TechnologyTrend => format!(
            "An emerging technology trend could impact {categories} product roadmaps or \
             create new market opportunities."
        ),
        SignalType::CustomerIntelligence => format!(
            "Customer activity signals suggest {categories} should evaluate account strategy \
             and prepare updated talking points."
        ),
        SignalType::MarketShift => format!(
            "Industry dynamics are shifting in a way that could create both risks and \
             opportunities for {categories}."
        ),
    }
}

pub fn quick_win(t: SignalType) -> &'static str {
    match t {
        SignalType::CompetitiveThreat => {
            "Brief the sales team on competitive positioning and prepare counter-messaging for affected accounts."
        }
        SignalType::RevenueOpportunity => {
            "Identify decision-maker contacts and prepare an initial outreach draft within the week."
        }
        SignalType::TradeTariff => {
            "Quantify the cost impact against competitors' sourcing and update pricing models."
        }
        SignalType::PartnershipSignal => {
            "Research the partner's strategic priorities and identify mutual value propositions."
        }
        SignalType::TechnologyTrend => {
            "Map current product capabilities against the trend and identify gaps and content opportunities."
        }
        SignalType::CustomerIntelligence => {
            "Schedule an internal account review and prepare talking points for the next customer interaction."
        }
        SignalType::MarketShift => {
            "Circulate this signal to category leadership for impact assessment and response planning."
        }
    }
}

pub fn suggested_owner(t: SignalType) -> &'static str {
    match t {
        SignalType::CompetitiveThreat => "VP Sales / Product Marketing",
        SignalType::RevenueOpportunity => "Category Sales Director",
        SignalType::TradeTariff => "VP Operations / Supply Chain",
        SignalType::PartnershipSignal => "VP Business Development",
        SignalType::TechnologyTrend => "CTO / Product Engineering Lead",
        SignalType::CustomerIntelligence => "Key Account Manager",
        SignalType::MarketShift => "Category General Manager",
    }
}

/// Impact tier keyed only by the revenue score.
pub fn revenue_tier(revenue_impact: u8) -> &'static str {
    match revenue_impact {
        8.. => "$1M-$5M potential revenue impact",
        6..=7 => "$500K-$2M potential revenue impact",
        4..=5 => "$200K-$500K potential revenue impact",
        _ => "$100K-$200K potential revenue impact",
    }
}

/// Largest explicit dollar amount in the (lowercased) text, formatted.
pub fn impact_from_text(text: &str) -> Option<String> {
    static RE_DOLLARS: OnceCell<Regex> = OnceCell::new();
    let re = RE_DOLLARS
        .get_or_init(|| Regex::new(r"\$([\d,.]+)\s*([bmk])?\b").expect("dollar regex"));

    let max = re
        .captures_iter(text)
        .filter_map(|c| {
            let digits: String = c[1].chars().filter(|ch| ch.is_ascii_digit() || *ch == '.').collect();
            let n: f64 = digits.parse().ok()?;
            let mult = match c.get(2).map(|m| m.as_str()) {
                Some("b") => 1e9,
                Some("m") => 1e6,
                Some("k") => 1e3,
                _ => 1.0,
            };
            Some(n * mult)
        })
        .fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x))))?;

    if max >= 1e9 {
        Some(format!("${:.0}B+ market opportunity", max / 1e9))
    } else if max >= 1e6 {
        Some(format!("${:.0}M+ opportunity", max / 1e6))
    } else if max >= 1e3 {
        Some(format!("${:.0}K+ opportunity", max / 1e3))
    } else {
        None
    }
}

/// Estimated impact: explicit amount, then type band, then revenue tier.
pub fn estimate_impact(text: &str, t: SignalType, revenue_impact: u8) -> String {
    if let Some(s) = impact_from_text(text) {
        return s;
    }
    match t {
        SignalType::CompetitiveThreat if revenue_impact >= 7 => {
            "Defensive: protect $1M+ revenue".to_string()
        }
        SignalType::CompetitiveThreat => "Defensive: protect $500K+ revenue".to_string(),
        SignalType::TradeTariff if revenue_impact >= 7 => {
            "Cost advantage: $1M+ competitive benefit".to_string()
        }
        SignalType::TradeTariff => "Cost advantage: $200K-$500K competitive benefit".to_string(),
        _ => revenue_tier(revenue_impact).to_string(),
    }
}

/// Score one signal without any remote call.
pub fn score(signal: &Signal, catalog: &Catalog, weights: &Dimensions) -> Analysis {
    let text = signal.match_text();
    let signal_type = rules::classify(&text);

    let mut matches = match_categories(&text, catalog);
    let strategic_alignment = alignment(matches.first().map(|m| m.relevance));
    if matches.is_empty() {
        // Keep every persisted analysis actionable by at least one owner.
        if let Some(fb) = catalog.fallback() {
            matches.push(CategoryMatch {
                category_id: fb.id.clone(),
                relevance: 0.0,
            });
        }
    }

    let base = baseline(signal_type);
    let dimension_scores = DimensionScores {
        revenue_impact: base.revenue_impact,
        time_sensitivity: base.time_sensitivity,
        strategic_alignment,
        competitive_pressure: base.competitive_pressure,
    };

    let names = category_names(&matches, catalog);
    let what_summary = if signal.summary.trim().is_empty() {
        signal.title.clone()
    } else {
        signal.summary.clone()
    };

    Analysis {
        signal_id: signal.id,
        signal_type,
        composite: composite(&dimension_scores, weights),
        headline: signal.title.clone(),
        what_summary,
        why_it_matters: why_it_matters(
            signal_type,
            &names,
            catalog.strategy.production_hub.as_deref(),
        ),
        quick_win: quick_win(signal_type).to_string(),
        suggested_owner: suggested_owner(signal_type).to_string(),
        estimated_impact: estimate_impact(&text, signal_type, dimension_scores.revenue_impact),
        outreach_template: None,
        category_matches: matches,
        dimension_scores,
        analysis_method: AnalysisMethod::Heuristic,
    }
}
