// src/analyze/mod.rs
//! Scoring engine: one signal in, one typed [`Analysis`] out.
//!
//! Two strategies share the contract. The remote path asks a reasoning backend
//! and pushes its JSON through [`validate`]; the heuristic path is keyword-based
//! and always available. [`engine::ScoringEngine`] tries remote first and falls
//! back explicitly on a [`ScoreOutcome`].

pub mod ai_adapter;
pub mod engine;
pub mod heuristic;
pub mod prompts;
pub mod rules;
pub mod scoring;
pub mod validate;

use serde::{Deserialize, Serialize};

pub use crate::analyze::engine::ScoringEngine;
pub use crate::analyze::scoring::composite;

/// Closed set of signal classifications.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SignalType {
    CompetitiveThreat,
    RevenueOpportunity,
    #[default]
    MarketShift,
    PartnershipSignal,
    CustomerIntelligence,
    TechnologyTrend,
    TradeTariff,
}

impl SignalType {
    pub const ALL: [SignalType; 7] = [
        SignalType::CompetitiveThreat,
        SignalType::RevenueOpportunity,
        SignalType::MarketShift,
        SignalType::PartnershipSignal,
        SignalType::CustomerIntelligence,
        SignalType::TechnologyTrend,
        SignalType::TradeTariff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::CompetitiveThreat => "competitive-threat",
            SignalType::RevenueOpportunity => "revenue-opportunity",
            SignalType::MarketShift => "market-shift",
            SignalType::PartnershipSignal => "partnership-signal",
            SignalType::CustomerIntelligence => "customer-intelligence",
            SignalType::TechnologyTrend => "technology-trend",
            SignalType::TradeTariff => "trade-tariff",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(s))
    }

    /// Human label for reports ("competitive-threat" -> "Competitive Threat").
    pub fn label(&self) -> String {
        self.as_str()
            .split('-')
            .map(|w| {
                let mut c = w.chars();
                match c.next() {
                    Some(f) => f.to_ascii_uppercase().to_string() + c.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMatch {
    pub category_id: String,
    /// 0.0 ..= 1.0
    pub relevance: f64,
}

/// Four rubric scores, each an integer in 1..=10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub revenue_impact: u8,
    pub time_sensitivity: u8,
    pub strategic_alignment: u8,
    pub competitive_pressure: u8,
}

impl DimensionScores {
    pub fn get(&self, d: crate::config::Dimension) -> u8 {
        use crate::config::Dimension;
        match d {
            Dimension::RevenueImpact => self.revenue_impact,
            Dimension::TimeSensitivity => self.time_sensitivity,
            Dimension::StrategicAlignment => self.strategic_alignment,
            Dimension::CompetitivePressure => self.competitive_pressure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMethod {
    Heuristic,
    Ai,
    AiBatch,
}

impl AnalysisMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMethod::Heuristic => "heuristic",
            AnalysisMethod::Ai => "ai",
            AnalysisMethod::AiBatch => "ai-batch",
        }
    }
}

/// Normalized scoring result for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub signal_id: i64,
    pub signal_type: SignalType,
    /// Never empty once persisted; sorted by relevance descending.
    pub category_matches: Vec<CategoryMatch>,
    pub dimension_scores: DimensionScores,
    /// Weighted sum of the dimension scores, 2 decimals.
    pub composite: f64,
    pub headline: String,
    pub what_summary: String,
    pub why_it_matters: String,
    pub quick_win: String,
    pub suggested_owner: String,
    pub estimated_impact: String,
    #[serde(default)]
    pub outreach_template: Option<String>,
    pub analysis_method: AnalysisMethod,
}

impl Analysis {
    pub fn top_category(&self) -> Option<&CategoryMatch> {
        self.category_matches.first()
    }
}

/// Outcome of the remote path. The engine matches on this to decide whether
/// the heuristic runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Scored(Analysis),
    /// Backend disabled, unreachable, or retries exhausted.
    Unavailable,
    /// The backend answered but the payload was rejected.
    Invalid(String),
}
