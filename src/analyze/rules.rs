//! Keyword-family classification for the heuristic path.
//!
//! Rules are evaluated in a fixed priority order and the first family with a hit
//! wins: competitive, revenue, tariff, partnership, technology. Nothing matched
//! means market-shift. Matching is a plain substring test on the lowercased
//! `title summary` text, so "launch" also hits "launches".

use super::SignalType;

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub any_contains: &'static [&'static str],
    pub signal_type: SignalType,
}

/// Priority-ordered; reordering changes classification.
pub const RULES: &[Rule] = &[
    Rule {
        name: "competitive",
        any_contains: &["competitor", "competes", "launch", "threat", "rival"],
        signal_type: SignalType::CompetitiveThreat,
    },
    Rule {
        name: "revenue",
        any_contains: &[
            "rfi",
            "rfp",
            "order",
            "partner",
            "revenue",
            "opportunity",
            "seeking",
        ],
        signal_type: SignalType::RevenueOpportunity,
    },
    Rule {
        name: "tariff",
        any_contains: &["tariff", "trade", "duty", "import", "export"],
        signal_type: SignalType::TradeTariff,
    },
    Rule {
        name: "partnership",
        any_contains: &["acqui", "partner", "alliance", "joint venture"],
        signal_type: SignalType::PartnershipSignal,
    },
    Rule {
        name: "technology",
        any_contains: &["patent", "innovation", "breakthrough", "technology"],
        signal_type: SignalType::TechnologyTrend,
    },
];

/// First matching rule, if any. `text` must already be lowercased.
pub fn first_match(text: &str) -> Option<&'static Rule> {
    RULES
        .iter()
        .find(|r| r.any_contains.iter().any(|k| text.contains(k)))
}

/// Signal type for lowercased text.
pub fn classify(text: &str) -> SignalType {
    first_match(text)
        .map(|r| r.signal_type)
        .unwrap_or(SignalType::MarketShift)
}
