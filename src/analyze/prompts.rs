//! Prompt text for the reasoning backend.
//!
//! The system prompt carries the catalogue and strategic context and is built
//! once per engine. User prompts carry one signal (or a batch) plus the rubric
//! and the output schema.

use std::fmt::Write as _;

use super::SignalType;
use crate::config::{Catalog, Dimension, Dimensions};
use crate::signal::Signal;

const SINGLE_SUMMARY_CHARS: usize = 3000;
const BATCH_SUMMARY_CHARS: usize = 500;

pub fn system_prompt(catalog: &Catalog) -> String {
    let mut s = String::from(
        "You are a strategic intelligence analyst. You analyze industry signals and turn \
         them into actionable intelligence for the business teams described below.\n\n\
         ## Business Categories\n\n",
    );
    for c in catalog.active() {
        let competitors = if c.competitors.is_empty() {
            "N/A".to_string()
        } else {
            c.competitors.join(", ")
        };
        let _ = writeln!(
            s,
            "- **{}** (id: {}): Keywords: {}. Products: {}. Industries: {}. Competitors: {}.",
            c.name,
            c.id,
            c.keywords.join(", "),
            c.products.join(", "),
            c.industries.join(", "),
            competitors
        );
    }

    let strategy = &catalog.strategy;
    s.push_str("\n## Strategic Context\n\n");
    if let Some(hub) = &strategy.production_hub {
        let _ = writeln!(s, "- **Production Hub:** {hub}");
    }
    if !strategy.target_accounts.is_empty() {
        let _ = writeln!(
            s,
            "- **Target Accounts:** {}",
            strategy.target_accounts.join(", ")
        );
    }
    if !strategy.monitoring_priorities.is_empty() {
        s.push_str("\n## Monitoring Priorities\n\n");
        for p in &strategy.monitoring_priorities {
            let _ = writeln!(s, "- {p}");
        }
    }

    let competitors = catalog.competitors.join(", ");
    if !competitors.is_empty() {
        let _ = write!(s, "\n## Key Competitors\n\n{competitors}\n");
    }

    s.push_str(
        "\n## Analysis Requirements\n\n\
         1. Every signal MUST map to at least one business category id listed above\n\
         2. Every signal MUST include a specific, executable action for this week\n\
         3. Scoring must be objective and evidence-based\n\
         4. Actions must name a specific owner role\n\
         5. Revenue impact estimates must be realistic and grounded\n",
    );
    s
}

fn signal_types() -> String {
    SignalType::ALL
        .iter()
        .map(|t| format!("\"{}\"", t.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn dimensions_block(dims: &Dimensions, with_descriptions: bool) -> String {
    let mut s = String::new();
    for d in Dimension::ALL {
        let spec = dims.get(d);
        if with_descriptions && !spec.description.is_empty() {
            let _ = writeln!(
                s,
                "- **{}** (weight: {}, id: {}): {}",
                spec.label,
                spec.weight,
                d.id(),
                spec.description
            );
        } else {
            let _ = writeln!(s, "- {} (id: {}, weight: {})", spec.label, d.id(), spec.weight);
        }
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn published(signal: &Signal) -> String {
    signal
        .published_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "Unknown".to_string())
}

pub fn signal_prompt(signal: &Signal, dims: &Dimensions) -> String {
    let summary = if signal.summary.is_empty() {
        "No summary available".to_string()
    } else {
        truncate(&signal.summary, SINGLE_SUMMARY_CHARS)
    };
    format!(
        "Analyze this industry signal and produce a structured intelligence assessment.\n\n\
         ## Signal Data\n\n\
         **Title:** {title}\n\
         **Source:** {source} (Tier {tier})\n\
         **URL:** {url}\n\
         **Published:** {published}\n\
         **Summary:** {summary}\n\n\
         ## Scoring Dimensions\n\n\
         {dims}\n\
         ## Required Output\n\n\
         Return a single JSON object with exactly these fields:\n\n\
         ```json\n\
         {{\n  \
           \"signal_type\": \"<one of: {types}>\",\n  \
           \"category_matches\": [{{\"category_id\": \"<category id>\", \"relevance\": <0.0-1.0>}}],\n  \
           \"scores\": {{\"revenue_impact\": <1-10>, \"time_sensitivity\": <1-10>, \"strategic_alignment\": <1-10>, \"competitive_pressure\": <1-10>}},\n  \
           \"headline\": \"<concise action-oriented headline, max 100 chars>\",\n  \
           \"what_summary\": \"<2-3 sentence factual summary>\",\n  \
           \"why_it_matters\": \"<2-3 sentences on relevance to the matched categories>\",\n  \
           \"quick_win\": \"<one specific action to take THIS WEEK>\",\n  \
           \"suggested_owner\": \"<specific role>\",\n  \
           \"estimated_impact\": \"<revenue range, e.g. '$200K-$500K'>\",\n  \
           \"outreach_template\": \"<short outreach draft for revenue or partnership signals, otherwise null>\"\n\
         }}\n\
         ```\n\n\
         Rules:\n\
         - category_matches MUST contain at least one entry\n\
         - All score values must be integers from 1 to 10\n\
         - Return ONLY the JSON object, no additional text",
        title = signal.title,
        source = signal.source_id,
        tier = signal.source_tier,
        url = signal.url,
        published = published(signal),
        summary = summary,
        dims = dimensions_block(dims, true),
        types = signal_types(),
    )
}

pub fn batch_prompt(signals: &[Signal], dims: &Dimensions) -> String {
    let mut blocks = String::new();
    for (i, signal) in signals.iter().enumerate() {
        let summary = if signal.summary.is_empty() {
            "No summary".to_string()
        } else {
            truncate(&signal.summary, BATCH_SUMMARY_CHARS)
        };
        let _ = write!(
            blocks,
            "### Signal {}\n**Title:** {}\n**Source:** {} (Tier {})\n**URL:** {}\n**Summary:** {}\n\n",
            i + 1,
            signal.title,
            signal.source_id,
            signal.source_tier,
            signal.url,
            summary
        );
    }
    format!(
        "Analyze these {n} industry signals and produce structured intelligence for each.\n\n\
         ## Signals\n\n{blocks}\
         ## Scoring Dimensions\n\n{dims}\n\
         ## Required Output\n\n\
         Return a JSON array with exactly {n} objects, one per signal, in the same order. Each object must have:\n\
         - signal_type: one of {types}\n\
         - category_matches: array of {{\"category_id\": \"<id>\", \"relevance\": <0-1>}}\n\
         - scores: {{\"revenue_impact\": <1-10>, \"time_sensitivity\": <1-10>, \"strategic_alignment\": <1-10>, \"competitive_pressure\": <1-10>}}\n\
         - headline, what_summary, why_it_matters, quick_win, suggested_owner, estimated_impact\n\
         - outreach_template: outreach draft or null\n\n\
         Return ONLY a JSON array, no additional text.",
        n = signals.len(),
        blocks = blocks,
        dims = dimensions_block(dims, false),
        types = signal_types(),
    )
}
