//! Signal records: what collectors hand us, and what the pipeline tracks.
//!
//! Collected text is normalized before it is hashed so that the same item seen
//! through two feeds with different markup still lands on one `external_id`.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const TITLE_MAX_CHARS: usize = 300;
const SUMMARY_MAX_CHARS: usize = 1500;

/// Lifecycle of a signal through the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    New,
    Validated,
    Scored,
    Published,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::New => "new",
            SignalStatus::Validated => "validated",
            SignalStatus::Scored => "scored",
            SignalStatus::Published => "published",
        }
    }
}

/// Raw item as produced by a collector, before it has a row id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedSignal {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub url: String,
    pub source_id: String,
    #[serde(default = "default_tier")]
    pub source_tier: u8,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

fn default_tier() -> u8 {
    2
}

impl CollectedSignal {
    /// Normalize title/summary in place (entities, tags, whitespace, length caps).
    pub fn normalized(mut self) -> Self {
        self.title = cap_chars(normalize_text(&self.title), TITLE_MAX_CHARS);
        self.summary = cap_chars(normalize_text(&self.summary), SUMMARY_MAX_CHARS);
        self.url = self.url.trim().to_string();
        self
    }

    /// Stable dedup key: content hash of (url, title).
    pub fn external_id(&self) -> String {
        external_id_for(&self.url, &self.title)
    }
}

/// A tracked signal. Immutable once collected apart from `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub source_id: String,
    pub source_tier: u8,
    pub published_at: Option<DateTime<Utc>>,
    pub status: SignalStatus,
}

impl Signal {
    /// Lowercased `title summary`, the text every keyword matcher runs on.
    pub fn match_text(&self) -> String {
        format!("{} {}", self.title, self.summary).to_lowercase()
    }

    /// Title shortened for log lines.
    pub fn short_title(&self) -> String {
        self.title.chars().take(60).collect()
    }
}

/// Hex SHA-256 of `url` + `title`, truncated to 32 chars.
pub fn external_id_for(url: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(title.trim().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Normalize text: decode entities, strip tags, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

fn cap_chars(s: String, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max).collect()
    } else {
        s
    }
}
