// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    2_000
}
fn default_batch_size() -> usize {
    10
}

/// Reasoning backend settings loaded from `config/ai.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    pub enabled: bool,
    /// "anthropic" | "openai" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// "ENV" means: read from ANTHROPIC_API_KEY / OPENAI_API_KEY (by provider)
    #[serde(default)]
    pub api_key: String,
    /// Provider default when absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Total attempts per request on transient errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles after each transient failure.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Signals per combined scoring request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Override for the provider endpoint (tests, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            api_key: String::new(),
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            batch_size: default_batch_size(),
            base_url: None,
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> anyhow::Result<Self> {
        let mut cfg: AiConfig = serde_json::from_str(data)?;

        // Normalize provider
        cfg.provider = cfg.provider.trim().to_lowercase();
        let key_var = match cfg.provider.as_str() {
            "anthropic" | "claude" => {
                cfg.provider = "anthropic".to_string();
                "ANTHROPIC_API_KEY"
            }
            "openai" => "OPENAI_API_KEY",
            other => anyhow::bail!("Unsupported provider in config: {other}"),
        };

        // Resolve api key if "ENV". A missing key leaves the backend unavailable
        // (heuristic scoring only) rather than failing startup.
        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = env::var(key_var).unwrap_or_default();
            if cfg.enabled && cfg.api_key.is_empty() {
                tracing::warn!(var = key_var, "AI enabled but API key env var is missing");
            }
        }

        // Sanitize numeric knobs
        if cfg.max_retries == 0 {
            cfg.max_retries = 1;
        }
        if cfg.batch_size == 0 {
            cfg.batch_size = default_batch_size();
        }
        if !(0.0..=1.0).contains(&cfg.temperature) {
            cfg.temperature = default_temperature();
        }

        Ok(cfg)
    }

    /// Enabled and holding a key.
    pub fn usable(&self) -> bool {
        self.enabled && !self.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_defaults_and_normalizes_provider() {
        let cfg = AiConfig::from_json_str(r#"{"enabled":true,"provider":"Claude","api_key":"k"}"#)
            .unwrap();
        assert_eq!(cfg.provider, "anthropic");
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.backoff_base_ms, 2_000);
        assert_eq!(cfg.batch_size, 10);
        assert!(cfg.usable());
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(AiConfig::from_json_str(r#"{"enabled":true,"provider":"bard"}"#).is_err());
    }

    #[test]
    fn zero_knobs_are_sanitized() {
        let cfg = AiConfig::from_json_str(
            r#"{"enabled":false,"provider":"openai","max_retries":0,"batch_size":0,"temperature":7.0}"#,
        )
        .unwrap();
        assert_eq!(cfg.max_retries, 1);
        assert_eq!(cfg.batch_size, 10);
        assert!((cfg.temperature - 0.3).abs() < f32::EPSILON);
        assert!(!cfg.usable());
    }
}
