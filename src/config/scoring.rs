//! Scoring rubric (`config/scoring.toml`): four weighted dimensions and the
//! digest thresholds.
//!
//! ```toml
//! [dimensions.revenue_impact]
//! label = "Revenue Impact"
//! weight = 0.35
//! # ... time_sensitivity, strategic_alignment, competitive_pressure
//!
//! [thresholds]
//! include_in_digest = 4.0
//! max_signals_per_digest = 25
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Allowed drift of the weight sum from 1.0.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    RevenueImpact,
    TimeSensitivity,
    StrategicAlignment,
    CompetitivePressure,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::RevenueImpact,
        Dimension::TimeSensitivity,
        Dimension::StrategicAlignment,
        Dimension::CompetitivePressure,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Dimension::RevenueImpact => "revenue_impact",
            Dimension::TimeSensitivity => "time_sensitivity",
            Dimension::StrategicAlignment => "strategic_alignment",
            Dimension::CompetitivePressure => "competitive_pressure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub label: String,
    pub weight: f64,
    #[serde(default)]
    pub description: String,
}

impl DimensionSpec {
    fn new(label: &str, weight: f64) -> Self {
        Self {
            label: label.to_string(),
            weight,
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub revenue_impact: DimensionSpec,
    pub time_sensitivity: DimensionSpec,
    pub strategic_alignment: DimensionSpec,
    pub competitive_pressure: DimensionSpec,
}

impl Dimensions {
    pub fn get(&self, d: Dimension) -> &DimensionSpec {
        match d {
            Dimension::RevenueImpact => &self.revenue_impact,
            Dimension::TimeSensitivity => &self.time_sensitivity,
            Dimension::StrategicAlignment => &self.strategic_alignment,
            Dimension::CompetitivePressure => &self.competitive_pressure,
        }
    }

    pub fn weight(&self, d: Dimension) -> f64 {
        self.get(d).weight
    }
}

fn default_include() -> f64 {
    4.0
}
fn default_max_signals() -> usize {
    25
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_include")]
    pub include_in_digest: f64,
    #[serde(default = "default_max_signals")]
    pub max_signals_per_digest: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            include_in_digest: default_include(),
            max_signals_per_digest: default_max_signals(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub dimensions: Dimensions,
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            dimensions: Dimensions {
                revenue_impact: DimensionSpec::new("Revenue Impact", 0.35),
                time_sensitivity: DimensionSpec::new("Time Sensitivity", 0.25),
                strategic_alignment: DimensionSpec::new("Strategic Alignment", 0.25),
                competitive_pressure: DimensionSpec::new("Competitive Pressure", 0.15),
            },
            thresholds: Thresholds::default(),
        }
    }
}

impl ScoringConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading scoring config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing scoring config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: ScoringConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Weights must each be in [0,1] and sum to 1.0; thresholds must be usable.
    pub fn validate(&self) -> Result<()> {
        let mut sum = 0.0;
        for d in Dimension::ALL {
            let w = self.dimensions.weight(d);
            if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                bail!("weight for {} must be within [0, 1], got {w}", d.id());
            }
            sum += w;
        }
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            bail!("scoring weights must sum to 1.0, got {sum:.4}");
        }
        let t = &self.thresholds;
        if !t.include_in_digest.is_finite() || !(0.0..=10.0).contains(&t.include_in_digest) {
            bail!(
                "include_in_digest must be within [0, 10], got {}",
                t.include_in_digest
            );
        }
        if t.max_signals_per_digest == 0 {
            bail!("max_signals_per_digest must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [dimensions.revenue_impact]
        label = "Revenue Impact"
        weight = 0.4
        [dimensions.time_sensitivity]
        label = "Time Sensitivity"
        weight = 0.2
        [dimensions.strategic_alignment]
        label = "Strategic Alignment"
        weight = 0.2
        [dimensions.competitive_pressure]
        label = "Competitive Pressure"
        weight = 0.2
    "#;

    #[test]
    fn default_weights_are_valid() {
        ScoringConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_with_default_thresholds() {
        let cfg = ScoringConfig::from_toml_str(SAMPLE).unwrap();
        assert!((cfg.dimensions.weight(Dimension::RevenueImpact) - 0.4).abs() < 1e-9);
        assert_eq!(cfg.thresholds, Thresholds::default());
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let bad = SAMPLE.replace("weight = 0.4", "weight = 0.5");
        let err = ScoringConfig::from_toml_str(&bad).unwrap_err();
        assert!(format!("{err:#}").contains("sum to 1.0"));
    }

    #[test]
    fn rejects_zero_digest_cap() {
        let bad = format!("{SAMPLE}\n[thresholds]\nmax_signals_per_digest = 0\n");
        assert!(ScoringConfig::from_toml_str(&bad).is_err());
    }
}
