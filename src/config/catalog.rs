//! Category catalogue (`config/catalog.toml`).
//!
//! TOML shape:
//! ```toml
//! fallback_category = "force-sensors"
//! competitors = ["Kistler", "HBK"]
//!
//! [strategy]
//! target_accounts = ["Acme Robotics"]
//! monitoring_priorities = ["Humanoid robot supply chain"]
//!
//! [[categories]]
//! id = "force-sensors"
//! name = "Force Sensors"
//! keywords = ["force sensor", "load cell"]
//! products = ["strain gage"]
//! industries = ["robotics"]
//! competitors = ["Flintec"]
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default = "yes")]
    pub active: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub competitors: Vec<String>,
}

impl Category {
    /// Keywords, products and industries in that order: the heuristic vocabulary.
    pub fn vocabulary(&self) -> impl Iterator<Item = &String> {
        self.keywords
            .iter()
            .chain(self.products.iter())
            .chain(self.industries.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategicContext {
    #[serde(default)]
    pub production_hub: Option<String>,
    #[serde(default)]
    pub target_accounts: Vec<String>,
    #[serde(default)]
    pub monitoring_priorities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub categories: Vec<Category>,
    /// Category attached when nothing in the vocabulary matches. Defaults to the
    /// first active category.
    #[serde(default)]
    pub fallback_category: Option<String>,
    #[serde(default)]
    pub strategy: StrategicContext,
    /// Company-wide competitor names, on top of the per-category lists.
    #[serde(default)]
    pub competitors: Vec<String>,
}

impl Catalog {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading category catalogue from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing category catalogue {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let catalog: Catalog = toml::from_str(s)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// A catalogue without an active category cannot make any signal actionable.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for c in &self.categories {
            if c.id.trim().is_empty() {
                bail!("category with empty id");
            }
            if !seen.insert(c.id.as_str()) {
                bail!("duplicate category id '{}'", c.id);
            }
        }
        if self.active().next().is_none() {
            bail!("category catalogue has no active categories");
        }
        if let Some(fb) = &self.fallback_category {
            match self.get(fb) {
                Some(c) if c.active => {}
                Some(_) => bail!("fallback category '{fb}' is not active"),
                None => bail!("fallback category '{fb}' is not in the catalogue"),
            }
        }
        Ok(())
    }

    pub fn active(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter().filter(|c| c.active)
    }

    pub fn get(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Display name for a category id; unknown ids are shown as-is.
    pub fn name_of<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map(|c| c.name.as_str()).unwrap_or(id)
    }

    pub fn fallback(&self) -> Option<&Category> {
        match &self.fallback_category {
            Some(id) => self.get(id).filter(|c| c.active),
            None => self.active().next(),
        }
    }

    /// Every competitor name (global + per active category), lowercased, deduplicated.
    pub fn competitor_names(&self) -> Vec<String> {
        let mut set = BTreeSet::new();
        let per_category = self.active().flat_map(|c| c.competitors.iter());
        for name in self.competitors.iter().chain(per_category) {
            let t = name.trim().to_lowercase();
            if !t.is_empty() {
                set.insert(t);
            }
        }
        set.into_iter().collect()
    }

    /// Configured spelling of a competitor given its lowercased name.
    pub fn competitor_display(&self, lowercase: &str) -> Option<&str> {
        let per_category = self.active().flat_map(|c| c.competitors.iter());
        self.competitors
            .iter()
            .chain(per_category)
            .map(|n| n.trim())
            .find(|n| n.to_lowercase() == lowercase)
    }
}
