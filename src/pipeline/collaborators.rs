//! Narrow interfaces to the stages the orchestrator drives but does not own.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyze::Analysis;
use crate::config::{Catalog, Recipient};
use crate::signal::{CollectedSignal, Signal};
use crate::trends::NotableTrend;

#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;
    async fn collect(&self) -> Result<Vec<CollectedSignal>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLevel {
    Verified,
    Likely,
    Unverified,
}

impl VerificationLevel {
    /// The originating publisher counts as one source.
    pub fn from_source_count(n: usize) -> Self {
        match n {
            n if n >= 3 => VerificationLevel::Verified,
            2 => VerificationLevel::Likely,
            _ => VerificationLevel::Unverified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub level: VerificationLevel,
    pub source_count: usize,
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, signal: &Signal) -> Result<Validation>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedDigest {
    pub subject: String,
    pub html: String,
    pub generated_at: DateTime<Utc>,
}

pub trait Composer: Send + Sync {
    /// `entries` arrive ranked, highest composite first.
    fn compose(
        &self,
        entries: &[(Signal, Analysis)],
        notable: &[NotableTrend],
        catalog: &Catalog,
        now: DateTime<Utc>,
    ) -> Result<ComposedDigest>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryReceipt {
    pub recipient: String,
    pub delivered: bool,
    /// Message id, output path or error text.
    pub detail: String,
}

impl DeliveryReceipt {
    pub fn sent(recipient: &Recipient, detail: impl Into<String>) -> Self {
        Self {
            recipient: recipient.email.clone(),
            delivered: true,
            detail: detail.into(),
        }
    }

    pub fn failed(recipient: &Recipient, detail: impl Into<String>) -> Self {
        Self {
            recipient: recipient.email.clone(),
            delivered: false,
            detail: detail.into(),
        }
    }
}

#[async_trait]
pub trait Deliverer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, digest: &ComposedDigest, recipient: &Recipient) -> Result<DeliveryReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_levels() {
        assert_eq!(VerificationLevel::from_source_count(0), VerificationLevel::Unverified);
        assert_eq!(VerificationLevel::from_source_count(1), VerificationLevel::Unverified);
        assert_eq!(VerificationLevel::from_source_count(2), VerificationLevel::Likely);
        assert_eq!(VerificationLevel::from_source_count(5), VerificationLevel::Verified);
    }
}
