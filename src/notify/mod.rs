//! Digest delivery.
//!
//! `mock` mode writes each message to disk through [`FileDeliverer`]; `smtp`
//! sends through [`EmailDeliverer`]. Either way a failure for one recipient
//! only affects that recipient's receipt.

pub mod email;
pub mod file;

use std::sync::Arc;

use anyhow::Result;

pub use email::EmailDeliverer;
pub use file::FileDeliverer;

use crate::config::{DeliveryMode, RuntimeSettings};
use crate::pipeline::Deliverer;

/// Deliverer for the configured mode. SMTP settings are read from the
/// environment and missing ones fail here, at startup.
pub fn deliverer_for(runtime: &RuntimeSettings) -> Result<Arc<dyn Deliverer>> {
    Ok(match runtime.delivery_mode {
        DeliveryMode::Mock => Arc::new(FileDeliverer::new(runtime.digest_dir.join("outbox"))),
        DeliveryMode::Smtp => Arc::new(EmailDeliverer::from_env()?),
    })
}
