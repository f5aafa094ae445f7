// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod collect;
pub mod compose;
pub mod config;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod schedule;
pub mod signal;
pub mod store;
pub mod trends;

// Scoring engine, batch coordinator and reasoning backends
pub mod analyze;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use crate::api::{create_router, AppState};
pub use crate::pipeline::{Pipeline, PipelineControl, PipelineController};
