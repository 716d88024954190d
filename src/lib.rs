// src/lib.rs
// Public library surface for integration tests (and the Shuttle binary).

pub mod aggregate;
pub mod api;
pub mod classify;
pub mod clock;
pub mod coalesce;
pub mod compiler;
pub mod config;
pub mod error;
pub mod highlight;
pub mod ingest;
pub mod matcher;
pub mod metrics;
pub mod rules;
pub mod service;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::MonitorConfig;
pub use crate::error::{MonitorError, MonitorResult};
pub use crate::service::MonitorService;
