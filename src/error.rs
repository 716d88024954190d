//! Error types returned across the library surface.
//!
//! Fetch and rule failures are absorbed inside the cache and the compiler; what
//! reaches the request layer is limited to contract violations and startup
//! configuration problems.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// The service was asked for a window without any channel to read.
    #[error("no channels configured")]
    NoChannels,

    /// Requested look-back must be at least one hour.
    #[error("invalid period: {hours} hours")]
    InvalidPeriod { hours: i64 },

    /// Rule source could not be read.
    #[error("rule source error: {0}")]
    RuleSource(String),

    #[error("config error: {0}")]
    Config(String),
}

impl MonitorError {
    /// Static label for metrics and HTTP mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoChannels => "no_channels",
            Self::InvalidPeriod { .. } => "invalid_period",
            Self::RuleSource(_) => "rule_source",
            Self::Config(_) => "config",
        }
    }

    /// True for errors caused by the caller's request rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidPeriod { .. })
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
