//! Error types for the monitor's jobs.

use chrono::NaiveDate;
use thiserror::Error;

use crate::data::ProviderError;

/// Result type alias using the monitor error type.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Failures of ingestion, reconciliation and screening runs.
///
/// A date that already has rows is not an error; see `IngestOutcome`.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Upstream data unavailable; the next scheduled cycle retries
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// No known trading date within the search window
    #[error("No trading date found in the {attempts} days up to {anchor}")]
    CalendarResolution { anchor: NaiveDate, attempts: u32 },

    /// Durable store failure; the transaction was rolled back
    #[error("Storage transaction failed: {0}")]
    Transaction(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MonitorError {
    /// Wrap a storage error, keeping its context chain in the message.
    pub fn transaction(err: anyhow::Error) -> Self {
        Self::Transaction(format!("{:#}", err))
    }

    /// Whether the next cycle may succeed without intervention.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_recoverable(),
            Self::Transaction(_) => true,
            Self::CalendarResolution { .. } | Self::Config(_) => false,
        }
    }

    /// Get HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Provider(_) => 503,
            Self::CalendarResolution { .. } => 422,
            Self::Transaction(_) | Self::Config(_) => 500,
        }
    }

    /// Short reason safe to show to API clients.
    pub fn public_message(&self) -> String {
        match self {
            Self::Provider(_) => "Market data provider unavailable, retry later".into(),
            Self::CalendarResolution { anchor, attempts } => format!(
                "No trading date found in the {} days up to {}; sync the trading calendar",
                attempts, anchor
            ),
            Self::Transaction(_) => "Storage failure, nothing was written".into(),
            Self::Config(_) => "Service misconfigured".into(),
        }
    }
}
