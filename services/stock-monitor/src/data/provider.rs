//! Data provider abstraction.
//!
//! Defines the `MarketDataProvider` trait the reconciler and the snapshot
//! cache consume, and the error type every provider maps its failures onto.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fmt;

use super::RawRecord;

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to data providers.
///
/// All variants are treated as a provider fault by the jobs: the current
/// cycle fails and the next scheduled run is the retry.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network error (connection failed, timeout, non-success status)
    Network(String),
    /// Response could not be decoded or reported an upstream error code
    Malformed(String),
    /// Provider is temporarily unavailable
    Unavailable(String),
    /// Invalid request parameters
    InvalidRequest(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Malformed(msg) => write!(f, "Malformed response: {}", msg),
            Self::Unavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Whether a later attempt may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Unavailable(_) | Self::Malformed(_))
    }
}

// ============================================================================
// Market Data Provider Trait
// ============================================================================

/// Upstream source of trading dates and end-of-day cross-sections.
///
/// Either call may legitimately return an empty collection; callers treat
/// that as "no data right now", never as "no trading data exists".
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logging (e.g., "eastmoney")
    fn name(&self) -> &'static str;

    /// The provider's current set of trading dates.
    async fn get_current_trading_dates(&self) -> Result<BTreeSet<NaiveDate>, ProviderError>;

    /// The latest full-market cross-section, keyed by localized column names.
    async fn get_latest_cross_section(&self) -> Result<Vec<RawRecord>, ProviderError>;
}

// ============================================================================
// Tests
// ============================================================================
