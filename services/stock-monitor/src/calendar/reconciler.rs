//! Trading calendar reconciliation.
//!
//! Makes the stored calendar equal to the provider's current set of trading
//! dates by applying only the difference.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::data::{LocalStorage, MarketDataProvider, TradingCalendarCache};
use crate::error::{MonitorError, Result};

/// Result of a reconcile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The delta was written in one transaction
    Applied { added: usize, removed: usize },
    /// Store already matched the provider; nothing was written
    Unchanged,
    /// Provider returned no dates; nothing was written
    ProviderEmpty,
}

impl ReconcileOutcome {
    /// `(added, removed)`; zero for the non-mutating outcomes.
    pub fn counts(&self) -> (usize, usize) {
        match self {
            Self::Applied { added, removed } => (*added, *removed),
            Self::Unchanged | Self::ProviderEmpty => (0, 0),
        }
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied { added, removed } => {
                write!(f, "Trading calendar updated: +{} / -{}", added, removed)
            }
            Self::Unchanged => write!(f, "Trading calendar already up to date"),
            Self::ProviderEmpty => write!(f, "Provider returned no trading dates, calendar left as is"),
        }
    }
}

/// Dates to add and remove so that `stored` becomes `provided`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarDelta {
    pub to_add: Vec<NaiveDate>,
    pub to_remove: Vec<NaiveDate>,
}

impl CalendarDelta {
    pub fn between(provided: &BTreeSet<NaiveDate>, stored: &BTreeSet<NaiveDate>) -> Self {
        Self {
            to_add: provided.difference(stored).copied().collect(),
            to_remove: stored.difference(provided).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Reconciles the stored trading calendar against the provider.
pub struct CalendarReconciler {
    provider: Arc<dyn MarketDataProvider>,
    storage: Arc<LocalStorage>,
    /// Invalidated after every mutating reconcile
    calendar_cache: Option<Arc<TradingCalendarCache>>,
}

impl CalendarReconciler {
    pub fn new(provider: Arc<dyn MarketDataProvider>, storage: Arc<LocalStorage>) -> Self {
        Self {
            provider,
            storage,
            calendar_cache: None,
        }
    }

    /// Invalidate `cache` whenever the stored calendar changes.
    pub fn with_calendar_cache(mut self, cache: Arc<TradingCalendarCache>) -> Self {
        self.calendar_cache = Some(cache);
        self
    }

    /// Fetch the provider's dates and apply the difference to the store.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let provided = self.provider.get_current_trading_dates().await?;
        if provided.is_empty() {
            warn!(provider = self.provider.name(), "Provider returned no trading dates");
            return Ok(ReconcileOutcome::ProviderEmpty);
        }

        let stored = self
            .storage
            .all_trading_dates()
            .await
            .map_err(MonitorError::transaction)?;

        let delta = CalendarDelta::between(&provided, &stored);
        if delta.is_empty() {
            info!(dates = stored.len(), "Trading calendar unchanged");
            return Ok(ReconcileOutcome::Unchanged);
        }

        let (added, removed) = self
            .storage
            .apply_calendar_delta(&delta.to_add, &delta.to_remove)
            .await
            .map_err(MonitorError::transaction)?;

        if let Some(cache) = &self.calendar_cache {
            cache.invalidate();
        }

        info!(
            provider = self.provider.name(),
            added,
            removed,
            total = provided.len(),
            "Trading calendar reconciled"
        );
        Ok(ReconcileOutcome::Applied { added, removed })
    }
}
