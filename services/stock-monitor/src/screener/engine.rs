//! Screener engine module.
//!
//! Groups stored history by symbol, computes rolling indicators and applies
//! the breakout rule to the latest cross-section.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

use monitor_common::ScreenerSettings;

use super::indicators::RollingIndicatorSet;
use super::rules::{evaluate, Condition, ConditionResult};
use crate::data::{DailySnapshotRow, LocalStorage};

// ============================================================================
// Pure Screen
// ============================================================================

/// Outcome of screening one history.
#[derive(Debug, Clone, Default)]
pub struct ScreenOutcome {
    /// Date of the latest cross-section, `None` for an empty history
    pub trade_date: Option<NaiveDate>,
    /// Qualifying latest rows, in cross-section order
    pub candidates: Vec<DailySnapshotRow>,
    /// Symbols evaluated (those present in the latest cross-section)
    pub evaluated: usize,
    /// Per-condition pass counts over the evaluated symbols
    pub condition_results: Vec<ConditionResult>,
}

/// Screen a history and return the qualifying latest rows.
pub fn screen(history: &[DailySnapshotRow]) -> Vec<DailySnapshotRow> {
    screen_history(history).candidates
}

/// Screen a history, keeping per-condition diagnostics.
///
/// Only symbols that appear on the latest date are evaluated, each on its own
/// latest observation.
pub fn screen_history(history: &[DailySnapshotRow]) -> ScreenOutcome {
    let Some(latest) = history.iter().map(|r| r.trade_date).max() else {
        return ScreenOutcome::default();
    };

    let mut by_symbol: HashMap<&str, Vec<&DailySnapshotRow>> = HashMap::new();
    for row in history {
        by_symbol.entry(row.symbol.as_str()).or_default().push(row);
    }
    for series in by_symbol.values_mut() {
        series.sort_by_key(|r| r.trade_date);
    }

    let mut seen = HashSet::new();
    let cross_section: Vec<&str> = history
        .iter()
        .filter(|r| r.trade_date == latest)
        .map(|r| r.symbol.as_str())
        .filter(|s| seen.insert(*s))
        .collect();

    let mut passed: HashMap<Condition, usize> = HashMap::new();
    let mut candidates = Vec::new();

    for symbol in &cross_section {
        let Some(series) = by_symbol.get(symbol) else {
            continue;
        };
        let closes: Vec<f64> = series.iter().map(|r| r.close).collect();
        let indicators = RollingIndicatorSet::compute(&closes);
        let last = series.len() - 1;
        let conditions = evaluate(series, &indicators, last);

        for condition in Condition::ALL {
            if conditions.get(condition) {
                *passed.entry(condition).or_default() += 1;
            }
        }

        if conditions.qualifies() {
            candidates.push(series[last].clone());
        }
    }

    let evaluated = cross_section.len();
    let condition_results = Condition::ALL
        .iter()
        .map(|c| ConditionResult::new(*c, evaluated, passed.get(c).copied().unwrap_or(0)))
        .collect();

    ScreenOutcome {
        trade_date: Some(latest),
        candidates,
        evaluated,
        condition_results,
    }
}

// ============================================================================
// Screener Result
// ============================================================================

/// Result of a screening run over stored history.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenerResult {
    /// Screening ID (timestamp-based)
    pub id: String,
    /// Latest cross-section date
    pub trade_date: Option<NaiveDate>,
    /// Qualifying rows, in cross-section order
    pub stocks: Vec<DailySnapshotRow>,
    /// Per-condition pass counts
    pub condition_results: Vec<ConditionResult>,
    /// Symbols evaluated
    pub total_scanned: usize,
    /// Stored rows loaded
    pub history_rows: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl ScreenerResult {
    /// Summary string for logging.
    pub fn summary(&self) -> String {
        format!(
            "Screened {} stocks in {:.1}s: {} passed ({:.1}%)",
            self.total_scanned,
            self.duration_secs,
            self.stocks.len(),
            if self.total_scanned > 0 {
                (self.stocks.len() as f64 / self.total_scanned as f64) * 100.0
            } else {
                0.0
            }
        )
    }
}

// ============================================================================
// Screener Engine
// ============================================================================

/// Loads history from storage and runs the screen.
pub struct ScreenerEngine {
    storage: Arc<LocalStorage>,
    settings: ScreenerSettings,
}

impl ScreenerEngine {
    pub fn new(storage: Arc<LocalStorage>, settings: ScreenerSettings) -> Self {
        Self { storage, settings }
    }

    /// First date of history to load, counted back from the latest stored date.
    async fn history_start(&self) -> Result<Option<NaiveDate>> {
        let Some(days) = self.settings.history_days else {
            return Ok(None);
        };
        let latest = self.storage.latest_trade_date().await?;
        Ok(latest.map(|d| d - Duration::days(i64::from(days))))
    }

    /// Run the screen over stored history.
    pub async fn run_screen(&self) -> Result<ScreenerResult> {
        let started_at = Utc::now();
        let id = format!("screen_{}", started_at.format("%Y%m%d_%H%M%S"));

        info!(screen_id = %id, "Starting screen");

        let since = self.history_start().await?;
        let history = self
            .storage
            .load_history(since)
            .await
            .context("Failed to load history for screening")?;

        let outcome = screen_history(&history);

        let completed_at = Utc::now();
        let duration_secs = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let result = ScreenerResult {
            id,
            trade_date: outcome.trade_date,
            stocks: outcome.candidates,
            condition_results: outcome.condition_results,
            total_scanned: outcome.evaluated,
            history_rows: history.len(),
            started_at,
            completed_at,
            duration_secs,
        };

        for cr in &result.condition_results {
            info!(condition = %cr.condition, passed = cr.passed, "Condition pass count");
        }
        info!(screen_id = %result.id, "{}", result.summary());

        Ok(result)
    }
}

// ============================================================================
// Tests
// ============================================================================
