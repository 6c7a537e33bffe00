//! Market data module for A-shares.
//!
//! Provides the canonical end-of-day row type, the provider abstraction,
//! payload cleaning, the SQLite store and the cache tiers in front of it.
//!
//! # Layers
//! - **provider / eastmoney**: raw cross-sections and trading dates from upstream
//! - **clean**: localized raw payload → canonical [`DailySnapshotRow`]s
//! - **snapshot_cache**: file tier + remote tier read-through cache
//! - **cache**: single-slot in-memory trading calendar
//! - **local_storage**: durable trading calendar and snapshot tables

mod cache;
pub mod clean;
mod eastmoney;
pub mod local_storage;
mod provider;
pub mod snapshot_cache;

pub use cache::{CalendarCacheStats, TradingCalendarCache};
pub use clean::{clean_snapshot, canonical_field, LOCALIZED_FIELDS};
pub use eastmoney::EastmoneyAdapter;
pub use local_storage::{LocalStorage, LocalStorageConfig, LocalStorageStats, SnapshotInsert};
pub use provider::{MarketDataProvider, ProviderError};
pub use snapshot_cache::{SnapshotCache, SnapshotFetch, SnapshotFileStore, SnapshotSource};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One record of a raw provider payload, keyed by the provider's
/// (localized) column names.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Date format used in storage, cache files and JSON.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Compact date format used in cache file names.
pub const COMPACT_DATE_FORMAT: &str = "%Y%m%d";

// ============================================================================
// Core Data Types
// ============================================================================

/// One symbol's end-of-day figures for one trading date.
///
/// `(symbol, trade_date)` is unique in storage and a row is written at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshotRow {
    /// Stock code (e.g. "600519"), trimmed and never blank
    pub symbol: String,
    /// Trading date the figures belong to
    pub trade_date: NaiveDate,
    /// Stock name
    pub name: String,
    /// Latest / closing price
    pub close: f64,
    /// Change percent vs. previous close
    pub change_percent: f64,
    /// Change amount vs. previous close
    pub change_amount: f64,
    /// Volume (lots)
    pub volume: f64,
    /// Turnover in currency
    pub turnover_value: f64,
    /// Intraday amplitude (%)
    pub amplitude: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub yesterday_close: f64,
    /// Turnover ratio (%)
    pub turnover_ratio: f64,
    /// Dynamic P/E
    pub pe_ttm: f64,
    pub pb: f64,
    /// Total market value
    pub market_value: f64,
    /// Free-float market value
    pub circulation_market_value: f64,
    pub rise_speed: f64,
    pub five_minute_change: f64,
    pub sixty_day_change_percent: f64,
    pub year_to_date_change_percent: f64,
}

impl DailySnapshotRow {
    /// A row with every numeric field at zero.
    pub fn empty(symbol: impl Into<String>, name: impl Into<String>, trade_date: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            trade_date,
            name: name.into(),
            close: 0.0,
            change_percent: 0.0,
            change_amount: 0.0,
            volume: 0.0,
            turnover_value: 0.0,
            amplitude: 0.0,
            high: 0.0,
            low: 0.0,
            open: 0.0,
            yesterday_close: 0.0,
            turnover_ratio: 0.0,
            pe_ttm: 0.0,
            pb: 0.0,
            market_value: 0.0,
            circulation_market_value: 0.0,
            rise_speed: 0.0,
            five_minute_change: 0.0,
            sixty_day_change_percent: 0.0,
            year_to_date_change_percent: 0.0,
        }
    }

    /// Whether any price field is negative.
    pub fn has_negative_price(&self) -> bool {
        [self.close, self.open, self.high, self.low, self.yesterday_close]
            .iter()
            .any(|p| *p < 0.0)
    }

    /// Day-over-day change of `close` relative to `yesterday_close`.
    pub fn day_change_ratio(&self) -> Option<f64> {
        if self.yesterday_close > 0.0 {
            Some((self.close - self.yesterday_close) / self.yesterday_close)
        } else {
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_day_change_ratio() {
        let mut row = DailySnapshotRow::empty("600519", "贵州茅台", date("2024-01-05"));
        row.yesterday_close = 100.0;
        row.close = 106.0;
        assert!((row.day_change_ratio().unwrap() - 0.06).abs() < 1e-9);

        row.yesterday_close = 0.0;
        assert!(row.day_change_ratio().is_none());
    }

    #[test]
    fn test_negative_price_detection() {
        let mut row = DailySnapshotRow::empty("000001", "平安银行", date("2024-01-05"));
        assert!(!row.has_negative_price());
        row.low = -0.01;
        assert!(row.has_negative_price());
    }

    #[test]
    fn test_row_json_uses_iso_dates() {
        let row = DailySnapshotRow::empty("000001", "平安银行", date("2024-01-05"));
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["trade_date"], "2024-01-05");
        let back: DailySnapshotRow = serde_json::from_value(json).unwrap();
        assert_eq!(back, row);
    }
}
