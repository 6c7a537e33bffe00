//! Durable storage using SQLite.
//!
//! Holds the two tables the monitor owns:
//! - `trading_calendar`: the set of known trading dates
//! - `stock_data`: one row per `(symbol, trade_date)`, written at most once
//!
//! Every multi-row write runs in a single transaction so that a failure
//! leaves the store exactly as it was.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{DailySnapshotRow, DATE_FORMAT};

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Known trading dates
CREATE TABLE IF NOT EXISTS trading_calendar (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_date TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- End-of-day cross-sections
CREATE TABLE IF NOT EXISTS stock_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    name TEXT NOT NULL,
    close REAL NOT NULL DEFAULT 0,
    change_percent REAL NOT NULL DEFAULT 0,
    change_amount REAL NOT NULL DEFAULT 0,
    volume REAL NOT NULL DEFAULT 0,
    turnover_value REAL NOT NULL DEFAULT 0,
    amplitude REAL NOT NULL DEFAULT 0,
    high REAL NOT NULL DEFAULT 0,
    low REAL NOT NULL DEFAULT 0,
    open REAL NOT NULL DEFAULT 0,
    yesterday_close REAL NOT NULL DEFAULT 0,
    turnover_ratio REAL NOT NULL DEFAULT 0,
    pe_ttm REAL NOT NULL DEFAULT 0,
    pb REAL NOT NULL DEFAULT 0,
    market_value REAL NOT NULL DEFAULT 0,
    circulation_market_value REAL NOT NULL DEFAULT 0,
    rise_speed REAL NOT NULL DEFAULT 0,
    five_minute_change REAL NOT NULL DEFAULT 0,
    sixty_day_change_percent REAL NOT NULL DEFAULT 0,
    year_to_date_change_percent REAL NOT NULL DEFAULT 0,
    update_time TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(symbol, trade_date)
);

CREATE INDEX IF NOT EXISTS idx_stock_data_trade_date
ON stock_data(trade_date);
"#;

const SNAPSHOT_COLUMNS: &str = "symbol, trade_date, name, close, change_percent, change_amount, \
     volume, turnover_value, amplitude, high, low, open, yesterday_close, turnover_ratio, \
     pe_ttm, pb, market_value, circulation_market_value, rise_speed, five_minute_change, \
     sixty_day_change_percent, year_to_date_change_percent";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for local storage
#[derive(Debug, Clone)]
pub struct LocalStorageConfig {
    /// Path to SQLite database
    pub db_path: PathBuf,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            db_path: monitor_common::config::config_dir().join("stock_monitor.db"),
        }
    }
}

impl From<&monitor_common::StorageConfig> for LocalStorageConfig {
    fn from(config: &monitor_common::StorageConfig) -> Self {
        Self {
            db_path: config.db_path(),
        }
    }
}

/// Result of a write-once snapshot insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotInsert {
    /// Rows were written
    Inserted(usize),
    /// The date already had rows; nothing was written
    AlreadyPresent,
}

// ============================================================================
// Local Storage
// ============================================================================

/// SQLite-backed trading calendar and snapshot store.
pub struct LocalStorage {
    /// rusqlite::Connection is Send but not Sync, hence the Mutex
    db: Arc<Mutex<Connection>>,
    config: LocalStorageConfig,
}

impl LocalStorage {
    /// Open (or create) the database and its tables.
    pub fn new(config: LocalStorageConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(&config.db_path)
            .context("Failed to open local storage database")?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set database pragmas")?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create database tables")?;

        info!(db_path = %config.db_path.display(), "Initialized local storage");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Create with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(LocalStorageConfig::default())
    }

    /// Get the database path
    pub fn db_path(&self) -> &PathBuf {
        &self.config.db_path
    }

    // ========================================================================
    // Trading Calendar Operations
    // ========================================================================

    /// Every persisted trading date.
    pub async fn all_trading_dates(&self) -> Result<BTreeSet<NaiveDate>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT trade_date FROM trading_calendar")?;
        let dates = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        dates.iter().map(|s| parse_date(s)).collect()
    }

    /// The `limit` most recent persisted trading dates.
    pub async fn recent_trading_dates(&self, limit: usize) -> Result<BTreeSet<NaiveDate>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT trade_date FROM trading_calendar ORDER BY trade_date DESC LIMIT ?1",
        )?;
        let dates = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        dates.iter().map(|s| parse_date(s)).collect()
    }

    /// Number of persisted trading dates.
    pub async fn trading_date_count(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let count: i64 =
            db.query_row("SELECT COUNT(*) FROM trading_calendar", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Add trading dates; dates already present are ignored.
    pub async fn add_trading_dates(&self, dates: &[NaiveDate]) -> Result<usize> {
        self.apply_calendar_delta(dates, &[]).await.map(|(added, _)| added)
    }

    /// Remove trading dates; absent dates are ignored.
    pub async fn remove_trading_dates(&self, dates: &[NaiveDate]) -> Result<usize> {
        self.apply_calendar_delta(&[], dates).await.map(|(_, removed)| removed)
    }

    /// Apply additions and removals in one transaction.
    ///
    /// Returns `(added, removed)` row counts. On error nothing is applied.
    pub async fn apply_calendar_delta(
        &self,
        to_add: &[NaiveDate],
        to_remove: &[NaiveDate],
    ) -> Result<(usize, usize)> {
        if to_add.is_empty() && to_remove.is_empty() {
            return Ok((0, 0));
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction().context("Failed to begin calendar transaction")?;

        let mut added = 0;
        {
            let mut insert =
                tx.prepare("INSERT OR IGNORE INTO trading_calendar (trade_date) VALUES (?1)")?;
            for date in to_add {
                added += insert.execute(params![format_date(*date)])?;
            }
        }

        let mut removed = 0;
        {
            let mut delete = tx.prepare("DELETE FROM trading_calendar WHERE trade_date = ?1")?;
            for date in to_remove {
                removed += delete.execute(params![format_date(*date)])?;
            }
        }

        tx.commit().context("Failed to commit calendar transaction")?;

        debug!(added, removed, "Applied trading calendar delta");
        Ok((added, removed))
    }

    // ========================================================================
    // Snapshot Operations
    // ========================================================================

    /// Write a cross-section unless rows for `trade_date` already exist.
    ///
    /// The existence check and the bulk insert share one transaction.
    pub async fn insert_snapshot_if_absent(
        &self,
        trade_date: NaiveDate,
        rows: &[DailySnapshotRow],
    ) -> Result<SnapshotInsert> {
        let date_str = format_date(trade_date);
        let mut db = self.db.lock().await;
        let tx = db.transaction().context("Failed to begin snapshot transaction")?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM stock_data WHERE trade_date = ?1 LIMIT 1",
                params![date_str],
                |row| row.get(0),
            )
            .optional()?;

        if existing.is_some() {
            // Dropping the transaction rolls it back
            return Ok(SnapshotInsert::AlreadyPresent);
        }

        let mut inserted = 0;
        {
            let sql = format!(
                "INSERT INTO stock_data ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
                SNAPSHOT_COLUMNS
            );
            let mut insert = tx.prepare(&sql)?;
            for row in rows {
                inserted += insert
                    .execute(params![
                        row.symbol,
                        date_str,
                        row.name,
                        row.close,
                        row.change_percent,
                        row.change_amount,
                        row.volume,
                        row.turnover_value,
                        row.amplitude,
                        row.high,
                        row.low,
                        row.open,
                        row.yesterday_close,
                        row.turnover_ratio,
                        row.pe_ttm,
                        row.pb,
                        row.market_value,
                        row.circulation_market_value,
                        row.rise_speed,
                        row.five_minute_change,
                        row.sixty_day_change_percent,
                        row.year_to_date_change_percent,
                    ])
                    .with_context(|| format!("Failed to insert {} for {}", row.symbol, date_str))?;
            }
        }

        tx.commit().context("Failed to commit snapshot transaction")?;

        debug!(trade_date = %date_str, inserted, "Saved snapshot to local storage");
        Ok(SnapshotInsert::Inserted(inserted))
    }

    /// Whether any row exists for `trade_date`.
    pub async fn has_snapshot_for(&self, trade_date: NaiveDate) -> Result<bool> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM stock_data WHERE trade_date = ?1",
            params![format_date(trade_date)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// The stored cross-section for `trade_date`, in insertion order.
    pub async fn snapshot_for_date(&self, trade_date: NaiveDate) -> Result<Vec<DailySnapshotRow>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM stock_data WHERE trade_date = ?1 ORDER BY id",
            SNAPSHOT_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(params![format_date(trade_date)], Self::row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The most recent date with stored rows.
    pub async fn latest_trade_date(&self) -> Result<Option<NaiveDate>> {
        let db = self.db.lock().await;
        let latest: Option<String> =
            db.query_row("SELECT MAX(trade_date) FROM stock_data", [], |row| row.get(0))?;
        latest.as_deref().map(parse_date).transpose()
    }

    /// Stored rows on or after `since` (everything when `None`), ordered by
    /// date and then insertion order.
    pub async fn load_history(&self, since: Option<NaiveDate>) -> Result<Vec<DailySnapshotRow>> {
        let db = self.db.lock().await;

        let rows = match since {
            Some(start) => {
                let sql = format!(
                    "SELECT {} FROM stock_data WHERE trade_date >= ?1 ORDER BY trade_date, id",
                    SNAPSHOT_COLUMNS
                );
                let mut stmt = db.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![format_date(start)], Self::row_to_snapshot)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM stock_data ORDER BY trade_date, id",
                    SNAPSHOT_COLUMNS
                );
                let mut stmt = db.prepare(&sql)?;
                let rows = stmt
                    .query_map([], Self::row_to_snapshot)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        Ok(rows)
    }

    fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<DailySnapshotRow> {
        let date_str: String = row.get(1)?;
        let trade_date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(DailySnapshotRow {
            symbol: row.get(0)?,
            trade_date,
            name: row.get(2)?,
            close: row.get(3)?,
            change_percent: row.get(4)?,
            change_amount: row.get(5)?,
            volume: row.get(6)?,
            turnover_value: row.get(7)?,
            amplitude: row.get(8)?,
            high: row.get(9)?,
            low: row.get(10)?,
            open: row.get(11)?,
            yesterday_close: row.get(12)?,
            turnover_ratio: row.get(13)?,
            pe_ttm: row.get(14)?,
            pb: row.get(15)?,
            market_value: row.get(16)?,
            circulation_market_value: row.get(17)?,
            rise_speed: row.get(18)?,
            five_minute_change: row.get(19)?,
            sixty_day_change_percent: row.get(20)?,
            year_to_date_change_percent: row.get(21)?,
        })
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Get database statistics
    pub async fn get_stats(&self) -> Result<LocalStorageStats> {
        let db = self.db.lock().await;

        let trading_days: i64 =
            db.query_row("SELECT COUNT(*) FROM trading_calendar", [], |row| row.get(0))?;
        let snapshot_rows: i64 =
            db.query_row("SELECT COUNT(*) FROM stock_data", [], |row| row.get(0))?;
        let snapshot_dates: i64 = db.query_row(
            "SELECT COUNT(DISTINCT trade_date) FROM stock_data",
            [],
            |row| row.get(0),
        )?;
        let unique_symbols: i64 = db.query_row(
            "SELECT COUNT(DISTINCT symbol) FROM stock_data",
            [],
            |row| row.get(0),
        )?;

        let file_size = std::fs::metadata(&self.config.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(LocalStorageStats {
            trading_days: trading_days as u64,
            snapshot_rows: snapshot_rows as u64,
            snapshot_dates: snapshot_dates as u64,
            unique_symbols: unique_symbols as u64,
            db_size_bytes: file_size,
        })
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .with_context(|| format!("Invalid date in local storage: {}", s))
}

/// Statistics about local storage
#[derive(Debug, Clone, serde::Serialize)]
pub struct LocalStorageStats {
    pub trading_days: u64,
    pub snapshot_rows: u64,
    pub snapshot_dates: u64,
    pub unique_symbols: u64,
    pub db_size_bytes: u64,
}

impl std::fmt::Display for LocalStorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LocalStorage: {} trading days, {} rows over {} dates ({} symbols, {:.2} MB)",
            self.trading_days,
            self.snapshot_rows,
            self.snapshot_dates,
            self.unique_symbols,
            self.db_size_bytes as f64 / 1_048_576.0
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn create_test_storage() -> (TempDir, LocalStorage) {
        let dir = tempdir().unwrap();
        let config = LocalStorageConfig {
            db_path: dir.path().join("test_monitor.db"),
        };
        let storage = LocalStorage::new(config).unwrap();
        (dir, storage)
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn row(symbol: &str, date: &str, close: f64) -> DailySnapshotRow {
        let mut row = DailySnapshotRow::empty(symbol, "测试", d(date));
        row.close = close;
        row.volume = 1000.0;
        row
    }

    #[tokio::test]
    async fn test_storage_creation() {
        let (_dir, storage) = create_test_storage();
        assert!(storage.db_path().exists());
        assert_eq!(storage.trading_date_count().await.unwrap(), 0);
        assert!(storage.latest_trade_date().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_calendar_delta() {
        let (_dir, storage) = create_test_storage();

        let added = storage
            .add_trading_dates(&[d("2024-01-02"), d("2024-01-03"), d("2024-01-04")])
            .await
            .unwrap();
        assert_eq!(added, 3);

        let (added, removed) = storage
            .apply_calendar_delta(&[d("2024-01-05")], &[d("2024-01-04")])
            .await
            .unwrap();
        assert_eq!((added, removed), (1, 1));

        let all = storage.all_trading_dates().await.unwrap();
        let expected: BTreeSet<_> = [d("2024-01-02"), d("2024-01-03"), d("2024-01-05")].into();
        assert_eq!(all, expected);

        // Re-adding an existing date is not counted
        assert_eq!(storage.add_trading_dates(&[d("2024-01-02")]).await.unwrap(), 0);
        assert_eq!(storage.remove_trading_dates(&[d("2023-12-29")]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_trading_dates() {
        let (_dir, storage) = create_test_storage();
        storage
            .add_trading_dates(&[d("2024-01-02"), d("2024-01-03"), d("2024-01-04"), d("2024-01-05")])
            .await
            .unwrap();

        let recent = storage.recent_trading_dates(2).await.unwrap();
        let expected: BTreeSet<_> = [d("2024-01-04"), d("2024-01-05")].into();
        assert_eq!(recent, expected);
    }

    #[tokio::test]
    async fn test_snapshot_write_once() {
        let (_dir, storage) = create_test_storage();
        let date = d("2024-01-05");
        let rows = vec![row("600519", "2024-01-05", 1700.0), row("000001", "2024-01-05", 9.5)];

        let first = storage.insert_snapshot_if_absent(date, &rows).await.unwrap();
        assert_eq!(first, SnapshotInsert::Inserted(2));

        let changed = vec![row("600519", "2024-01-05", 1.0)];
        let second = storage.insert_snapshot_if_absent(date, &changed).await.unwrap();
        assert_eq!(second, SnapshotInsert::AlreadyPresent);

        let stored = storage.snapshot_for_date(date).await.unwrap();
        assert_eq!(stored, rows);
        assert!(storage.has_snapshot_for(date).await.unwrap());
        assert!(!storage.has_snapshot_for(d("2024-01-04")).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back() {
        let (_dir, storage) = create_test_storage();
        let date = d("2024-01-05");
        // Duplicate symbol violates UNIQUE(symbol, trade_date)
        let rows = vec![row("600519", "2024-01-05", 1700.0), row("600519", "2024-01-05", 1701.0)];

        assert!(storage.insert_snapshot_if_absent(date, &rows).await.is_err());
        assert!(!storage.has_snapshot_for(date).await.unwrap());
    }

    #[tokio::test]
    async fn test_history_ordering() {
        let (_dir, storage) = create_test_storage();
        storage
            .insert_snapshot_if_absent(d("2024-01-05"), &[row("B", "2024-01-05", 2.0), row("A", "2024-01-05", 1.0)])
            .await
            .unwrap();
        storage
            .insert_snapshot_if_absent(d("2024-01-04"), &[row("A", "2024-01-04", 0.9)])
            .await
            .unwrap();

        let history = storage.load_history(None).await.unwrap();
        let keys: Vec<_> = history.iter().map(|r| (r.trade_date, r.symbol.as_str())).collect();
        assert_eq!(
            keys,
            vec![(d("2024-01-04"), "A"), (d("2024-01-05"), "B"), (d("2024-01-05"), "A")]
        );

        let bounded = storage.load_history(Some(d("2024-01-05"))).await.unwrap();
        assert_eq!(bounded.len(), 2);
        assert_eq!(storage.latest_trade_date().await.unwrap(), Some(d("2024-01-05")));
    }

    #[tokio::test]
    async fn test_get_stats() {
        let (_dir, storage) = create_test_storage();
        storage.add_trading_dates(&[d("2024-01-05")]).await.unwrap();
        storage
            .insert_snapshot_if_absent(d("2024-01-05"), &[row("A", "2024-01-05", 1.0)])
            .await
            .unwrap();

        let stats = storage.get_stats().await.unwrap();
        assert_eq!(stats.trading_days, 1);
        assert_eq!(stats.snapshot_rows, 1);
        assert_eq!(stats.snapshot_dates, 1);
        assert_eq!(stats.unique_symbols, 1);
        assert!(stats.to_string().contains("1 trading days"));
    }
}
