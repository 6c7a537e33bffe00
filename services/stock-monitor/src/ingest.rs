//! Daily ingestion pipeline.
//!
//! calendar refresh → target date → snapshot cache → write-once persistence.
//! Steps run strictly in order; a failure ends the run and the next
//! scheduled cycle is the retry.
//!
//! The provider only serves the live cross-section, so it is asked only when
//! the target date is the latest session on the calendar. A target behind it
//! (a run before today's close) is served from the file tier or not at all.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::calendar::{resolve_target_date, CalendarReconciler, MarketClock};
use crate::data::{
    LocalStorage, SnapshotCache, SnapshotFetch, SnapshotInsert, SnapshotSource,
    TradingCalendarCache,
};
use crate::error::{MonitorError, Result};

/// Trading dates the in-memory calendar holds.
pub const DEFAULT_CALENDAR_WINDOW: usize = 365;

/// Result of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Rows were written for the date
    Ingested {
        trade_date: NaiveDate,
        rows: usize,
        source: SnapshotSource,
    },
    /// The date already had rows; nothing was written
    DuplicateSkipped { trade_date: NaiveDate },
    /// The provider had nothing for the date
    NoData { trade_date: NaiveDate },
}

impl IngestOutcome {
    pub fn trade_date(&self) -> NaiveDate {
        match self {
            Self::Ingested { trade_date, .. }
            | Self::DuplicateSkipped { trade_date }
            | Self::NoData { trade_date } => *trade_date,
        }
    }
}

impl std::fmt::Display for IngestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingested { trade_date, rows, .. } => {
                write!(f, "Stored {} rows for {}", rows, trade_date)
            }
            Self::DuplicateSkipped { trade_date } => {
                write!(f, "Data for {} already stored, skipped", trade_date)
            }
            Self::NoData { trade_date } => write!(f, "No data available for {}", trade_date),
        }
    }
}

/// A resolved date with its snapshot, without persisting anything.
#[derive(Debug, Clone)]
pub struct ResolvedSnapshot {
    pub trade_date: NaiveDate,
    pub fetch: SnapshotFetch,
}

/// Runs daily ingestion.
pub struct IngestionPipeline {
    storage: Arc<LocalStorage>,
    snapshots: SnapshotCache,
    calendar_cache: Arc<TradingCalendarCache>,
    clock: MarketClock,
    calendar_window: usize,
    /// Reconciled before every resolution when set
    calendar_refresh: Option<Arc<CalendarReconciler>>,
}

impl IngestionPipeline {
    pub fn new(
        storage: Arc<LocalStorage>,
        snapshots: SnapshotCache,
        calendar_cache: Arc<TradingCalendarCache>,
        clock: MarketClock,
    ) -> Self {
        Self {
            storage,
            snapshots,
            calendar_cache,
            clock,
            calendar_window: DEFAULT_CALENDAR_WINDOW,
            calendar_refresh: None,
        }
    }

    /// Reconcile the calendar against the provider before each resolution.
    ///
    /// The provider's calendar only lists sessions that have started, so a
    /// calendar synced once would fall behind within days.
    pub fn with_calendar_refresh(mut self, reconciler: Arc<CalendarReconciler>) -> Self {
        self.calendar_refresh = Some(reconciler);
        self
    }

    /// Number of recent dates loaded into the calendar cache.
    pub fn with_calendar_window(mut self, window: usize) -> Self {
        self.calendar_window = window;
        self
    }

    pub fn calendar_cache(&self) -> &Arc<TradingCalendarCache> {
        &self.calendar_cache
    }

    /// Known trading dates, from the cache or the store.
    pub async fn calendar(&self) -> Result<Arc<BTreeSet<NaiveDate>>> {
        let storage = &self.storage;
        let window = self.calendar_window;
        self.calendar_cache
            .get_or_load(|| async move { storage.recent_trading_dates(window).await })
            .await
            .map_err(MonitorError::transaction)
    }

    /// Drop the cached calendar and reload it from the store.
    pub async fn force_refresh_calendar(&self) -> Result<usize> {
        self.calendar_cache.invalidate();
        let calendar = self.calendar().await?;
        info!(dates = calendar.len(), "Trading calendar cache refreshed");
        Ok(calendar.len())
    }

    /// Target date for `now` (exchange-local).
    pub async fn resolve_date_at(&self, now: NaiveDateTime) -> Result<NaiveDate> {
        let calendar = self.calendar().await?;
        resolve_target_date(now, &calendar)
    }

    /// Resolve the current target date and fetch its snapshot via the cache.
    pub async fn current_snapshot(&self) -> Result<ResolvedSnapshot> {
        self.snapshot_at(self.clock.now()).await
    }

    /// Resolve the target date for `now` and fetch its snapshot.
    pub async fn snapshot_at(&self, now: NaiveDateTime) -> Result<ResolvedSnapshot> {
        self.refresh_calendar().await;
        let trade_date = self.resolve_date_at(now).await?;
        let fetch = self.fetch_snapshot(now, trade_date).await?;
        Ok(ResolvedSnapshot { trade_date, fetch })
    }

    async fn refresh_calendar(&self) {
        let Some(reconciler) = &self.calendar_refresh else {
            return;
        };
        match reconciler.reconcile().await {
            Ok(outcome) => debug!(outcome = %outcome, "Calendar refreshed"),
            Err(e) => warn!(error = %e, "Calendar refresh failed, resolving against the stored calendar"),
        }
    }

    /// Provider rows only when `trade_date` is the live session.
    async fn fetch_snapshot(&self, now: NaiveDateTime, trade_date: NaiveDate) -> Result<SnapshotFetch> {
        let calendar = self.calendar().await?;
        let latest_session = calendar.range(..=now.date()).next_back().copied();

        if latest_session == Some(trade_date) {
            return Ok(self.snapshots.get_snapshot(trade_date).await?);
        }

        debug!(
            trade_date = %trade_date,
            latest_session = ?latest_session,
            "Target date is behind the live session, file cache only"
        );
        Ok(self.snapshots.get_cached(trade_date).await)
    }

    /// Run ingestion for the current exchange-local time.
    pub async fn run_daily_ingestion(&self) -> Result<IngestOutcome> {
        self.run_ingestion_at(self.clock.now()).await
    }

    /// Run ingestion as if it were `now` (exchange-local).
    pub async fn run_ingestion_at(&self, now: NaiveDateTime) -> Result<IngestOutcome> {
        let run_id = monitor_common::logging::generate_run_id();
        let span = info_span!("ingestion", run_id = %run_id);
        self.ingest(now).instrument(span).await
    }

    async fn ingest(&self, now: NaiveDateTime) -> Result<IngestOutcome> {
        let ResolvedSnapshot { trade_date, fetch } = self.snapshot_at(now).await?;
        info!(trade_date = %trade_date, now = %now, "Resolved target trading date");

        let (rows, source) = match fetch {
            SnapshotFetch::Rows { rows, source } => (rows, source),
            SnapshotFetch::Empty => {
                let stored = self
                    .storage
                    .has_snapshot_for(trade_date)
                    .await
                    .map_err(MonitorError::transaction)?;
                if stored {
                    info!(trade_date = %trade_date, "Rows already stored, skipped");
                    return Ok(IngestOutcome::DuplicateSkipped { trade_date });
                }
                warn!(trade_date = %trade_date, "No snapshot data, nothing to ingest");
                return Ok(IngestOutcome::NoData { trade_date });
            }
        };

        let written = self
            .storage
            .insert_snapshot_if_absent(trade_date, &rows)
            .await
            .map_err(MonitorError::transaction)?;

        let outcome = match written {
            SnapshotInsert::Inserted(count) => IngestOutcome::Ingested {
                trade_date,
                rows: count,
                source,
            },
            SnapshotInsert::AlreadyPresent => IngestOutcome::DuplicateSkipped { trade_date },
        };

        info!(trade_date = %trade_date, "{}", outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        LocalStorageConfig, MarketDataProvider, ProviderError, RawRecord, SnapshotFileStore,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::{tempdir, TempDir};

    struct SnapshotProvider {
        records: Vec<RawRecord>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MarketDataProvider for SnapshotProvider {
        fn name(&self) -> &'static str {
            "snapshot-stub"
        }

        async fn get_current_trading_dates(
            &self,
        ) -> std::result::Result<BTreeSet<NaiveDate>, ProviderError> {
            Ok(BTreeSet::new())
        }

        async fn get_latest_cross_section(&self) -> std::result::Result<Vec<RawRecord>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.records.clone())
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        d(day).and_hms_opt(hour, 0, 0).unwrap()
    }

    fn record(symbol: &str) -> RawRecord {
        json!({ "代码": symbol, "名称": "测试", "最新价": 10.0 })
            .as_object()
            .unwrap()
            .clone()
    }

    async fn pipeline(records: Vec<RawRecord>) -> (TempDir, Arc<LocalStorage>, Arc<SnapshotProvider>, IngestionPipeline) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(
            LocalStorage::new(LocalStorageConfig {
                db_path: dir.path().join("ingest.db"),
            })
            .unwrap(),
        );
        storage.add_trading_dates(&[d(2), d(3), d(5)]).await.unwrap();

        let provider = Arc::new(SnapshotProvider {
            records,
            calls: AtomicU32::new(0),
        });
        let snapshots = SnapshotCache::new(SnapshotFileStore::new(dir.path().join("snapshots")), provider.clone());
        let pipeline = IngestionPipeline::new(
            storage.clone(),
            snapshots,
            Arc::new(TradingCalendarCache::new()),
            MarketClock::new(8).unwrap(),
        );
        (dir, storage, provider, pipeline)
    }

    #[tokio::test]
    async fn test_ingest_then_duplicate() {
        let (_dir, storage, _provider, pipeline) = pipeline(vec![record("600519"), record("000001")]).await;

        let first = pipeline.run_ingestion_at(at(5, 16)).await.unwrap();
        assert_eq!(
            first,
            IngestOutcome::Ingested { trade_date: d(5), rows: 2, source: SnapshotSource::Remote }
        );

        let second = pipeline.run_ingestion_at(at(5, 17)).await.unwrap();
        assert_eq!(second, IngestOutcome::DuplicateSkipped { trade_date: d(5) });
        assert_eq!(storage.snapshot_for_date(d(5)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_before_close_targets_previous_trading_day() {
        let (dir, storage, provider, pipeline) = pipeline(vec![record("600519")]).await;

        // The live list is today's intraday data, never stored under d(3)
        let outcome = pipeline.run_ingestion_at(at(5, 9)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::NoData { trade_date: d(3) });
        assert!(!storage.has_snapshot_for(d(3)).await.unwrap());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        let resolved = pipeline.snapshot_at(at(5, 9)).await.unwrap();
        assert_eq!(resolved.trade_date, d(3));
        assert!(resolved.fetch.is_empty());
        assert!(!dir.path().join("snapshots").join("snapshot_20240103.json").exists());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_previous_day_served_from_file_before_close() {
        let (_dir, storage, provider, pipeline) = pipeline(vec![record("600519")]).await;

        // Yesterday's evening run cached the file; the morning run reuses it
        pipeline.run_ingestion_at(at(3, 16)).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let outcome = pipeline.run_ingestion_at(at(5, 9)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::DuplicateSkipped { trade_date: d(3) });
        assert_eq!(storage.snapshot_for_date(d(3)).await.unwrap().len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_provider_is_no_data() {
        let (_dir, storage, provider, pipeline) = pipeline(Vec::new()).await;

        let outcome = pipeline.run_ingestion_at(at(5, 16)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::NoData { trade_date: d(5) });
        assert!(!storage.has_snapshot_for(d(5)).await.unwrap());

        // Not cached: the next run asks the provider again
        pipeline.run_ingestion_at(at(5, 16)).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unresolvable_date_fails() {
        let (_dir, _storage, provider, pipeline) = pipeline(vec![record("600519")]).await;

        let err = pipeline.run_ingestion_at(at(25, 16)).await.unwrap_err();
        assert!(matches!(err, MonitorError::CalendarResolution { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_calendar_cache_refresh() {
        let (_dir, storage, _provider, pipeline) = pipeline(vec![record("600519")]).await;

        assert_eq!(pipeline.calendar().await.unwrap().len(), 3);
        storage.add_trading_dates(&[d(8)]).await.unwrap();

        // Still served from the cache
        assert_eq!(pipeline.calendar().await.unwrap().len(), 3);
        assert_eq!(pipeline.force_refresh_calendar().await.unwrap(), 4);
        assert_eq!(pipeline.resolve_date_at(at(8, 16)).await.unwrap(), d(8));
    }

    #[tokio::test]
    async fn test_calendar_window_bounds_known_dates() {
        let (_dir, _storage, _provider, pipeline) = pipeline(vec![record("600519")]).await;
        let pipeline = pipeline.with_calendar_window(1);

        let calendar = pipeline.calendar().await.unwrap();
        assert_eq!(calendar.iter().copied().collect::<Vec<_>>(), vec![d(5)]);
    }
}
