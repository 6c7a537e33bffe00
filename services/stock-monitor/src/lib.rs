//! Stock Monitor Library
//!
//! End-of-day A-share monitoring: keeps a trading calendar in sync with the
//! market data provider, stores one cross-section per trading day and screens
//! the stored history for breakout candidates.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     stock-monitor (Rust Service)                    │
//! │                               :8000                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐      │
//! │  │  Calendar       │  │  Ingestion      │  │  Screener       │      │
//! │  │  Reconciler     │  │  Pipeline       │  │  Engine         │      │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘      │
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │  LocalStorage (SQLite)  ·  snapshot files  ·  Eastmoney API │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Daily Cycle
//!
//! 1. Reconcile the calendar with the provider, then resolve the target date
//! 2. Read the date's snapshot file, or pull the cross-section and clean it
//!    when the date is the live session
//! 3. Persist the rows once; a second run for the same date is a no-op
//!
//! A full calendar sync also runs yearly and at startup when the store is empty.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod calendar;
pub mod data;
pub mod error;
pub mod ingest;
pub mod routes;
pub mod scheduler;
pub mod screener;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use monitor_common::Config;

use crate::calendar::{CalendarReconciler, MarketClock};
use crate::data::{
    EastmoneyAdapter, LocalStorage, LocalStorageConfig, MarketDataProvider, SnapshotCache,
    SnapshotFileStore, TradingCalendarCache,
};
use crate::ingest::IngestionPipeline;
use crate::scheduler::{Job, MonitorJobs, MonitorScheduler};
use crate::screener::ScreenerEngine;

/// Recent job reports returned by the status endpoint
pub const STATUS_REPORT_LIMIT: usize = 20;

/// Monitor service state
pub struct MonitorState {
    /// Configuration
    pub config: Config,
    /// Durable store
    pub storage: Arc<LocalStorage>,
    /// In-memory trading calendar
    pub calendar_cache: Arc<TradingCalendarCache>,
    /// Daily ingestion
    pub pipeline: Arc<IngestionPipeline>,
    /// Calendar reconciliation
    pub reconciler: Arc<CalendarReconciler>,
    /// Screening over stored history
    pub screener: Arc<ScreenerEngine>,
    /// Cron jobs and manual triggers
    pub scheduler: Arc<MonitorScheduler>,
}

impl MonitorState {
    /// Create state backed by the Eastmoney provider
    pub fn new(config: Config) -> Result<Self> {
        let provider: Arc<dyn MarketDataProvider> =
            Arc::new(EastmoneyAdapter::from_config(&config.provider));
        Self::with_provider(config, provider)
    }

    /// Create state around any provider
    pub fn with_provider(config: Config, provider: Arc<dyn MarketDataProvider>) -> Result<Self> {
        let clock = MarketClock::from_config(&config.market)?;

        let storage = Arc::new(
            LocalStorage::new(LocalStorageConfig::from(&config.storage))
                .context("Failed to open local storage")?,
        );

        let calendar_cache = Arc::new(TradingCalendarCache::with_ttl(
            config.storage.calendar_cache_ttl_secs,
        ));

        let snapshots = SnapshotCache::new(
            SnapshotFileStore::new(config.storage.snapshot_dir()),
            Arc::clone(&provider),
        );

        let reconciler = Arc::new(
            CalendarReconciler::new(provider, Arc::clone(&storage))
                .with_calendar_cache(Arc::clone(&calendar_cache)),
        );

        let pipeline = Arc::new(
            IngestionPipeline::new(
                Arc::clone(&storage),
                snapshots,
                Arc::clone(&calendar_cache),
                clock,
            )
            .with_calendar_window(config.storage.calendar_window)
            .with_calendar_refresh(Arc::clone(&reconciler)),
        );

        let screener = Arc::new(ScreenerEngine::new(
            Arc::clone(&storage),
            config.screener.clone(),
        ));

        let jobs = Arc::new(MonitorJobs::new(
            Arc::clone(&pipeline),
            Arc::clone(&reconciler),
        ));
        let scheduler = Arc::new(MonitorScheduler::new(&config.scheduler, clock, jobs)?);

        Ok(Self {
            config,
            storage,
            calendar_cache,
            pipeline,
            reconciler,
            screener,
            scheduler,
        })
    }

    /// Reconcile the calendar when the store has none and bootstrapping is on.
    ///
    /// Returns whether a reconcile was attempted. A failed bootstrap is logged;
    /// the yearly job or a manual sync retries it.
    pub async fn bootstrap_calendar(&self) -> Result<bool> {
        if !self.config.scheduler.bootstrap_calendar {
            return Ok(false);
        }

        let count = self.storage.trading_date_count().await?;
        if count > 0 {
            tracing::debug!(dates = count, "Trading calendar present, no bootstrap needed");
            return Ok(false);
        }

        tracing::info!("Trading calendar empty, reconciling before first ingestion");
        match self.scheduler.trigger(Job::CalendarSync).await {
            Ok(execution) => {
                tracing::info!(status = ?execution.report.status, "{}", execution.report.message);
            }
            Err(e) => tracing::warn!(error = %e, "Calendar bootstrap skipped"),
        }
        Ok(true)
    }
}

/// Main monitor service
pub struct MonitorService {
    state: Arc<MonitorState>,
}

impl MonitorService {
    /// Create a new monitor service
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(MonitorState::new(config)?);
        Ok(Self { state })
    }

    pub fn state(&self) -> &Arc<MonitorState> {
        &self.state
    }

    /// Start the monitor service
    pub async fn start(self) -> Result<()> {
        let server = &self.state.config.server;
        let addr: SocketAddr = format!("{}:{}", server.host, server.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", server.host, server.port))?;

        self.state.bootstrap_calendar().await?;

        let app = routes::router(Arc::clone(&self.state))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(server.request_timeout_secs),
            ))
            .layer(CorsLayer::permissive());

        // Start the job scheduler
        let scheduler = Arc::clone(&self.state.scheduler);
        tokio::spawn(async move {
            scheduler.run().await;
        });

        tracing::info!(address = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.state.scheduler.stop().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
