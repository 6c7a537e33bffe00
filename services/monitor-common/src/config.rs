//! Configuration management for the stock monitor.
//!
//! The service reads a single configuration file at `~/.stock-monitor/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (STOCK_MONITOR_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `STOCK_MONITOR_HOST` → server.host
//! - `STOCK_MONITOR_PORT` → server.port
//! - `STOCK_MONITOR_DB_PATH` → storage.db_path
//! - `STOCK_MONITOR_CACHE_DIR` → storage.snapshot_dir
//! - `STOCK_MONITOR_PROVIDER_TIMEOUT_SECS` → provider.timeout_secs
//! - `STOCK_MONITOR_LOG_LEVEL` → observability.log_level
//! - `STOCK_MONITOR_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "STOCK_MONITOR_";

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".stock-monitor"),
        |dirs| dirs.home_dir().join(".stock-monitor"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable store and file-tier cache locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Market data provider endpoints
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Exchange session settings
    #[serde(default)]
    pub market: MarketConfig,

    /// Job schedules
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Screening run settings
    #[serde(default)]
    pub screener: ScreenerSettings,

    /// Logging
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
    }

    /// Apply overrides from an arbitrary key lookup (keys without the prefix).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(path) = lookup("DB_PATH") {
            self.storage.db_path = Some(path);
        }
        if let Some(dir) = lookup("CACHE_DIR") {
            self.storage.snapshot_dir = Some(dir);
        }
        if let Some(secs) = lookup("PROVIDER_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.provider.timeout_secs = secs;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request timeout applied to every route
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout_secs() -> u64 {
    120
}

// ============================================================================
// Storage
// ============================================================================

/// Durable store and snapshot file cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path (default: `~/.stock-monitor/stock_monitor.db`)
    #[serde(default)]
    pub db_path: Option<String>,

    /// Directory for `snapshot_<YYYYMMDD>.json` files (default: `~/.stock-monitor/snapshots`)
    #[serde(default)]
    pub snapshot_dir: Option<String>,

    /// How many of the most recent trading dates the in-memory calendar holds
    #[serde(default = "default_calendar_window")]
    pub calendar_window: usize,

    /// Expiry of the in-memory calendar. `None` means explicit invalidation only.
    #[serde(default = "default_calendar_cache_ttl_secs")]
    pub calendar_cache_ttl_secs: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            snapshot_dir: None,
            calendar_window: default_calendar_window(),
            calendar_cache_ttl_secs: default_calendar_cache_ttl_secs(),
        }
    }
}

impl StorageConfig {
    /// Resolved database path.
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir().join("stock_monitor.db"))
    }

    /// Resolved snapshot cache directory.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir().join("snapshots"))
    }
}

fn default_calendar_window() -> usize {
    365
}

fn default_calendar_cache_ttl_secs() -> Option<u64> {
    Some(86_400)
}

// ============================================================================
// Provider
// ============================================================================

/// Market data provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Request timeout for every provider call
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// A-share list endpoint (cross-section)
    #[serde(default = "default_clist_url")]
    pub clist_url: String,

    /// Daily k-line endpoint (trading dates)
    #[serde(default = "default_kline_url")]
    pub kline_url: String,

    /// Index whose daily bars define the trading calendar
    #[serde(default = "default_calendar_secid")]
    pub calendar_secid: String,

    /// Rows per cross-section page; pages are followed until the list is complete
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_provider_timeout_secs(),
            clist_url: default_clist_url(),
            kline_url: default_kline_url(),
            calendar_secid: default_calendar_secid(),
            page_size: default_page_size(),
        }
    }
}

fn default_provider_timeout_secs() -> u64 {
    10
}

fn default_clist_url() -> String {
    "https://82.push2.eastmoney.com/api/qt/clist/get".into()
}

fn default_kline_url() -> String {
    "https://push2his.eastmoney.com/api/qt/stock/kline/get".into()
}

fn default_calendar_secid() -> String {
    "1.000001".into()
}

fn default_page_size() -> u32 {
    100
}

// ============================================================================
// Market
// ============================================================================

/// Exchange session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Exchange-local offset from UTC in hours (Shanghai: +8, no DST)
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

fn default_utc_offset_hours() -> i32 {
    8
}

// ============================================================================
// Scheduler
// ============================================================================

/// Job scheduler configuration.
///
/// Cron expressions use the 6-field form (with seconds) and are evaluated in
/// exchange-local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Daily ingestion trigger (default 15:30 every day)
    #[serde(default = "default_ingest_cron")]
    pub ingest_cron: String,

    /// Calendar reconciliation trigger (default Jan 1, 00:00)
    #[serde(default = "default_calendar_cron")]
    pub calendar_cron: String,

    /// Run a reconcile at startup when the calendar store is empty
    #[serde(default = "default_true")]
    pub bootstrap_calendar: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ingest_cron: default_ingest_cron(),
            calendar_cron: default_calendar_cron(),
            bootstrap_calendar: true,
        }
    }
}

fn default_ingest_cron() -> String {
    "0 30 15 * * *".into()
}

fn default_calendar_cron() -> String {
    "0 0 0 1 1 *".into()
}

// ============================================================================
// Screener
// ============================================================================

/// Screening run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerSettings {
    /// Calendar days of history loaded per run. `None` loads everything.
    #[serde(default = "default_history_days")]
    pub history_days: Option<u32>,
}

impl Default for ScreenerSettings {
    fn default() -> Self {
        Self {
            history_days: default_history_days(),
        }
    }
}

fn default_history_days() -> Option<u32> {
    Some(400)
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets forced to `warn`
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_true() -> bool {
    true
}
