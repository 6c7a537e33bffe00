//! Read-through snapshot cache.
//!
//! Tier 1 is a JSON file per trading date holding cleaned rows. Tier 2 is the
//! market data provider. File problems degrade to misses; empty provider
//! responses are never written, so the next call asks the provider again.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{clean_snapshot, DailySnapshotRow, MarketDataProvider, ProviderError, COMPACT_DATE_FORMAT};

/// Which tier served a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    File,
    Remote,
}

/// Outcome of a snapshot lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotFetch {
    /// Cleaned rows stamped with the requested date
    Rows {
        rows: Vec<DailySnapshotRow>,
        source: SnapshotSource,
    },
    /// The provider had nothing usable
    Empty,
}

impl SnapshotFetch {
    /// Number of rows (0 for `Empty`).
    pub fn len(&self) -> usize {
        match self {
            Self::Rows { rows, .. } => rows.len(),
            Self::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// File Tier
// ============================================================================

/// One `snapshot_<YYYYMMDD>.json` file per trading date.
#[derive(Debug, Clone)]
pub struct SnapshotFileStore {
    dir: PathBuf,
}

impl SnapshotFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a trading date.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("snapshot_{}.json", date.format(COMPACT_DATE_FORMAT)))
    }

    /// Cached rows for `date`. Missing, unreadable or corrupt files are misses.
    pub async fn read(&self, date: NaiveDate) -> Option<Vec<DailySnapshotRow>> {
        let path = self.path_for(date);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read snapshot cache file");
                return None;
            }
        };

        match serde_json::from_str::<Vec<DailySnapshotRow>>(&content) {
            Ok(rows) if rows.is_empty() => None,
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt snapshot cache file, ignoring");
                None
            }
        }
    }

    /// Write rows for `date`, replacing any previous file.
    pub async fn write(&self, date: NaiveDate, rows: &[DailySnapshotRow]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path_for(date);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(rows).context("Failed to serialize snapshot")?;

        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;

        Ok(path)
    }
}

// ============================================================================
// Read-through Cache
// ============================================================================

/// File tier in front of the provider.
pub struct SnapshotCache {
    files: SnapshotFileStore,
    provider: Arc<dyn MarketDataProvider>,
}

impl SnapshotCache {
    pub fn new(files: SnapshotFileStore, provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { files, provider }
    }

    pub fn files(&self) -> &SnapshotFileStore {
        &self.files
    }

    /// Rows from the file tier only; the provider is never asked.
    pub async fn get_cached(&self, date: NaiveDate) -> SnapshotFetch {
        match self.files.read(date).await {
            Some(rows) => {
                debug!(trade_date = %date, rows = rows.len(), "Snapshot served from file cache");
                SnapshotFetch::Rows {
                    rows,
                    source: SnapshotSource::File,
                }
            }
            None => SnapshotFetch::Empty,
        }
    }

    /// Cleaned cross-section for `date`.
    ///
    /// The provider only knows "latest"; its rows are stamped with `date`.
    pub async fn get_snapshot(&self, date: NaiveDate) -> Result<SnapshotFetch, ProviderError> {
        if let fetch @ SnapshotFetch::Rows { .. } = self.get_cached(date).await {
            return Ok(fetch);
        }

        let raw = self.provider.get_latest_cross_section().await?;
        if raw.is_empty() {
            warn!(provider = self.provider.name(), trade_date = %date, "Provider returned an empty cross-section");
            return Ok(SnapshotFetch::Empty);
        }

        let rows = clean_snapshot(&raw, date);
        if rows.is_empty() {
            warn!(
                provider = self.provider.name(),
                trade_date = %date,
                raw = raw.len(),
                "No rows left after cleaning"
            );
            return Ok(SnapshotFetch::Empty);
        }

        match self.files.write(date, &rows).await {
            Ok(path) => info!(
                trade_date = %date,
                rows = rows.len(),
                dropped = raw.len() - rows.len(),
                path = %path.display(),
                "Cached provider snapshot"
            ),
            Err(e) => warn!(trade_date = %date, error = %format!("{:#}", e), "Failed to write snapshot cache"),
        }

        Ok(SnapshotFetch::Rows {
            rows,
            source: SnapshotSource::Remote,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
