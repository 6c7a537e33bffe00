//! In-memory trading calendar cache.
//!
//! A single slot holding the recent trading calendar. The ingestion pipeline
//! owns it; a mutating reconcile invalidates it.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Cache entry with optional TTL
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    loaded_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    fn new(data: T, ttl_secs: Option<i64>) -> Self {
        let loaded_at = Utc::now();
        Self {
            data,
            loaded_at,
            expires_at: ttl_secs.map(|secs| loaded_at + Duration::seconds(secs)),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() > at)
    }
}

type Calendar = Arc<BTreeSet<NaiveDate>>;

/// Single-slot cache of known trading dates.
pub struct TradingCalendarCache {
    slot: RwLock<Option<CacheEntry<Calendar>>>,
    /// `None` means the entry lives until invalidated
    ttl_secs: Option<i64>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TradingCalendarCache {
    /// Cache without expiry.
    pub fn new() -> Self {
        Self::with_ttl(None)
    }

    /// Cache whose entry expires `ttl_secs` after loading.
    pub fn with_ttl(ttl_secs: Option<u64>) -> Self {
        Self {
            slot: RwLock::new(None),
            ttl_secs: ttl_secs.map(|s| s as i64),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    // A panic while holding the slot leaves a usable Option; recover it so
    // invalidation is never skipped.
    fn read_slot(&self) -> RwLockReadGuard<'_, Option<CacheEntry<Calendar>>> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Option<CacheEntry<Calendar>>> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached calendar if present and not expired.
    pub fn get(&self) -> Option<Calendar> {
        self.read_slot()
            .as_ref()
            .filter(|entry| !entry.is_expired())
            .map(|entry| Arc::clone(&entry.data))
    }

    /// Replace the cached calendar. Empty calendars are not cached.
    pub fn set(&self, dates: BTreeSet<NaiveDate>) -> Calendar {
        let data = Arc::new(dates);
        if data.is_empty() {
            return data;
        }
        *self.write_slot() = Some(CacheEntry::new(Arc::clone(&data), self.ttl_secs));
        data
    }

    /// Return the cached calendar, or load, cache and return it.
    pub async fn get_or_load<F, Fut, E>(&self, loader: F) -> Result<Calendar, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<BTreeSet<NaiveDate>, E>>,
    {
        if let Some(cached) = self.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let dates = loader().await?;
        tracing::debug!(dates = dates.len(), "Loaded trading calendar into cache");
        Ok(self.set(dates))
    }

    /// Drop the cached calendar.
    pub fn invalidate(&self) {
        *self.write_slot() = None;
    }

    /// Get cache statistics
    pub fn stats(&self) -> CalendarCacheStats {
        let (cached_dates, loaded_at, expired) = self
            .read_slot()
            .as_ref()
            .map(|e| (e.data.len(), Some(e.loaded_at), e.is_expired()))
            .unwrap_or((0, None, false));

        CalendarCacheStats {
            cached_dates,
            loaded_at,
            expired,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for TradingCalendarCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Calendar cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CalendarCacheStats {
    pub cached_dates: usize,
    pub loaded_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub hits: u64,
    pub misses: u64,
}
