//! Trade-date resolution.
//!
//! Picks the trading date whose end-of-day data should be pulled at a given
//! exchange-local moment.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::collections::BTreeSet;

use crate::error::{MonitorError, Result};

/// Exchange close; before it, today's data is not final.
pub const MARKET_CLOSE_HOUR: u32 = 15;

/// Dates checked when walking back from the presumptive date, inclusive.
pub const MAX_LOOKBACK_DAYS: u32 = 10;

/// Resolve the target trading date for `now` (exchange-local wall clock).
///
/// Before the close on a trading day the presumptive date is yesterday,
/// otherwise today. The first known date among the presumptive date and the
/// nine days before it wins.
pub fn resolve_target_date(now: NaiveDateTime, known: &BTreeSet<NaiveDate>) -> Result<NaiveDate> {
    let today = now.date();
    let close = NaiveTime::from_hms_opt(MARKET_CLOSE_HOUR, 0, 0).unwrap_or(NaiveTime::MIN);

    let presumptive = if now.time() < close && known.contains(&today) {
        today.pred_opt().unwrap_or(today)
    } else {
        today
    };

    let mut candidate = Some(presumptive);
    for _ in 0..MAX_LOOKBACK_DAYS {
        let Some(date) = candidate else { break };
        if known.contains(&date) {
            return Ok(date);
        }
        candidate = date.pred_opt();
    }

    Err(MonitorError::CalendarResolution {
        anchor: presumptive,
        attempts: MAX_LOOKBACK_DAYS,
    })
}

/// Wall clock of the exchange.
#[derive(Debug, Clone, Copy)]
pub struct MarketClock {
    offset: FixedOffset,
}

impl MarketClock {
    /// Clock at a fixed UTC offset in hours (Shanghai: 8).
    pub fn new(utc_offset_hours: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            MonitorError::Config(format!("Invalid UTC offset: {} hours", utc_offset_hours))
        })?;
        Ok(Self { offset })
    }

    pub fn from_config(config: &monitor_common::MarketConfig) -> Result<Self> {
        Self::new(config.utc_offset_hours)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Current exchange-local time.
    pub fn now(&self) -> NaiveDateTime {
        self.local(Utc::now())
    }

    /// Exchange-local wall clock for a UTC instant.
    pub fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset).naive_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M").unwrap()
    }

    fn known(dates: &[&str]) -> BTreeSet<NaiveDate> {
        dates.iter().map(|s| d(s)).collect()
    }

    #[test]
    fn test_after_close_on_trading_day_is_today() {
        let cal = known(&["2024-01-02", "2024-01-03", "2024-01-05"]);
        assert_eq!(resolve_target_date(at("2024-01-05", "16:00"), &cal).unwrap(), d("2024-01-05"));
        assert_eq!(resolve_target_date(at("2024-01-05", "15:00"), &cal).unwrap(), d("2024-01-05"));
    }

    #[test]
    fn test_before_close_on_trading_day_is_earlier() {
        let cal = known(&["2024-01-02", "2024-01-03", "2024-01-05"]);
        let resolved = resolve_target_date(at("2024-01-05", "09:00"), &cal).unwrap();
        assert_eq!(resolved, d("2024-01-03"));
        assert!(resolved < d("2024-01-05"));
        assert!(cal.contains(&resolved));
    }

    #[test]
    fn test_non_trading_day_walks_back() {
        // Saturday morning: today unknown, presumptive stays today
        let cal = known(&["2024-01-05"]);
        assert_eq!(resolve_target_date(at("2024-01-06", "09:00"), &cal).unwrap(), d("2024-01-05"));
    }

    #[test]
    fn test_lookback_bound() {
        // Known day 9 days before: found
        let cal = known(&["2024-01-01"]);
        assert_eq!(resolve_target_date(at("2024-01-10", "16:00"), &cal).unwrap(), d("2024-01-01"));

        // Known day 10 days before: not found
        let err = resolve_target_date(at("2024-01-11", "16:00"), &cal).unwrap_err();
        match err {
            MonitorError::CalendarResolution { anchor, attempts } => {
                assert_eq!(anchor, d("2024-01-11"));
                assert_eq!(attempts, MAX_LOOKBACK_DAYS);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_calendar_fails() {
        assert!(resolve_target_date(at("2024-01-05", "16:00"), &BTreeSet::new()).is_err());
    }

    #[test]
    fn test_market_clock_offset() {
        let clock = MarketClock::new(8).unwrap();
        let utc = Utc.with_ymd_and_hms(2024, 1, 5, 7, 30, 0).unwrap();
        assert_eq!(clock.local(utc), at("2024-01-05", "15:30"));

        assert!(MarketClock::new(30).is_err());
    }
}
