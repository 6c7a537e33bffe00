use chrono::{Datelike, FixedOffset, TimeZone, Timelike};
use cron::Schedule;
use monitor_common::SchedulerConfig;
use std::str::FromStr;

#[test]
fn test_cron_expressions() {
    let config = SchedulerConfig::default();

    // Daily ingestion: 15:30:00 every day
    println!("Testing ingest: '{}'", config.ingest_cron);
    assert!(Schedule::from_str(&config.ingest_cron).is_ok(), "Ingest expression should be valid");

    // Calendar sync: Jan 1 00:00:00
    println!("Testing calendar: '{}'", config.calendar_cron);
    let result = Schedule::from_str(&config.calendar_cron);
    if let Err(e) = &result {
        println!("Error: {}", e);
    }
    assert!(result.is_ok(), "Calendar expression should be valid");

    // 5-field crontab form is rejected; seconds are required
    assert!(Schedule::from_str("30 15 * * *").is_err(), "5-field expression should be invalid");
}

#[test]
fn test_ingest_fires_after_close_in_exchange_time() {
    let shanghai = FixedOffset::east_opt(8 * 3600).unwrap();
    let schedule = Schedule::from_str(&SchedulerConfig::default().ingest_cron).unwrap();

    let morning = shanghai.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap();
    let next = schedule.after(&morning).next().unwrap();
    assert_eq!((next.day(), next.hour(), next.minute()), (5, 15, 30));

    let evening = shanghai.with_ymd_and_hms(2024, 1, 5, 16, 0, 0).unwrap();
    let next = schedule.after(&evening).next().unwrap();
    assert_eq!((next.day(), next.hour(), next.minute()), (6, 15, 30));
}

#[test]
fn test_calendar_sync_is_yearly() {
    let shanghai = FixedOffset::east_opt(8 * 3600).unwrap();
    let schedule = Schedule::from_str(&SchedulerConfig::default().calendar_cron).unwrap();

    let start = shanghai.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let firings: Vec<_> = schedule.after(&start).take(2).collect();
    assert_eq!(firings[0].year(), 2025);
    assert_eq!(firings[1].year(), 2026);
    assert!(firings.iter().all(|t| t.month() == 1 && t.day() == 1 && t.hour() == 0));
}
