//! Job scheduler for ingestion and calendar reconciliation.
//!
//! Cron expressions (6-field, with seconds) are evaluated in exchange-local
//! time. A tick every 30 seconds fires jobs whose scheduled time passed within
//! the last two minutes, once per scheduled time.
//!
//! # Schedule Configuration
//!
//! ```json
//! {
//!   "scheduler": {
//!     "enabled": true,
//!     "ingest_cron": "0 30 15 * * *",
//!     "calendar_cron": "0 0 0 1 1 *",
//!     "bootstrap_calendar": true
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use monitor_common::SchedulerConfig;

use crate::calendar::{CalendarReconciler, MarketClock, ReconcileOutcome};
use crate::error::MonitorError;
use crate::ingest::{IngestOutcome, IngestionPipeline};

/// Seconds between schedule checks
const TICK_SECS: u64 = 30;

/// A firing older than this is skipped rather than run late
const GRACE_SECS: i64 = 120;

/// Reports kept in the history
pub const MAX_REPORT_HISTORY: usize = 100;

// ============================================================================
// Jobs
// ============================================================================

/// Scheduled job type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    /// Pull and store the day's cross-section
    DailyIngestion,
    /// Reconcile the trading calendar with the provider
    CalendarSync,
}

impl Job {
    /// Get job name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::DailyIngestion => "daily_ingestion",
            Self::CalendarSync => "calendar_sync",
        }
    }
}

/// How a job run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    /// Nothing to do (no data, already stored, nothing changed)
    Noop,
    Failed,
}

/// What a successful job run produced.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutput {
    pub status: JobStatus,
    pub message: String,
    pub data: serde_json::Value,
}

/// One job run, kept in the scheduler history.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: Job,
    pub status: JobStatus,
    pub message: String,
    /// `true` when started by a cron firing, `false` for manual triggers
    pub scheduled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Executes jobs on behalf of the scheduler.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> std::result::Result<JobOutput, MonitorError>;
}

/// Runs jobs against the ingestion pipeline and the calendar reconciler.
pub struct MonitorJobs {
    pipeline: Arc<IngestionPipeline>,
    reconciler: Arc<CalendarReconciler>,
}

impl MonitorJobs {
    pub fn new(pipeline: Arc<IngestionPipeline>, reconciler: Arc<CalendarReconciler>) -> Self {
        Self {
            pipeline,
            reconciler,
        }
    }

    fn ingestion_output(outcome: IngestOutcome) -> JobOutput {
        let status = match outcome {
            IngestOutcome::Ingested { .. } => JobStatus::Succeeded,
            IngestOutcome::DuplicateSkipped { .. } | IngestOutcome::NoData { .. } => JobStatus::Noop,
        };
        JobOutput {
            status,
            message: outcome.to_string(),
            data: serde_json::to_value(&outcome).unwrap_or_default(),
        }
    }

    fn calendar_output(outcome: ReconcileOutcome) -> JobOutput {
        let status = match outcome {
            ReconcileOutcome::Applied { .. } => JobStatus::Succeeded,
            ReconcileOutcome::Unchanged | ReconcileOutcome::ProviderEmpty => JobStatus::Noop,
        };
        JobOutput {
            status,
            message: outcome.to_string(),
            data: serde_json::to_value(outcome).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl JobHandler for MonitorJobs {
    async fn handle(&self, job: Job) -> std::result::Result<JobOutput, MonitorError> {
        match job {
            Job::DailyIngestion => {
                let outcome = self.pipeline.run_daily_ingestion().await?;
                Ok(Self::ingestion_output(outcome))
            }
            Job::CalendarSync => {
                let outcome = self.reconciler.reconcile().await?;
                Ok(Self::calendar_output(outcome))
            }
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Manual trigger refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Job {} is already running", .0.name())]
    AlreadyRunning(Job),
}

/// Result of one run, as returned to the caller that started it.
#[derive(Debug)]
pub struct JobExecution {
    pub report: JobReport,
    pub result: std::result::Result<JobOutput, MonitorError>,
}

/// A parsed schedule with its job
struct ParsedSchedule {
    job: Job,
    expression: String,
    schedule: Schedule,
}

/// Next firing of one job, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct JobSchedule {
    pub job: Job,
    pub cron: String,
    pub next_run: Option<DateTime<FixedOffset>>,
    pub running: bool,
}

/// Snapshot of the scheduler for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub enabled: bool,
    pub jobs: Vec<JobSchedule>,
    /// Most recent first
    pub recent_reports: Vec<JobReport>,
}

/// Cron scheduler with per-job run locks and a bounded report history.
pub struct MonitorScheduler {
    enabled: bool,
    clock: MarketClock,
    handler: Arc<dyn JobHandler>,
    schedules: Vec<ParsedSchedule>,
    state: RwLock<SchedulerState>,
    /// Scheduled time of the last firing per job
    last_fired: RwLock<HashMap<Job, DateTime<FixedOffset>>>,
    run_locks: HashMap<Job, Mutex<()>>,
    history: RwLock<VecDeque<JobReport>>,
    shutdown: Notify,
}

impl MonitorScheduler {
    /// Create a scheduler; fails on an invalid cron expression.
    pub fn new(
        config: &SchedulerConfig,
        clock: MarketClock,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self> {
        let schedules = vec![
            ParsedSchedule {
                job: Job::DailyIngestion,
                expression: config.ingest_cron.clone(),
                schedule: Schedule::from_str(&config.ingest_cron)
                    .with_context(|| format!("Invalid ingest_cron: {}", config.ingest_cron))?,
            },
            ParsedSchedule {
                job: Job::CalendarSync,
                expression: config.calendar_cron.clone(),
                schedule: Schedule::from_str(&config.calendar_cron)
                    .with_context(|| format!("Invalid calendar_cron: {}", config.calendar_cron))?,
            },
        ];

        info!(
            ingest = %config.ingest_cron,
            calendar = %config.calendar_cron,
            utc_offset = %clock.offset(),
            enabled = config.enabled,
            "Scheduler configured"
        );

        let run_locks = [Job::DailyIngestion, Job::CalendarSync]
            .into_iter()
            .map(|job| (job, Mutex::new(())))
            .collect();

        Ok(Self {
            enabled: config.enabled,
            clock,
            handler,
            schedules,
            state: RwLock::new(SchedulerState::Stopped),
            last_fired: RwLock::new(HashMap::new()),
            run_locks,
            history: RwLock::new(VecDeque::with_capacity(MAX_REPORT_HISTORY)),
            shutdown: Notify::new(),
        })
    }

    /// Get current scheduler state
    pub async fn get_state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Stop the scheduler loop
    pub async fn stop(&self) {
        *self.state.write().await = SchedulerState::Stopped;
        self.shutdown.notify_one();
        info!("Scheduler stopped");
    }

    /// Run the scheduler loop until `stop()` is called.
    pub async fn run(&self) {
        if !self.enabled {
            info!("Scheduler disabled, not starting");
            return;
        }

        *self.state.write().await = SchedulerState::Running;
        info!("Scheduler started");

        let mut ticker = interval(Duration::from_secs(TICK_SECS));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.notified() => break,
            }

            if self.get_state().await == SchedulerState::Stopped {
                break;
            }
            self.check_and_execute(self.local_now()).await;
        }
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.clock.offset())
    }

    /// Fire every job that is due at `now`.
    pub async fn check_and_execute(&self, now: DateTime<FixedOffset>) {
        for parsed in &self.schedules {
            let last = self.last_fired.read().await.get(&parsed.job).copied();
            let Some(firing) = due_firing(&parsed.schedule, last, now) else {
                continue;
            };

            self.last_fired.write().await.insert(parsed.job, firing);
            info!(job = parsed.job.name(), scheduled_for = %firing, "Firing scheduled job");

            if let Err(e) = self.execute(parsed.job, true).await {
                warn!(job = parsed.job.name(), error = %e, "Scheduled firing skipped");
            }
        }
    }

    /// Run a job now, outside its schedule.
    pub async fn trigger(&self, job: Job) -> std::result::Result<JobExecution, SchedulerError> {
        self.execute(job, false).await
    }

    async fn execute(
        &self,
        job: Job,
        scheduled: bool,
    ) -> std::result::Result<JobExecution, SchedulerError> {
        let Some(lock) = self.run_locks.get(&job) else {
            return Err(SchedulerError::AlreadyRunning(job));
        };
        let Ok(_guard) = lock.try_lock() else {
            return Err(SchedulerError::AlreadyRunning(job));
        };

        let started_at = Utc::now();
        let result = self.handler.handle(job).await;
        let finished_at = Utc::now();

        let (status, message) = match &result {
            Ok(output) => (output.status, output.message.clone()),
            Err(e) => {
                error!(job = job.name(), error = %e, recoverable = e.is_recoverable(), "Job failed");
                (JobStatus::Failed, e.to_string())
            }
        };

        let report = JobReport {
            job,
            status,
            message,
            scheduled,
            started_at,
            finished_at,
        };
        self.record(report.clone()).await;

        Ok(JobExecution { report, result })
    }

    async fn record(&self, report: JobReport) {
        let mut history = self.history.write().await;
        if history.len() >= MAX_REPORT_HISTORY {
            history.pop_front();
        }
        history.push_back(report);
    }

    /// Most recent reports first.
    pub async fn recent_reports(&self, limit: usize) -> Vec<JobReport> {
        self.history.read().await.iter().rev().take(limit).cloned().collect()
    }

    /// Get next scheduled times for each job
    pub fn next_runs(&self) -> Vec<(Job, DateTime<FixedOffset>)> {
        let now = self.local_now();
        let mut next_times: Vec<_> = self
            .schedules
            .iter()
            .filter_map(|p| p.schedule.after(&now).next().map(|t| (p.job, t)))
            .collect();
        next_times.sort_by_key(|(_, time)| *time);
        next_times
    }

    pub async fn status(&self, report_limit: usize) -> SchedulerStatus {
        let now = self.local_now();
        let jobs = self
            .schedules
            .iter()
            .map(|p| JobSchedule {
                job: p.job,
                cron: p.expression.clone(),
                next_run: p.schedule.after(&now).next(),
                running: self
                    .run_locks
                    .get(&p.job)
                    .is_some_and(|lock| lock.try_lock().is_err()),
            })
            .collect();

        SchedulerStatus {
            state: self.get_state().await,
            enabled: self.enabled,
            jobs,
            recent_reports: self.recent_reports(report_limit).await,
        }
    }
}

/// The scheduled time to fire at `now`, if any.
///
/// A firing is due when it lies within the grace window before `now` and is
/// later than the last firing handled.
pub fn due_firing(
    schedule: &Schedule,
    last_fired: Option<DateTime<FixedOffset>>,
    now: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    let window_start = now - chrono::Duration::seconds(GRACE_SECS);
    let after = match last_fired {
        Some(last) if last > window_start => last,
        _ => window_start,
    };

    schedule.after(&after).take_while(|t| *t <= now).last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::assert_ok;

    struct CountingHandler {
        calls: AtomicU32,
        fail: bool,
        delay_ms: u64,
    }

    impl CountingHandler {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail: false,
                delay_ms: 0,
            }
        }
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, job: Job) -> std::result::Result<JobOutput, MonitorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                return Err(MonitorError::Transaction("disk full".into()));
            }
            Ok(JobOutput {
                status: JobStatus::Succeeded,
                message: format!("{} done", job.name()),
                data: serde_json::Value::Null,
            })
        }
    }

    fn shanghai(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, min, s)
            .unwrap()
    }

    fn scheduler(handler: Arc<CountingHandler>) -> MonitorScheduler {
        MonitorScheduler::new(&SchedulerConfig::default(), MarketClock::new(8).unwrap(), handler).unwrap()
    }

    #[test]
    fn test_job_name() {
        assert_eq!(Job::DailyIngestion.name(), "daily_ingestion");
        assert_eq!(Job::CalendarSync.name(), "calendar_sync");
    }

    #[test]
    fn test_due_firing_window() {
        let schedule = Schedule::from_str("0 30 15 * * *").unwrap();

        // Just before
        assert!(due_firing(&schedule, None, shanghai(2024, 1, 5, 15, 29, 50)).is_none());
        // Within grace
        let due = due_firing(&schedule, None, shanghai(2024, 1, 5, 15, 31, 0));
        assert_eq!(due, Some(shanghai(2024, 1, 5, 15, 30, 0)));
        // Too late
        assert!(due_firing(&schedule, None, shanghai(2024, 1, 5, 15, 33, 0)).is_none());
    }

    #[test]
    fn test_due_firing_once() {
        let schedule = Schedule::from_str("0 30 15 * * *").unwrap();
        let fired = shanghai(2024, 1, 5, 15, 30, 0);
        assert!(due_firing(&schedule, Some(fired), shanghai(2024, 1, 5, 15, 30, 30)).is_none());
        // Next day fires again
        let next = due_firing(&schedule, Some(fired), shanghai(2024, 1, 6, 15, 30, 10));
        assert_eq!(next, Some(shanghai(2024, 1, 6, 15, 30, 0)));
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let config = SchedulerConfig {
            ingest_cron: "not a cron".into(),
            ..Default::default()
        };
        let handler = Arc::new(CountingHandler::new());
        assert!(MonitorScheduler::new(&config, MarketClock::new(8).unwrap(), handler).is_err());
    }

    #[tokio::test]
    async fn test_check_and_execute_fires_once() {
        let handler = Arc::new(CountingHandler::new());
        let scheduler = scheduler(handler.clone());

        scheduler.check_and_execute(shanghai(2024, 1, 5, 15, 30, 10)).await;
        scheduler.check_and_execute(shanghai(2024, 1, 5, 15, 30, 40)).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        let reports = scheduler.recent_reports(10).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].job, Job::DailyIngestion);
        assert!(reports[0].scheduled);
    }

    #[tokio::test]
    async fn test_yearly_calendar_sync() {
        let handler = Arc::new(CountingHandler::new());
        let scheduler = scheduler(handler.clone());

        scheduler.check_and_execute(shanghai(2025, 1, 1, 0, 0, 20)).await;
        let reports = scheduler.recent_reports(10).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].job, Job::CalendarSync);
    }

    #[tokio::test]
    async fn test_trigger_records_failure() {
        let handler = Arc::new(CountingHandler {
            fail: true,
            ..CountingHandler::new()
        });
        let scheduler = scheduler(handler);

        let execution = scheduler.trigger(Job::DailyIngestion).await.unwrap();
        assert_eq!(execution.report.status, JobStatus::Failed);
        assert!(execution.result.is_err());
        assert!(!execution.report.scheduled);
        assert_eq!(scheduler.recent_reports(1).await[0].status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_lock_rejects_concurrent_trigger() {
        let handler = Arc::new(CountingHandler {
            delay_ms: 200,
            ..CountingHandler::new()
        });
        let scheduler = Arc::new(scheduler(handler.clone()));

        let background = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.trigger(Job::CalendarSync).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = scheduler.trigger(Job::CalendarSync).await;
        assert_eq!(second.unwrap_err(), SchedulerError::AlreadyRunning(Job::CalendarSync));

        // Other jobs are not blocked
        assert_ok!(scheduler.trigger(Job::DailyIngestion).await);

        assert!(background.await.unwrap().is_ok());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let handler = Arc::new(CountingHandler::new());
        let scheduler = scheduler(handler);

        for _ in 0..(MAX_REPORT_HISTORY + 5) {
            assert_ok!(scheduler.trigger(Job::DailyIngestion).await);
        }
        assert_eq!(scheduler.recent_reports(usize::MAX).await.len(), MAX_REPORT_HISTORY);
    }

    #[tokio::test]
    async fn test_stop_ends_loop() {
        let handler = Arc::new(CountingHandler::new());
        let scheduler = Arc::new(scheduler(handler));

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.get_state().await, SchedulerState::Running);

        scheduler.stop().await;
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scheduler.get_state().await, SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_status_lists_jobs() {
        let handler = Arc::new(CountingHandler::new());
        let scheduler = scheduler(handler);
        let status = scheduler.status(10).await;

        assert!(status.enabled);
        assert_eq!(status.jobs.len(), 2);
        assert!(status.jobs.iter().all(|j| j.next_run.is_some() && !j.running));
        assert_eq!(scheduler.next_runs().len(), 2);
    }
}
