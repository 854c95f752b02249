//! Job scheduler service for cron-based job execution
//!
//! The scheduler owns every [`Job`] and is the only place their run-time
//! state changes. Executions run as independent tasks and hand their
//! [`JobResult`] back through a `JoinSet`; results are applied at the start of
//! the following tick, before due jobs are computed.

use super::job_executor::JobExecutor;
use super::trigger::{JobTrigger, TriggerHandle, trigger_channel};
use super::types::{FailureKind, Job, JobPriority, JobResult, JobState, minute_slot};
use crate::config::Config;
use anyhow::Result;
use chrono::{DateTime, Local, TimeZone, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Loop settings for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub shutdown_grace_period: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            max_concurrent_jobs: config.max_concurrent_jobs,
            shutdown_grace_period: config.shutdown_grace_period,
        }
    }
}

/// What happened during one tick
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    /// Jobs started this tick, in dispatch order
    pub dispatched: Vec<String>,
    /// Due jobs held back by the concurrency ceiling
    pub deferred: Vec<String>,
    /// Results applied during this tick
    pub results: Vec<JobResult>,
}

/// Snapshot of job states
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub total: usize,
    pub disabled: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub max_concurrent: usize,
}

/// Service responsible for evaluating cron schedules and dispatching jobs
pub struct JobScheduler {
    jobs: BTreeMap<String, Job>,
    executor: JobExecutor,
    settings: SchedulerSettings,
    in_flight: JoinSet<JobResult>,
    trigger_handle: TriggerHandle,
    trigger_receiver: mpsc::UnboundedReceiver<JobTrigger>,
    /// Manual triggers not yet dispatched
    requested: BTreeSet<String>,
}

impl JobScheduler {
    /// Create a scheduler over `jobs`
    pub fn new(jobs: Vec<Job>, executor: JobExecutor, settings: SchedulerSettings) -> Self {
        let (trigger_handle, trigger_receiver) = trigger_channel();
        let settings = SchedulerSettings {
            max_concurrent_jobs: settings.max_concurrent_jobs.max(1),
            ..settings
        };

        Self {
            jobs: jobs.into_iter().map(|job| (job.id.clone(), job)).collect(),
            executor,
            settings,
            in_flight: JoinSet::new(),
            trigger_handle,
            trigger_receiver,
            requested: BTreeSet::new(),
        }
    }

    /// Handle for requesting manual job runs
    pub fn trigger_handle(&self) -> TriggerHandle {
        self.trigger_handle.clone()
    }

    /// All jobs in id order
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            total: self.jobs.len(),
            max_concurrent: self.settings.max_concurrent_jobs,
            ..Default::default()
        };

        for job in self.jobs.values() {
            if !job.enabled {
                stats.disabled += 1;
            }
            match job.state {
                JobState::Pending => stats.pending += 1,
                JobState::Running => stats.running += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }

        stats
    }

    /// Number of executions that have not been collected yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Run the scheduler until cancelled, then shut down gracefully
    pub async fn run(&mut self, cancellation_token: CancellationToken) -> Result<()> {
        info!(
            "Starting job scheduler service ({} jobs, poll interval: {:?}, max concurrent: {})",
            self.jobs.len(),
            self.settings.poll_interval,
            self.settings.max_concurrent_jobs
        );
        let mut schedule_check = interval(self.settings.poll_interval);
        schedule_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = schedule_check.tick() => {
                    let report = self.tick(&Local::now());
                    if !report.dispatched.is_empty() || !report.deferred.is_empty() {
                        debug!(
                            "Tick dispatched {:?}, deferred {:?}",
                            report.dispatched, report.deferred
                        );
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Job scheduler received cancellation signal, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        info!("Job scheduler service stopped");
        Ok(())
    }

    /// One tick at `now` followed by waiting for every in-flight execution
    pub async fn run_once<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> TickReport {
        let mut report = self.tick(now);
        report.results.extend(self.drain().await);
        report
    }

    /// Evaluate schedules at `now` and dispatch due jobs up to the ceiling
    pub fn tick<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> TickReport {
        let mut report = TickReport {
            results: self.collect_finished(),
            ..Default::default()
        };
        self.collect_triggers();

        let slot = minute_slot(now);
        let mut due: Vec<(JobPriority, String)> = Vec::new();

        for job in self.jobs.values_mut() {
            if !job.is_dispatchable() {
                continue;
            }

            let scheduled = job.schedule.matches(now);
            let new_slot = scheduled && job.last_slot != Some(slot);
            let manual = self.requested.contains(&job.id);

            // A fresh natural firing starts a new invocation cycle
            if new_slot && matches!(job.state, JobState::Completed | JobState::Failed) {
                job.state = JobState::Pending;
                job.retry_count = 0;
            }

            if new_slot || manual || (scheduled && job.awaiting_retry()) {
                due.push((job.priority, job.id.clone()));
            }
        }

        due.sort();

        let running = self
            .jobs
            .values()
            .filter(|job| job.state == JobState::Running)
            .count();
        let mut available = self.settings.max_concurrent_jobs.saturating_sub(running);

        for (_, job_id) in due {
            if available == 0 {
                debug!("Job '{}' deferred: at maximum concurrent jobs", job_id);
                report.deferred.push(job_id);
                continue;
            }
            self.dispatch(&job_id, slot);
            available -= 1;
            report.dispatched.push(job_id);
        }

        report
    }

    /// Wait for every in-flight execution and apply its result
    pub async fn drain(&mut self) -> Vec<JobResult> {
        let mut results = Vec::new();
        while let Some(joined) = self.in_flight.join_next().await {
            match joined {
                Ok(result) => {
                    self.apply_result(&result);
                    results.push(result);
                }
                Err(e) => error!("Job task failed to complete: {}", e),
            }
        }
        results
    }

    /// Wait up to the grace period for running jobs, then abort the rest
    pub async fn shutdown(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }

        let grace = self.settings.shutdown_grace_period;
        info!(
            "Waiting up to {:?} for {} running jobs to finish",
            grace,
            self.in_flight.len()
        );

        if tokio::time::timeout(grace, self.drain()).await.is_ok() {
            info!("All running jobs finished");
            return;
        }

        self.in_flight.abort_all();
        while let Some(joined) = self.in_flight.join_next().await {
            match joined {
                Ok(result) => self.apply_result(&result),
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Job task failed during shutdown: {}", e),
            }
        }

        for job in self.jobs.values_mut() {
            if job.state == JobState::Running {
                warn!("Aborted job '{}' after shutdown grace period", job.id);
                job.state = JobState::Failed;
            }
        }
    }

    fn dispatch(&mut self, job_id: &str, slot: chrono::NaiveDateTime) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };

        job.state = JobState::Running;
        job.last_slot = Some(slot);
        job.last_run_at = Some(Utc::now());
        self.requested.remove(job_id);

        let snapshot = job.clone();
        let executor = self.executor.clone();

        self.in_flight.spawn(async move {
            let started_at = Utc::now();
            match AssertUnwindSafe(executor.execute(&snapshot))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => JobResult::failed(
                    &snapshot.id,
                    started_at,
                    Duration::ZERO,
                    FailureKind::Spawn,
                    "job execution panicked",
                ),
            }
        });
    }

    fn collect_finished(&mut self) -> Vec<JobResult> {
        let mut results = Vec::new();
        while let Some(joined) = self.in_flight.try_join_next() {
            match joined {
                Ok(result) => {
                    self.apply_result(&result);
                    results.push(result);
                }
                Err(e) => error!("Job task failed to complete: {}", e),
            }
        }
        results
    }

    fn collect_triggers(&mut self) {
        while let Ok(trigger) = self.trigger_receiver.try_recv() {
            match self.jobs.get(&trigger.job_id) {
                Some(job) if !job.enabled => {
                    warn!(
                        "Ignoring manual trigger for disabled job '{}'",
                        trigger.job_id
                    );
                }
                Some(_) => {
                    info!(
                        "Manual trigger for job '{}' ({})",
                        trigger.job_id, trigger.reason
                    );
                    self.requested.insert(trigger.job_id);
                }
                None => {
                    warn!("Ignoring manual trigger for unknown job '{}'", trigger.job_id);
                }
            }
        }
    }

    fn apply_result(&mut self, result: &JobResult) {
        let Some(job) = self.jobs.get_mut(&result.job_id) else {
            warn!("Received result for unknown job '{}'", result.job_id);
            return;
        };

        if result.success {
            job.state = JobState::Completed;
        } else if job.retry_count < job.max_retries {
            job.retry_count += 1;
            job.state = JobState::Pending;
            info!(
                "Job '{}' will be retried (retry {} of {})",
                job.id, job.retry_count, job.max_retries
            );
        } else {
            job.state = JobState::Failed;
            if job.max_retries > 0 {
                warn!(
                    "Job '{}' failed permanently after {} retries",
                    job.id, job.retry_count
                );
            }
        }

        job.last_result = Some(result.clone());
    }
}
