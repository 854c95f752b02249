//! Job scheduling type definitions

use crate::cron::CronExpression;
use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use std::time::Duration;
use strum::{Display, EnumString, VariantNames};

/// Priority levels for job and input item ordering
///
/// Lower discriminants sort first, so sorting ascending yields urgent work
/// ahead of everything else.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Display,
    EnumString,
    VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum JobPriority {
    Urgent = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl PartialOrd for JobPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

impl JobPriority {
    /// Parse a priority, producing a message that lists the valid options
    pub fn parse(value: &str) -> Result<Self, String> {
        Self::from_str(value.trim()).map_err(|_| {
            format!(
                "unknown priority '{value}', expected one of: {}",
                Self::VARIANTS.join(", ")
            )
        })
    }
}

impl<'de> Deserialize<'de> for JobPriority {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}

/// Run-time state of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// Why an execution attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// The command exceeded its timeout and was killed
    Timeout,
    /// The command ran to completion with a non-zero exit status
    NonZeroExit,
    /// The command could not be started
    Spawn,
}

/// A validated job definition as loaded from a definition file
#[derive(Debug, Clone, PartialEq)]
pub struct JobDefinition {
    pub id: String,
    pub name: String,
    pub command: String,
    pub schedule: CronExpression,
    pub priority: JobPriority,
    pub description: Option<String>,
    pub enabled: bool,
    pub max_retries: u32,
    /// Job-level timeout; `None` falls back to the scheduler default
    pub timeout_seconds: Option<u64>,
}

impl JobDefinition {
    /// Build a schedulable job, resolving the effective timeout
    pub fn into_job(self, default_timeout: Duration) -> Job {
        let timeout = self
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);

        Job {
            id: self.id,
            name: self.name,
            command: self.command,
            schedule: self.schedule,
            priority: self.priority,
            description: self.description,
            enabled: self.enabled,
            max_retries: self.max_retries,
            timeout,
            state: JobState::Pending,
            last_run_at: None,
            retry_count: 0,
            last_result: None,
            last_slot: None,
        }
    }
}

/// A schedulable unit of work together with its run-time state
///
/// Run-time fields are owned by the scheduler loop and are never persisted;
/// a restart rebuilds every job from its definition in the `pending` state.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub command: String,
    pub schedule: CronExpression,
    pub priority: JobPriority,
    pub description: Option<String>,
    pub enabled: bool,
    pub max_retries: u32,
    pub timeout: Duration,
    pub state: JobState,
    pub last_run_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_result: Option<JobResult>,
    /// Minute slot of the most recent dispatch
    pub(crate) last_slot: Option<NaiveDateTime>,
}

impl Job {
    /// Whether a failed attempt left this job waiting for another try
    pub fn awaiting_retry(&self) -> bool {
        self.state == JobState::Pending && self.retry_count > 0
    }

    /// Whether the job may be considered for dispatch at all
    pub fn is_dispatchable(&self) -> bool {
        self.enabled && self.state != JobState::Running
    }

    /// Whether the schedule fires at `now` for an enabled, idle job
    pub fn is_due<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        self.is_dispatchable() && self.schedule.matches(now)
    }
}

/// Outcome of a single execution attempt
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    #[serde(with = "crate::config::duration_serde::duration")]
    pub duration: Duration,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

impl JobResult {
    /// A successful attempt
    pub fn succeeded(
        job_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration: Duration,
        stdout: String,
        stderr: String,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            success: true,
            exit_code: Some(0),
            stdout,
            stderr,
            started_at,
            duration,
            error: None,
            failure: None,
        }
    }

    /// A failed attempt with no captured output
    pub fn failed(
        job_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration: Duration,
        failure: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            started_at,
            duration,
            error: Some(error.into()),
            failure: Some(failure),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }
}

/// Truncate a timestamp to the minute it falls in, in its own timezone
pub(crate) fn minute_slot<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> NaiveDateTime {
    let local = timestamp.naive_local();
    local
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(local)
}
