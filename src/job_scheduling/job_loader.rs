//! Job definition loading
//!
//! Each `.yaml`/`.yml` file in the jobs directory holds one definition.
//! Invalid definitions are reported and skipped so that one bad file never
//! stops the scheduler from running the rest.

use super::types::{Job, JobDefinition, JobPriority};
use crate::cron::CronExpression;
use crate::errors::{AppError, AppResult, JobDefinitionError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Definition file as written on disk; unknown keys are ignored
#[derive(Debug, Default, Deserialize)]
struct RawJobDefinition {
    id: Option<String>,
    name: Option<String>,
    command: Option<String>,
    schedule: Option<String>,
    priority: Option<String>,
    description: Option<String>,
    enabled: Option<bool>,
    max_retries: Option<u32>,
    timeout_seconds: Option<u64>,
}

/// A definition file that was rejected
#[derive(Debug)]
pub struct RejectedDefinition {
    pub path: PathBuf,
    pub error: JobDefinitionError,
}

/// Result of loading a jobs directory
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Valid definitions in file-name order
    pub definitions: Vec<JobDefinition>,
    pub rejected: Vec<RejectedDefinition>,
}

impl LoadReport {
    /// Convert the valid definitions into schedulable jobs
    pub fn into_jobs(self, default_timeout: Duration) -> Vec<Job> {
        self.definitions
            .into_iter()
            .map(|definition| definition.into_job(default_timeout))
            .collect()
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, JobDefinitionError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(JobDefinitionError::MissingField { field }),
    }
}

/// Parse and validate a single YAML definition
pub fn parse_definition(text: &str) -> Result<JobDefinition, JobDefinitionError> {
    let raw: Option<RawJobDefinition> = serde_yaml::from_str(text)?;
    let raw = raw.unwrap_or_default();

    let id = required(raw.id, "id")?;
    let name = required(raw.name, "name")?;
    let command = required(raw.command, "command")?;
    let schedule_text = required(raw.schedule, "schedule")?;

    let schedule = CronExpression::parse(&schedule_text).map_err(|source| {
        JobDefinitionError::InvalidSchedule {
            schedule: schedule_text.clone(),
            source,
        }
    })?;

    let priority = match raw.priority {
        Some(value) => JobPriority::parse(&value).map_err(|message| {
            JobDefinitionError::InvalidField {
                field: "priority",
                message,
            }
        })?,
        None => JobPriority::default(),
    };

    if raw.timeout_seconds == Some(0) {
        return Err(JobDefinitionError::InvalidField {
            field: "timeout_seconds",
            message: "must be greater than zero".to_string(),
        });
    }

    Ok(JobDefinition {
        id: id.trim().to_string(),
        name,
        command,
        schedule,
        priority,
        description: raw.description,
        enabled: raw.enabled.unwrap_or(true),
        max_retries: raw.max_retries.unwrap_or(0),
        timeout_seconds: raw.timeout_seconds,
    })
}

/// Read and parse one definition file
pub fn load_file(path: &Path) -> Result<JobDefinition, JobDefinitionError> {
    let text = std::fs::read_to_string(path).map_err(|source| JobDefinitionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_definition(&text)
}

fn is_definition_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

/// Load every definition in `jobs_dir`
///
/// Only an unreadable directory is an error; individual files that fail to
/// load end up in [`LoadReport::rejected`].
pub fn load_dir(jobs_dir: &Path) -> AppResult<LoadReport> {
    let entries = std::fs::read_dir(jobs_dir).map_err(|e| {
        AppError::configuration(format!(
            "cannot read jobs directory {}: {e}",
            jobs_dir.display()
        ))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| is_definition_file(path))
        .collect();
    paths.sort();

    let mut report = LoadReport::default();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    for path in paths {
        let result = load_file(&path).and_then(|definition| {
            match seen.get(&definition.id) {
                Some(first) => Err(JobDefinitionError::DuplicateId {
                    id: definition.id.clone(),
                    first: first.clone(),
                }),
                None => Ok(definition),
            }
        });

        match result {
            Ok(definition) => {
                debug!(
                    "Loaded job '{}' from {} (schedule: '{}', priority: {})",
                    definition.id,
                    path.display(),
                    definition.schedule,
                    definition.priority
                );
                seen.insert(definition.id.clone(), path);
                report.definitions.push(definition);
            }
            Err(error) => {
                warn!("Skipping job definition {}: {}", path.display(), error);
                report.rejected.push(RejectedDefinition { path, error });
            }
        }
    }

    info!(
        "Loaded {} job definitions from {} ({} rejected)",
        report.definitions.len(),
        jobs_dir.display(),
        report.rejected.len()
    );

    Ok(report)
}
