use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod defaults;
pub mod duration_serde;

use crate::cron::CronExpression;
use crate::errors::{AppError, AppResult};
use crate::job_scheduling::JobPriority;
use defaults::*;

/// Top-level configuration: the scheduler settings live at the root of the
/// file, the optional input orchestrator under `[inputs]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one YAML job definition per file
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: PathBuf,
    /// How often the scheduler evaluates cron schedules
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Timeout applied to jobs that do not set their own
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    /// Upper bound on simultaneously running jobs
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// How long in-flight jobs may keep running after shutdown is requested
    #[serde(
        default = "default_shutdown_grace_period",
        with = "duration_serde::duration"
    )]
    pub shutdown_grace_period: Duration,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub inputs: Option<InputsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write logs to this file instead of stdout
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// Input orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputsConfig {
    /// Processed-item store
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// How often the orchestrator loop wakes up to check source intervals
    #[serde(default = "default_inputs_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Interval for sources without an entry in `intervals`
    #[serde(default = "default_source_interval_seconds")]
    pub default_source_interval_seconds: u64,
    /// Per-source poll intervals in seconds
    #[serde(default)]
    pub intervals: BTreeMap<String, u64>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub mailboxes: Vec<MailboxConfig>,
    #[serde(default)]
    pub issue_trackers: Vec<IssueTrackerConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

/// A named cron trigger surfaced through the scheduled-trigger source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub name: String,
    pub schedule: CronExpression,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Job to trigger when the item is processed
    #[serde(default)]
    pub job: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub name: String,
    /// Maildir root containing `new/` and `cur/`
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTrackerConfig {
    pub name: String,
    #[serde(default = "default_issue_tracker_api_base")]
    pub api_base: String,
    /// `owner/repo`
    pub repository: String,
    /// Environment variable holding the API token
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Comment posted on an issue once it has been handled
    #[serde(default)]
    pub ack_comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_source_name")]
    pub name: String,
    pub bind: SocketAddr,
}

fn default_jobs_dir() -> PathBuf {
    PathBuf::from(DEFAULT_JOBS_DIR)
}

fn default_poll_interval_seconds() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}

fn default_shutdown_grace_period() -> Duration {
    Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS)
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

fn default_inputs_poll_interval_seconds() -> u64 {
    DEFAULT_INPUTS_POLL_INTERVAL_SECONDS
}

fn default_source_interval_seconds() -> u64 {
    DEFAULT_SOURCE_INTERVAL_SECONDS
}

fn default_issue_tracker_api_base() -> String {
    DEFAULT_ISSUE_TRACKER_API_BASE.to_string()
}

fn default_webhook_source_name() -> String {
    DEFAULT_WEBHOOK_SOURCE_NAME.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs_dir: default_jobs_dir(),
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            default_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            shutdown_grace_period: default_shutdown_grace_period(),
            logging: LoggingConfig::default(),
            inputs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            json: false,
        }
    }
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            poll_interval_seconds: DEFAULT_INPUTS_POLL_INTERVAL_SECONDS,
            default_source_interval_seconds: DEFAULT_SOURCE_INTERVAL_SECONDS,
            intervals: BTreeMap::new(),
            triggers: Vec::new(),
            mailboxes: Vec::new(),
            issue_trackers: Vec::new(),
            webhook: None,
        }
    }
}

impl InputsConfig {
    /// Poll interval for a named source, falling back to the default
    pub fn interval_for(&self, source: &str) -> Duration {
        Duration::from_secs(
            self.intervals
                .get(source)
                .copied()
                .unwrap_or(self.default_source_interval_seconds),
        )
    }
}

impl Config {
    /// Layered configuration: defaults, then the TOML file, then `CRONLOOP_*`
    /// environment variables (nested keys separated by `__`).
    pub fn figment(config_file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// The file `load` reads for a `--config` value
    pub fn resolve_path(config_file: Option<&Path>) -> PathBuf {
        config_file.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf)
    }

    /// Load configuration. An explicitly requested file must exist; the
    /// default file is optional.
    pub fn load(config_file: Option<&Path>) -> AppResult<Self> {
        let path = Self::resolve_path(config_file);

        if config_file.is_some() && !path.exists() {
            return Err(AppError::configuration(format!(
                "config file {} does not exist",
                path.display()
            )));
        }

        let config: Config = Self::figment(&path)
            .extract()
            .map_err(|e| AppError::configuration(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    /// Reject values that would stall or disable the loops
    pub fn validate(&self) -> AppResult<()> {
        if self.poll_interval_seconds == 0 {
            return Err(AppError::configuration(
                "poll_interval_seconds must be greater than zero",
            ));
        }
        if self.default_timeout_seconds == 0 {
            return Err(AppError::configuration(
                "default_timeout_seconds must be greater than zero",
            ));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(AppError::configuration(
                "max_concurrent_jobs must be at least 1",
            ));
        }

        if let Some(inputs) = &self.inputs {
            if inputs.poll_interval_seconds == 0 || inputs.default_source_interval_seconds == 0 {
                return Err(AppError::configuration(
                    "inputs poll intervals must be greater than zero",
                ));
            }
            if let Some((name, _)) = inputs.intervals.iter().find(|(_, secs)| **secs == 0) {
                return Err(AppError::configuration(format!(
                    "poll interval for source '{name}' must be greater than zero"
                )));
            }
        }

        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| AppError::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.jobs_dir, PathBuf::from("jobs"));
        assert_eq!(config.poll_interval_seconds, 60);
        assert_eq!(config.default_timeout_seconds, 300);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert!(config.inputs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(Config::resolve_path(None), PathBuf::from("cronloop.toml"));
        assert_eq!(
            Config::resolve_path(Some(Path::new("etc/cronloop.toml"))),
            PathBuf::from("etc/cronloop.toml")
        );
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
jobs_dir = "custom/jobs"
poll_interval_seconds = 30
max_concurrent_jobs = 2
shutdown_grace_period = "5s"

[logging]
level = "debug"

[inputs]
state_file = "var/state.json"

[inputs.intervals]
github = 120

[[inputs.triggers]]
name = "daily-review"
schedule = "0 9 * * *"
priority = "high"
job = "review"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.jobs_dir, PathBuf::from("custom/jobs"));
        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.default_timeout_seconds, 300);
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.shutdown_grace_period, Duration::from_secs(5));
        assert_eq!(config.logging.level, "debug");

        let inputs = config.inputs.unwrap();
        assert_eq!(inputs.state_file, PathBuf::from("var/state.json"));
        assert_eq!(inputs.interval_for("github"), Duration::from_secs(120));
        assert_eq!(inputs.interval_for("email"), Duration::from_secs(300));
        assert_eq!(inputs.triggers[0].priority, JobPriority::High);
        assert_eq!(inputs.triggers[0].schedule.as_str(), "0 9 * * *");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_concurrent_jobs = 0").unwrap();
        assert!(Config::load(Some(file.path())).is_err());

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[[inputs.triggers]]\nname = \"bad\"\nschedule = \"99 * * * *\"").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_effective_config_renders_as_toml() {
        let rendered = Config::default().to_toml_string().unwrap();
        assert!(rendered.contains("poll_interval_seconds = 60"));
        assert!(rendered.contains("shutdown_grace_period = \"30s\""));
    }
}
