/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Config file defaults
pub const DEFAULT_CONFIG_FILE: &str = "cronloop.toml";
pub const ENV_PREFIX: &str = "CRONLOOP_";

// Scheduler defaults
pub const DEFAULT_JOBS_DIR: &str = "jobs";
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 1;
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS: u64 = 30;

// Logging defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Input orchestrator defaults
pub const DEFAULT_STATE_FILE: &str = "state/processed.json";
pub const DEFAULT_INPUTS_POLL_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_SOURCE_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_ISSUE_TRACKER_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_WEBHOOK_SOURCE_NAME: &str = "webhook";
