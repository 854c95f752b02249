pub mod config;
pub mod cron;
pub mod errors;
pub mod ingestor;
pub mod job_scheduling;
pub mod logging;
pub mod sources;
pub mod utils;
