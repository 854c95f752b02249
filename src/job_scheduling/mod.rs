//! Job scheduling subsystem for cronloop
//!
//! The system is built around these components:
//! - `job_loader`: reads YAML job definitions from the jobs directory
//! - `JobScheduler`: cron evaluation, priority ordering and bounded dispatch
//! - `JobExecutor`: runs one attempt through a `CommandRunner` and `JobHooks`
//! - `TriggerHandle`: requests manual runs from other components

pub mod job_executor;
pub mod job_loader;
pub mod job_scheduler;
pub mod trigger;
pub mod types;

pub use job_executor::{CommandRunner, JobExecutor, JobHooks, NoopHooks, ShellCommandRunner};
pub use job_loader::{LoadReport, RejectedDefinition};
pub use job_scheduler::{JobScheduler, SchedulerSettings, SchedulerStats, TickReport};
pub use trigger::{JobTrigger, TriggerHandle};
pub use types::*;
