//! Manual job triggers
//!
//! Other components (the input orchestrator, an operator) ask the scheduler
//! to run a job on its next tick regardless of the cron schedule. Requests are
//! queued on a channel and only the scheduler loop acts on them.

use tokio::sync::mpsc;
use tracing::debug;

/// A request to run a job outside its schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTrigger {
    pub job_id: String,
    /// Free-form description of who asked and why, for logging
    pub reason: String,
}

/// Cloneable sender half used to request manual job runs
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    sender: mpsc::UnboundedSender<JobTrigger>,
}

impl TriggerHandle {
    /// Request a run of `job_id`. Returns false when the scheduler has stopped.
    pub fn trigger(&self, job_id: impl Into<String>, reason: impl Into<String>) -> bool {
        let trigger = JobTrigger {
            job_id: job_id.into(),
            reason: reason.into(),
        };
        debug!(
            "Requesting manual run of job '{}' ({})",
            trigger.job_id, trigger.reason
        );
        self.sender.send(trigger).is_ok()
    }
}

/// Create a connected handle and receiver
pub(crate) fn trigger_channel() -> (TriggerHandle, mpsc::UnboundedReceiver<JobTrigger>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (TriggerHandle { sender }, receiver)
}
