//! Job executor for running job commands
//!
//! Execution is split into a [`CommandRunner`] strategy that actually runs a
//! command, and [`JobHooks`] that observe each attempt. Both are injected into
//! the [`JobExecutor`], so custom behaviour is composed rather than inherited.
//!
//! On unix each command runs in its own process group. A timed-out or
//! aborted attempt kills the whole group, so processes the shell started
//! do not outlive the job.

use super::types::{FailureKind, Job, JobResult};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Strategy for executing a job's command
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command, enforcing `job.timeout`. Failures are reported in the
    /// returned result, never as a panic or error.
    async fn run(&self, job: &Job) -> JobResult;
}

/// Observers invoked around every execution attempt
///
/// Hook errors are logged and otherwise ignored.
#[async_trait]
pub trait JobHooks: Send + Sync {
    async fn before_execute(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_execute(&self, _job: &Job, _result: &JobResult) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl JobHooks for NoopHooks {}

/// Kills a command's process group when dropped while armed
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: if cfg!(unix) {
                pid.and_then(|pid| i32::try_from(pid).ok())
            } else {
                None
            },
        }
    }

    /// The command finished on its own; leave the group alone
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            // SAFETY: killpg has no memory-safety preconditions
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
                debug!("Killed process group {}", pgid);
            }
        }
    }
}

/// Runs commands through a shell with a timeout governor
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    shell: String,
    working_dir: Option<PathBuf>,
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
        }
    }
}

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands from this directory instead of the process cwd
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Use a different shell (invoked as `<shell> -c <command>`)
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, job: &Job) -> JobResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&job.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return JobResult::failed(
                    &job.id,
                    started_at,
                    start.elapsed(),
                    FailureKind::Spawn,
                    format!("failed to start command: {e}"),
                );
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        // The guard then kills anything else left in its group.
        let mut group = ProcessGroupGuard::new(child.id());
        let outcome = tokio::time::timeout(job.timeout, child.wait_with_output()).await;
        if matches!(outcome, Ok(Ok(_))) {
            group.disarm();
        }

        match outcome {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

                if output.status.success() {
                    JobResult::succeeded(&job.id, started_at, start.elapsed(), stdout, stderr)
                } else {
                    JobResult {
                        exit_code: output.status.code(),
                        stdout,
                        stderr,
                        ..JobResult::failed(
                            &job.id,
                            started_at,
                            start.elapsed(),
                            FailureKind::NonZeroExit,
                            format!("command exited with {}", output.status),
                        )
                    }
                }
            }
            Ok(Err(e)) => JobResult::failed(
                &job.id,
                started_at,
                start.elapsed(),
                FailureKind::Spawn,
                format!("failed to collect command output: {e}"),
            ),
            Err(_) => JobResult::failed(
                &job.id,
                started_at,
                start.elapsed(),
                FailureKind::Timeout,
                format!("command timed out after {}s", job.timeout.as_secs_f64()),
            ),
        }
    }
}

/// Runs a job attempt: hooks, command, result logging
#[derive(Clone)]
pub struct JobExecutor {
    runner: Arc<dyn CommandRunner>,
    hooks: Arc<dyn JobHooks>,
}

impl JobExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn JobHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Execute one attempt of `job`
    pub async fn execute(&self, job: &Job) -> JobResult {
        info!(
            "Starting job '{}' (priority: {}, attempt: {})",
            job.id,
            job.priority,
            job.retry_count + 1
        );

        if let Err(e) = self.hooks.before_execute(job).await {
            warn!("before_execute hook failed for job '{}': {}", job.id, e);
        }

        let result = self.runner.run(job).await;

        if result.success {
            info!(
                "Job '{}' completed successfully in {:?}",
                job.id, result.duration
            );
        } else {
            error!(
                "Job '{}' failed after {:?}: {}",
                job.id,
                result.duration,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        if !result.stderr.is_empty() {
            debug!("Job '{}' stderr: {}", job.id, result.stderr.trim_end());
        }

        if let Err(e) = self.hooks.after_execute(job, &result).await {
            warn!("after_execute hook failed for job '{}': {}", job.id, e);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_scheduling::types::JobDefinition;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn job(command: &str, timeout: Duration) -> Job {
        JobDefinition {
            id: "test".to_string(),
            name: "Test".to_string(),
            command: command.to_string(),
            schedule: "* * * * *".parse().unwrap(),
            priority: Default::default(),
            description: None,
            enabled: true,
            max_retries: 0,
            timeout_seconds: None,
        }
        .into_job(timeout)
    }

    #[tokio::test]
    async fn test_successful_command_captures_output() {
        let result = ShellCommandRunner::new()
            .run(&job("echo hello; echo oops >&2", Duration::from_secs(10)))
            .await;

        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.stderr.trim(), "oops");
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let result = ShellCommandRunner::new()
            .run(&job("exit 3", Duration::from_secs(10)))
            .await;

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.failure, Some(FailureKind::NonZeroExit));
    }

    #[tokio::test]
    async fn test_timeout_is_distinguished() {
        let result = ShellCommandRunner::new()
            .run(&job("sleep 5", Duration::from_millis(200)))
            .await;

        assert!(!result.success);
        assert!(result.is_timeout());
        assert!(result.duration < Duration::from_secs(5));
    }

    /// Whether `pid` is still running (zombies count as gone)
    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_background_processes() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("sleeper.pid");
        let command = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());

        let result = ShellCommandRunner::new()
            .run(&job(&command, Duration::from_millis(500)))
            .await;
        assert!(result.is_timeout());

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        let mut running = is_running(pid);
        for _ in 0..40 {
            if !running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            running = is_running(pid);
        }
        assert!(!running, "background sleep {pid} outlived the timeout");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let result = ShellCommandRunner::new()
            .with_shell("/nonexistent/shell")
            .run(&job("true", Duration::from_secs(1)))
            .await;

        assert_eq!(result.failure, Some(FailureKind::Spawn));
    }

    struct CountingHooks {
        before: AtomicUsize,
        after: AtomicUsize,
    }

    #[async_trait]
    impl JobHooks for CountingHooks {
        async fn before_execute(&self, _job: &Job) -> anyhow::Result<()> {
            self.before.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("hook failures are not fatal")
        }

        async fn after_execute(&self, _job: &Job, result: &JobResult) -> anyhow::Result<()> {
            assert!(result.success);
            self.after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_hooks_wrap_execution() {
        let hooks = Arc::new(CountingHooks {
            before: AtomicUsize::new(0),
            after: AtomicUsize::new(0),
        });
        let executor =
            JobExecutor::new(Arc::new(ShellCommandRunner::new())).with_hooks(hooks.clone());

        let result = executor.execute(&job("true", Duration::from_secs(5))).await;

        assert!(result.success);
        assert_eq!(hooks.before.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.after.load(Ordering::SeqCst), 1);
    }
}
