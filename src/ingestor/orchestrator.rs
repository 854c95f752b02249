//! Input orchestrator
//!
//! Polls each registered source on its own interval, drops items the state
//! tracker has already seen, and hands the rest to an [`ItemProcessor`] in
//! priority order. Due sources are polled concurrently; their results are
//! joined before the state tracker is touched, so the tracker has a single
//! writer.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state_tracker::StateTracker;
use crate::config::InputsConfig;
use crate::config::defaults::DEFAULT_SOURCE_INTERVAL_SECONDS;
use crate::errors::StateResult;
use crate::job_scheduling::TriggerHandle;
use crate::sources::{
    InputItem, InputSource, IssueTrackerSource, MailboxSource, ScheduledTriggerSource,
    WebhookInbox,
};

/// Name under which configured cron triggers are registered
pub const SCHEDULED_SOURCE_NAME: &str = "scheduler";

/// Callback that handles one new item
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Handle `item`. An error leaves the item unmarked so it is offered again.
    async fn process(&self, item: &InputItem) -> anyhow::Result<()>;
}

/// Logs each item and does nothing else
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProcessor;

#[async_trait]
impl ItemProcessor for LoggingProcessor {
    async fn process(&self, item: &InputItem) -> anyhow::Result<()> {
        info!(
            "Processing {} item: {} - {} (priority: {})",
            item.source, item.item_id, item.title, item.priority
        );
        Ok(())
    }
}

/// Forwards items to a channel consumer
#[derive(Debug, Clone)]
pub struct ChannelProcessor {
    sender: mpsc::Sender<InputItem>,
}

impl ChannelProcessor {
    pub fn new(sender: mpsc::Sender<InputItem>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ItemProcessor for ChannelProcessor {
    async fn process(&self, item: &InputItem) -> anyhow::Result<()> {
        self.sender
            .send(item.clone())
            .await
            .map_err(|_| anyhow::anyhow!("item consumer has shut down"))
    }
}

/// Triggers the job named in an item's `job` metadata
#[derive(Debug, Clone)]
pub struct JobTriggerProcessor {
    handle: TriggerHandle,
}

impl JobTriggerProcessor {
    pub fn new(handle: TriggerHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl ItemProcessor for JobTriggerProcessor {
    async fn process(&self, item: &InputItem) -> anyhow::Result<()> {
        let Some(job_id) = item.metadata_str("job") else {
            info!(
                "Received {} item: {} - {} (no job to trigger)",
                item.source, item.item_id, item.title
            );
            return Ok(());
        };

        let reason = format!("{}:{}", item.source, item.item_id);
        if !self.handle.trigger(job_id, reason) {
            anyhow::bail!("scheduler is not running, cannot trigger job '{job_id}'");
        }
        info!(
            "Item {}:{} triggered job '{}'",
            item.source, item.item_id, job_id
        );
        Ok(())
    }
}

/// Outcome of one orchestrator pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollReport {
    /// Sources polled this pass, in name order
    pub polled: Vec<String>,
    /// Sources whose poll failed
    pub failed: Vec<String>,
    /// Items not yet processed before this pass
    pub new_items: usize,
    /// Items processed and marked this pass
    pub processed: usize,
}

pub struct InputOrchestrator {
    sources: BTreeMap<String, Arc<dyn InputSource>>,
    intervals: HashMap<String, Duration>,
    default_interval: Duration,
    loop_interval: Duration,
    state: StateTracker,
    processor: Arc<dyn ItemProcessor>,
    last_poll: HashMap<String, Instant>,
}

impl InputOrchestrator {
    pub fn new(state: StateTracker, processor: Arc<dyn ItemProcessor>) -> Self {
        Self {
            sources: BTreeMap::new(),
            intervals: HashMap::new(),
            default_interval: Duration::from_secs(DEFAULT_SOURCE_INTERVAL_SECONDS),
            loop_interval: Duration::from_secs(60),
            state,
            processor,
            last_poll: HashMap::new(),
        }
    }

    /// Build an orchestrator with every source described in `[inputs]`.
    ///
    /// A source whose configuration is invalid is logged and left out; the
    /// remaining sources are still registered.
    pub async fn from_config(
        inputs: &InputsConfig,
        state: StateTracker,
        processor: Arc<dyn ItemProcessor>,
        webhook_inbox: &WebhookInbox,
    ) -> Self {
        let mut orchestrator = Self::new(state, processor)
            .with_default_interval(Duration::from_secs(inputs.default_source_interval_seconds))
            .with_poll_interval(Duration::from_secs(inputs.poll_interval_seconds));

        for (name, seconds) in &inputs.intervals {
            orchestrator = orchestrator.with_interval(name, Duration::from_secs(*seconds));
        }

        if !inputs.triggers.is_empty() {
            orchestrator.register(Arc::new(ScheduledTriggerSource::new(
                SCHEDULED_SOURCE_NAME,
                inputs.triggers.clone(),
            )));
        }
        for mailbox in &inputs.mailboxes {
            orchestrator.register(Arc::new(MailboxSource::new(&mailbox.name, &mailbox.path)));
        }
        for tracker in &inputs.issue_trackers {
            match IssueTrackerSource::new(tracker) {
                Ok(source) => orchestrator.register(Arc::new(source)),
                Err(e) => error!("Skipping input source '{}': {}", tracker.name, e),
            }
        }
        if let Some(webhook) = &inputs.webhook {
            orchestrator.register(Arc::new(webhook_inbox.register(&webhook.name).await));
        }

        orchestrator
    }

    /// Add a source under its own name, replacing any previous one
    pub fn register(&mut self, source: Arc<dyn InputSource>) {
        let name = source.name().to_string();
        if self.sources.insert(name.clone(), source).is_some() {
            warn!("Input source '{}' registered twice, keeping the latest", name);
        }
        self.last_poll.remove(&name);
    }

    pub fn with_source(mut self, source: Arc<dyn InputSource>) -> Self {
        self.register(source);
        self
    }

    /// Poll interval for one source
    pub fn with_interval(mut self, source: impl Into<String>, interval: Duration) -> Self {
        self.intervals.insert(source.into(), interval);
        self
    }

    /// Interval for sources without their own
    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    /// How often `run` wakes up to look for due sources
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.loop_interval = interval;
        self
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    pub fn interval_for(&self, source: &str) -> Duration {
        self.intervals
            .get(source)
            .copied()
            .unwrap_or(self.default_interval)
    }

    fn is_due(&self, source: &str, now: Instant) -> bool {
        self.last_poll
            .get(source)
            .is_none_or(|last| now.duration_since(*last) >= self.interval_for(source))
    }

    /// Run until cancelled
    pub async fn run(&mut self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        info!(
            "Starting input orchestrator ({} sources: {:?})",
            self.sources.len(),
            self.sources.keys().collect::<Vec<_>>()
        );
        let mut poll_check = interval(self.loop_interval);
        poll_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll_check.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Input orchestrator tick aborted: {}", e);
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Input orchestrator received cancellation signal, shutting down");
                    break;
                }
            }
        }

        info!("Input orchestrator stopped");
        Ok(())
    }

    /// One pass over every due source.
    ///
    /// Only a state store failure is returned as an error; source failures
    /// are logged and reported in [`PollReport::failed`].
    pub async fn run_once(&mut self) -> StateResult<PollReport> {
        let now = Instant::now();
        let mut report = PollReport::default();

        let polls: Vec<_> = self
            .sources
            .iter()
            .filter(|(name, _)| self.is_due(name, now))
            .map(|(name, source)| {
                let source = Arc::clone(source);
                (
                    name.clone(),
                    tokio::spawn(async move { source.poll().await }),
                )
            })
            .collect();

        let mut candidates = Vec::new();
        for (name, handle) in polls {
            report.polled.push(name.clone());
            match handle.await {
                Ok(Ok(items)) => {
                    debug!("Polled {}: {} items", name, items.len());
                    self.last_poll.insert(name.clone(), Instant::now());
                    candidates.extend(items.into_iter().map(|mut item| {
                        item.source = name.clone();
                        item
                    }));
                }
                Ok(Err(e)) => {
                    error!("Error polling {}: {}", name, e);
                    report.failed.push(name);
                }
                Err(e) => {
                    error!("Polling task for {} failed: {}", name, e);
                    report.failed.push(name);
                }
            }
        }

        let mut seen = HashSet::new();
        let (already_processed, mut items): (Vec<InputItem>, Vec<InputItem>) = candidates
            .into_iter()
            .filter(|item| seen.insert((item.source.clone(), item.item_id.clone())))
            .partition(|item| self.state.is_processed(&item.source, &item.item_id));

        for item in &already_processed {
            let Some(source) = self.sources.get(&item.source) else {
                continue;
            };
            if let Err(e) = source.discard(&item.item_id).await {
                debug!(
                    "Failed to discard {} item {}: {}",
                    item.source, item.item_id, e
                );
            }
        }

        items.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        report.new_items = items.len();

        if !items.is_empty() {
            info!(
                "Found {} new items ({} already processed)",
                items.len(),
                already_processed.len()
            );
        }

        for item in items {
            if let Err(e) = self.processor.process(&item).await {
                warn!(
                    "Failed to process {} item {}, will retry next poll: {}",
                    item.source, item.item_id, e
                );
                continue;
            }

            self.state.mark_processed(&item.source, &item.item_id)?;
            report.processed += 1;

            let Some(source) = self.sources.get(&item.source) else {
                continue;
            };
            if let Err(e) = source.acknowledge(&item.item_id).await {
                warn!(
                    "Failed to acknowledge {} item {}: {}",
                    item.source, item.item_id, e
                );
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceResult;
    use crate::job_scheduling::JobPriority;

    struct FixedSource {
        name: String,
        items: Vec<(String, JobPriority)>,
    }

    #[async_trait]
    impl InputSource for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn poll(&self) -> SourceResult<Vec<InputItem>> {
            Ok(self
                .items
                .iter()
                .map(|(id, priority)| InputItem::new(&self.name, id, *priority, id, ""))
                .collect())
        }
    }

    fn fixed(name: &str, items: &[(&str, JobPriority)]) -> Arc<dyn InputSource> {
        Arc::new(FixedSource {
            name: name.to_string(),
            items: items.iter().map(|(id, p)| (id.to_string(), *p)).collect(),
        })
    }

    fn orchestrator(dir: &tempfile::TempDir) -> (InputOrchestrator, mpsc::Receiver<InputItem>) {
        let state = StateTracker::open(dir.path().join("state.json")).unwrap();
        let (sender, receiver) = mpsc::channel(64);
        (
            InputOrchestrator::new(state, Arc::new(ChannelProcessor::new(sender))),
            receiver,
        )
    }

    #[tokio::test]
    async fn test_items_are_processed_in_priority_order_once() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, mut receiver) = orchestrator(&dir);
        let mut orchestrator = orchestrator
            .with_source(fixed("b-source", &[("low-1", JobPriority::Low), ("urgent-1", JobPriority::Urgent)]))
            .with_source(fixed("a-source", &[("high-1", JobPriority::High), ("low-0", JobPriority::Low)]))
            .with_default_interval(Duration::ZERO);

        let report = orchestrator.run_once().await.unwrap();
        assert_eq!(report.polled, vec!["a-source", "b-source"]);
        assert_eq!(report.new_items, 4);
        assert_eq!(report.processed, 4);

        let mut order = Vec::new();
        while let Ok(item) = receiver.try_recv() {
            order.push(format!("{}/{}", item.source, item.item_id));
        }
        assert_eq!(
            order,
            vec!["b-source/urgent-1", "a-source/high-1", "a-source/low-0", "b-source/low-1"]
        );

        let second = orchestrator.run_once().await.unwrap();
        assert_eq!(second.new_items, 0);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicates_within_a_poll_are_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _receiver) = orchestrator(&dir);
        let mut orchestrator = orchestrator.with_source(fixed(
            "dupes",
            &[("x", JobPriority::Medium), ("x", JobPriority::Medium)],
        ));

        let report = orchestrator.run_once().await.unwrap();
        assert_eq!(report.new_items, 1);
        assert_eq!(orchestrator.state().processed_count("dupes"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_respect_their_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _receiver) = orchestrator(&dir);
        let mut orchestrator = orchestrator
            .with_source(fixed("fast", &[]))
            .with_source(fixed("slow", &[]))
            .with_interval("fast", Duration::from_secs(60));

        assert_eq!(orchestrator.interval_for("slow"), Duration::from_secs(300));
        assert_eq!(orchestrator.run_once().await.unwrap().polled, vec!["fast", "slow"]);
        assert!(orchestrator.run_once().await.unwrap().polled.is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(orchestrator.run_once().await.unwrap().polled, vec!["fast"]);

        tokio::time::advance(Duration::from_secs(240)).await;
        assert_eq!(orchestrator.run_once().await.unwrap().polled, vec!["fast", "slow"]);
    }

    struct RejectingProcessor;

    #[async_trait]
    impl ItemProcessor for RejectingProcessor {
        async fn process(&self, _item: &InputItem) -> anyhow::Result<()> {
            anyhow::bail!("not today")
        }
    }

    #[tokio::test]
    async fn test_processing_failure_leaves_item_unmarked() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateTracker::open(dir.path().join("state.json")).unwrap();
        let mut orchestrator = InputOrchestrator::new(state, Arc::new(RejectingProcessor))
            .with_source(fixed("github", &[("1", JobPriority::High)]));

        let report = orchestrator.run_once().await.unwrap();
        assert_eq!(report.new_items, 1);
        assert_eq!(report.processed, 0);
        assert!(!orchestrator.state().is_processed("github", "1"));
    }

    #[tokio::test]
    async fn test_state_write_failure_aborts_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let (orchestrator, _receiver) = orchestrator(&dir);
        let mut orchestrator =
            orchestrator.with_source(fixed("github", &[("1", JobPriority::High)]));

        // A non-empty directory where the document belongs cannot be replaced
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "untouched").unwrap();

        assert!(orchestrator.run_once().await.is_err());
        assert!(!orchestrator.state().is_processed("github", "1"));
        assert_eq!(std::fs::read_to_string(path.join("keep")).unwrap(), "untouched");
    }

    #[tokio::test]
    async fn test_invalid_source_config_is_skipped() {
        use crate::config::{IssueTrackerConfig, MailboxConfig};

        let dir = tempfile::tempdir().unwrap();
        let inputs = InputsConfig {
            mailboxes: vec![MailboxConfig {
                name: "email".to_string(),
                path: dir.path().join("Maildir"),
            }],
            issue_trackers: vec![IssueTrackerConfig {
                name: "github".to_string(),
                api_base: "https://api.github.com".to_string(),
                repository: "no-slash".to_string(),
                token_env: None,
                labels: Vec::new(),
                ack_comment: None,
            }],
            ..InputsConfig::default()
        };
        let state = StateTracker::open(dir.path().join("state.json")).unwrap();

        let orchestrator = InputOrchestrator::from_config(
            &inputs,
            state,
            Arc::new(LoggingProcessor),
            &WebhookInbox::new(),
        )
        .await;
        assert_eq!(orchestrator.source_names().collect::<Vec<_>>(), vec!["email"]);
    }

    #[tokio::test]
    async fn test_job_trigger_processor() {
        let (handle, mut receiver) = crate::job_scheduling::trigger::trigger_channel();
        let processor = JobTriggerProcessor::new(handle);

        let item = InputItem::new("scheduler", "t@2024", JobPriority::High, "t", "")
            .with_metadata("job", "backup");
        processor.process(&item).await.unwrap();
        assert_eq!(receiver.try_recv().unwrap().job_id, "backup");

        let plain = InputItem::new("email", "m1", JobPriority::Low, "hello", "");
        processor.process(&plain).await.unwrap();
        assert!(receiver.try_recv().is_err());

        drop(receiver);
        assert!(processor.process(&item).await.is_err());
    }
}
