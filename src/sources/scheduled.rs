//! Scheduled trigger source
//!
//! Bridges named cron triggers into the input pipeline. Each poll covers every
//! minute since the previous poll, so a source polled less often than once a
//! minute still sees every firing. Item ids embed the firing minute, which
//! lets the state tracker deduplicate re-polls and restarts.
//!
//! The window only moves past a firing once that firing is acknowledged or
//! discarded, so a firing whose processing failed is offered again.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::traits::{InputItem, InputSource};
use crate::config::TriggerConfig;
use crate::errors::SourceResult;
use crate::job_scheduling::types::minute_slot;

/// Longest catch-up window evaluated in one poll
const MAX_CATCH_UP_MINUTES: i64 = 24 * 60;

/// Progress of the polling window
#[derive(Debug, Default)]
struct TriggerCursor {
    /// Firings at or before this minute are settled
    last_checked: Option<NaiveDateTime>,
    /// End of the most recent poll window
    polled_through: Option<NaiveDateTime>,
    /// Firings offered but not yet settled, by item id
    outstanding: BTreeMap<String, NaiveDateTime>,
}

impl TriggerCursor {
    fn settle(&mut self) {
        self.last_checked = match self.outstanding.values().min() {
            Some(earliest) => Some(*earliest - Duration::minutes(1)),
            None => self.polled_through,
        };
    }
}

pub struct ScheduledTriggerSource {
    name: String,
    triggers: Vec<TriggerConfig>,
    cursor: Mutex<TriggerCursor>,
}

impl ScheduledTriggerSource {
    pub fn new(name: impl Into<String>, triggers: Vec<TriggerConfig>) -> Self {
        Self {
            name: name.into(),
            triggers,
            cursor: Mutex::new(TriggerCursor::default()),
        }
    }

    fn cursor(&self) -> MutexGuard<'_, TriggerCursor> {
        self.cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Items for every unsettled trigger firing up to `now`
    pub fn poll_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Vec<InputItem> {
        let current = minute_slot(now);
        let mut cursor = self.cursor();

        let first = match cursor.last_checked {
            Some(previous) if previous < current => (previous + Duration::minutes(1))
                .max(current - Duration::minutes(MAX_CATCH_UP_MINUTES - 1)),
            _ => current,
        };

        let mut items = Vec::new();
        let mut outstanding = BTreeMap::new();
        let mut minute = first;
        while minute <= current {
            for trigger in &self.triggers {
                if trigger.schedule.matches(&minute.and_utc()) {
                    let item = self.item_for(trigger, minute);
                    outstanding.insert(item.item_id.clone(), minute);
                    items.push(item);
                }
            }
            minute += Duration::minutes(1);
        }

        cursor.outstanding = outstanding;
        cursor.polled_through = Some(current);
        cursor.settle();
        drop(cursor);

        if !items.is_empty() {
            debug!("{} trigger firings due for source '{}'", items.len(), self.name);
        }
        items
    }

    /// Mark a firing as handled so later polls move past it
    pub fn settle(&self, item_id: &str) {
        let mut cursor = self.cursor();
        cursor.outstanding.remove(item_id);
        cursor.settle();
    }

    fn item_for(&self, trigger: &TriggerConfig, minute: NaiveDateTime) -> InputItem {
        let title = trigger
            .title
            .clone()
            .unwrap_or_else(|| format!("Scheduled trigger: {}", trigger.name));

        let mut item = InputItem::new(
            &self.name,
            format!("{}@{}", trigger.name, minute.format("%Y-%m-%dT%H:%M")),
            trigger.priority,
            title,
            trigger.description.clone(),
        )
        .with_metadata("trigger", trigger.name.clone())
        .with_metadata("schedule", trigger.schedule.to_string())
        .with_metadata("fired_at", minute.format("%Y-%m-%dT%H:%M").to_string());

        if let Some(job) = &trigger.job {
            item = item.with_metadata("job", job.clone());
        }
        item
    }
}

#[async_trait]
impl InputSource for ScheduledTriggerSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> SourceResult<Vec<InputItem>> {
        Ok(self.poll_at(&Local::now()))
    }

    async fn acknowledge(&self, item_id: &str) -> SourceResult<()> {
        self.settle(item_id);
        Ok(())
    }

    async fn discard(&self, item_id: &str) -> SourceResult<()> {
        self.settle(item_id);
        Ok(())
    }
}
