//! Input source trait definitions
//!
//! An input source wraps an external producer of work (an issue tracker, a
//! mailbox, a webhook inbox, named cron triggers) behind two operations:
//! `poll` for new candidate items and `acknowledge` once an item is handled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::SourceResult;
use crate::job_scheduling::JobPriority;

/// A unit of externally-sourced work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputItem {
    /// Name of the producing source
    pub source: String,
    /// Identifier unique within `source`
    pub item_id: String,
    pub priority: JobPriority,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl InputItem {
    pub fn new(
        source: impl Into<String>,
        item_id: impl Into<String>,
        priority: JobPriority,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            item_id: item_id.into(),
            priority,
            title: title.into(),
            description: description.into(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// A metadata entry as a string, if it is one
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Capability interface every input source implements
///
/// `poll` may suspend on network or disk I/O. Errors are returned rather than
/// swallowed; the orchestrator logs them and treats the poll as empty.
#[async_trait]
pub trait InputSource: Send + Sync {
    /// Name the source is registered under
    fn name(&self) -> &str;

    /// Fetch candidate items. Already-processed items may be returned again;
    /// filtering is the orchestrator's job.
    async fn poll(&self) -> SourceResult<Vec<InputItem>>;

    /// Tell the backing system that `item_id` was handled. Sources that queue
    /// items keep offering them until this is called.
    async fn acknowledge(&self, _item_id: &str) -> SourceResult<()> {
        Ok(())
    }

    /// `item_id` was offered again but is already processed. Queue-backed
    /// sources drop it without any outward acknowledgement.
    async fn discard(&self, _item_id: &str) -> SourceResult<()> {
        Ok(())
    }
}
