//! Maildir mailbox source
//!
//! New messages are files under `<path>/new`. Each poll parses every message
//! there; acknowledging an item moves its file to `<path>/cur` so the mail
//! client side sees it as read.

use async_trait::async_trait;
use mail_parser::{Message, MessageParser};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::traits::{InputItem, InputSource};
use crate::errors::{SourceError, SourceResult};
use crate::job_scheduling::JobPriority;

pub struct MailboxSource {
    name: String,
    root: PathBuf,
    /// item id -> message file, filled by `poll` for `acknowledge`
    seen: Mutex<HashMap<String, PathBuf>>,
}

impl MailboxSource {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn new_dir(&self) -> PathBuf {
        self.root.join("new")
    }

    fn cur_dir(&self) -> PathBuf {
        self.root.join("cur")
    }

    fn io_error(path: &Path, source: std::io::Error) -> SourceError {
        SourceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn item_from_message(&self, message: &Message<'_>, file_name: &str) -> InputItem {
        let item_id = message
            .message_id()
            .map(str::to_string)
            .unwrap_or_else(|| file_name.to_string());
        let title = message.subject().unwrap_or("(no subject)").to_string();
        let description = message
            .body_text(0)
            .map(|body| body.trim().to_string())
            .unwrap_or_default();

        let mut item = InputItem::new(
            &self.name,
            item_id,
            priority_from_header(header_text(message, "X-Priority")),
            title,
            description,
        )
        .with_metadata("file", file_name.to_string());

        if let Some(from) = message
            .from()
            .and_then(|from| from.first())
            .and_then(|addr| addr.address())
        {
            item = item.with_metadata("from", from.to_string());
        }
        item
    }
}

fn header_text<'a>(message: &'a Message<'_>, name: &str) -> Option<&'a str> {
    message
        .headers()
        .iter()
        .find(|header| header.name().eq_ignore_ascii_case(name))
        .and_then(|header| header.value().as_text())
}

/// Map an `X-Priority` value such as `1 (Highest)` to a priority
pub(crate) fn priority_from_header(value: Option<&str>) -> JobPriority {
    match value.and_then(|v| v.trim().chars().next()) {
        Some('1') => JobPriority::Urgent,
        Some('2') => JobPriority::High,
        Some('4') | Some('5') => JobPriority::Low,
        _ => JobPriority::Medium,
    }
}

#[async_trait]
impl InputSource for MailboxSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> SourceResult<Vec<InputItem>> {
        let new_dir = self.new_dir();
        let mut entries = tokio::fs::read_dir(&new_dir)
            .await
            .map_err(|e| Self::io_error(&new_dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::io_error(&new_dir, e))?
        {
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let parser = MessageParser::default();
        let mut items = Vec::new();
        let mut seen = self.seen.lock().await;

        for path in files {
            let file_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| Self::io_error(&path, e))?;

            let Some(message) = parser.parse(&bytes) else {
                warn!("Skipping unparsable message {} in '{}'", path.display(), self.name);
                continue;
            };

            let item = self.item_from_message(&message, &file_name);
            seen.insert(item.item_id.clone(), path);
            items.push(item);
        }

        debug!("Mailbox '{}' has {} new messages", self.name, items.len());
        Ok(items)
    }

    async fn acknowledge(&self, item_id: &str) -> SourceResult<()> {
        let Some(path) = self.seen.lock().await.remove(item_id) else {
            return Ok(());
        };

        let cur_dir = self.cur_dir();
        tokio::fs::create_dir_all(&cur_dir)
            .await
            .map_err(|e| Self::io_error(&cur_dir, e))?;

        let Some(file_name) = path.file_name() else {
            return Ok(());
        };
        let target = cur_dir.join(file_name);
        tokio::fs::rename(&path, &target)
            .await
            .map_err(|e| Self::io_error(&path, e))?;

        debug!("Moved message {} to {}", path.display(), target.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MESSAGE: &str = "From: Ops <ops@example.com>\r\n\
To: loop@example.com\r\n\
Subject: Disk almost full\r\n\
Message-ID: <abc123@example.com>\r\n\
X-Priority: 1 (Highest)\r\n\
\r\n\
Please clean up /var.\r\n";

    #[rstest]
    #[case(Some("1"), JobPriority::Urgent)]
    #[case(Some("2 (High)"), JobPriority::High)]
    #[case(Some("3"), JobPriority::Medium)]
    #[case(Some("5 (Lowest)"), JobPriority::Low)]
    #[case(Some("garbage"), JobPriority::Medium)]
    #[case(None, JobPriority::Medium)]
    fn test_priority_from_header(#[case] value: Option<&str>, #[case] expected: JobPriority) {
        assert_eq!(priority_from_header(value), expected);
    }

    #[tokio::test]
    async fn test_poll_and_acknowledge() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("new")).unwrap();
        std::fs::write(dir.path().join("new/1700000000.msg"), MESSAGE).unwrap();

        let source = MailboxSource::new("email", dir.path());
        let items = source.poll().await.unwrap();

        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.source, "email");
        assert_eq!(item.item_id, "abc123@example.com");
        assert_eq!(item.title, "Disk almost full");
        assert_eq!(item.description, "Please clean up /var.");
        assert_eq!(item.priority, JobPriority::Urgent);
        assert_eq!(item.metadata_str("from"), Some("ops@example.com"));

        source.acknowledge(&item.item_id).await.unwrap();
        assert!(!dir.path().join("new/1700000000.msg").exists());
        assert!(dir.path().join("cur/1700000000.msg").exists());
        assert!(source.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_without_id_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("new")).unwrap();
        std::fs::write(
            dir.path().join("new/plain.eml"),
            "Subject: Hello\r\n\r\nBody\r\n",
        )
        .unwrap();

        let items = MailboxSource::new("email", dir.path()).poll().await.unwrap();
        assert_eq!(items[0].item_id, "plain.eml");
        assert_eq!(items[0].priority, JobPriority::Medium);
    }

    #[tokio::test]
    async fn test_missing_maildir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = MailboxSource::new("email", dir.path().join("absent")).poll().await;
        assert!(matches!(result, Err(SourceError::Io { .. })));
    }
}
