//! Durable record of processed input items
//!
//! The store is a single JSON document rewritten after every new mark. Writes
//! go to a temporary file in the same directory which is then renamed over
//! the previous document, so a crash leaves either the old or the new state on
//! disk, never a partial file.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::errors::{StateError, StateResult};

type ProcessedMap = BTreeMap<String, BTreeMap<String, DateTime<Utc>>>;

#[derive(Serialize)]
struct StateDocument<'a> {
    processed: &'a ProcessedMap,
}

/// Accepted on-disk shapes: `{ "processed": { src: { id: ts } } }`, or ids as
/// an array with an optional parallel `timestamps` map.
#[derive(Deserialize)]
struct StoredState {
    #[serde(default)]
    processed: BTreeMap<String, StoredItems>,
    #[serde(default)]
    timestamps: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredItems {
    Timestamped(BTreeMap<String, String>),
    Ids(Vec<String>),
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|ts| ts.and_utc())
        })
}

/// Tracks which `(source, item_id)` pairs have been handled
#[derive(Debug)]
pub struct StateTracker {
    path: PathBuf,
    processed: ProcessedMap,
}

impl StateTracker {
    /// Load the store at `path`. A missing file is an empty store; an
    /// unreadable or corrupt one is an error.
    pub fn open(path: impl Into<PathBuf>) -> StateResult<Self> {
        let path = path.into();

        if !path.exists() {
            debug!("No state file at {}, starting empty", path.display());
            return Ok(Self {
                path,
                processed: BTreeMap::new(),
            });
        }

        let text = std::fs::read_to_string(&path).map_err(|source| StateError::Io {
            path: path.clone(),
            source,
        })?;
        let stored: StoredState =
            serde_json::from_str(&text).map_err(|source| StateError::Corrupt {
                path: path.clone(),
                source,
            })?;

        let loaded_at = Utc::now();
        let mut processed = ProcessedMap::new();
        for (source, items) in stored.processed {
            let timestamps = stored.timestamps.get(&source);
            let entries = processed.entry(source).or_default();
            match items {
                StoredItems::Timestamped(items) => {
                    for (item_id, ts) in items {
                        entries.insert(item_id, parse_timestamp(&ts).unwrap_or(loaded_at));
                    }
                }
                StoredItems::Ids(ids) => {
                    for item_id in ids {
                        let ts = timestamps
                            .and_then(|t| t.get(&item_id))
                            .and_then(|ts| parse_timestamp(ts))
                            .unwrap_or(loaded_at);
                        entries.insert(item_id, ts);
                    }
                }
            }
        }

        let tracker = Self { path, processed };
        info!(
            "Loaded state from {} ({} processed items)",
            tracker.path.display(),
            tracker.total_processed()
        );
        Ok(tracker)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_processed(&self, source: &str, item_id: &str) -> bool {
        self.processed
            .get(source)
            .is_some_and(|items| items.contains_key(item_id))
    }

    /// Record an item as processed and flush the store.
    ///
    /// Returns false when the item was already marked, in which case the
    /// original timestamp is kept and nothing is written. If the flush fails
    /// the in-memory mark is rolled back.
    pub fn mark_processed(&mut self, source: &str, item_id: &str) -> StateResult<bool> {
        if self.is_processed(source, item_id) {
            return Ok(false);
        }

        self.processed
            .entry(source.to_string())
            .or_default()
            .insert(item_id.to_string(), Utc::now());

        if let Err(e) = self.save() {
            if let Some(items) = self.processed.get_mut(source) {
                items.remove(item_id);
                if items.is_empty() {
                    self.processed.remove(source);
                }
            }
            return Err(e);
        }

        Ok(true)
    }

    pub fn processed_count(&self, source: &str) -> usize {
        self.processed.get(source).map_or(0, BTreeMap::len)
    }

    pub fn processed_at(&self, source: &str, item_id: &str) -> Option<DateTime<Utc>> {
        self.processed.get(source)?.get(item_id).copied()
    }

    /// Sources with at least one processed item
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.processed.keys().map(String::as_str)
    }

    pub fn total_processed(&self) -> usize {
        self.processed.values().map(BTreeMap::len).sum()
    }

    fn save(&self) -> StateResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_error = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };

        std::fs::create_dir_all(&dir).map_err(io_error)?;

        let document = serde_json::to_vec_pretty(&StateDocument {
            processed: &self.processed,
        })?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(io_error)?;
        temp.write_all(&document).map_err(io_error)?;
        temp.as_file().sync_all().map_err(io_error)?;
        temp.persist(&self.path).map_err(|e| StateError::Persist {
            path: self.path.clone(),
            source: e.error,
        })?;

        debug!("State flushed to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = StateTracker::open(dir.path().join("state.json")).unwrap();

        assert!(!tracker.is_processed("github", "1"));
        assert!(tracker.mark_processed("github", "1").unwrap());
        assert!(tracker.is_processed("github", "1"));
        assert!(!tracker.is_processed("email", "1"));
        assert_eq!(tracker.processed_count("github"), 1);
        assert_eq!(tracker.sources().collect::<Vec<_>>(), vec!["github"]);
    }

    #[test]
    fn test_mark_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = StateTracker::open(dir.path().join("state.json")).unwrap();

        assert!(tracker.mark_processed("github", "1").unwrap());
        let first = tracker.processed_at("github", "1").unwrap();
        assert!(!tracker.mark_processed("github", "1").unwrap());
        assert_eq!(tracker.processed_at("github", "1"), Some(first));
        assert_eq!(tracker.processed_count("github"), 1);
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/state.json");
        let mut tracker = StateTracker::open(&path).unwrap();

        tracker.mark_processed("email", "<a@b>").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_document_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut tracker = StateTracker::open(&path).unwrap();
        tracker.mark_processed("github", "7").unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value["processed"]["github"]["7"].is_string());
    }

    #[test]
    fn test_loads_array_form_with_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{
                "processed": { "github": ["1", "2"] },
                "timestamps": { "github": { "1": "2024-01-02T01:00:00.500000" } }
            }"#,
        )
        .unwrap();

        let tracker = StateTracker::open(&path).unwrap();
        assert!(tracker.is_processed("github", "1"));
        assert!(tracker.is_processed("github", "2"));
        assert_eq!(
            tracker.processed_at("github", "1").unwrap().to_rfc3339(),
            "2024-01-02T01:00:00.500+00:00"
        );
    }

    #[test]
    fn test_failed_flush_rolls_back_mark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut tracker = StateTracker::open(&path).unwrap();
        tracker.mark_processed("github", "1").unwrap();

        // Swap the document for a non-empty directory so the rename fails
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "untouched").unwrap();

        assert!(matches!(
            tracker.mark_processed("github", "2"),
            Err(StateError::Persist { .. })
        ));
        assert!(!tracker.is_processed("github", "2"));
        assert!(tracker.is_processed("github", "1"));
        assert_eq!(tracker.processed_count("github"), 1);
        assert_eq!(std::fs::read_to_string(path.join("keep")).unwrap(), "untouched");

        // No temporary file is left beside the document
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("state.json")]);

        std::fs::remove_dir_all(&path).unwrap();
        assert!(tracker.mark_processed("github", "2").unwrap());
        let reloaded = StateTracker::open(&path).unwrap();
        assert!(reloaded.is_processed("github", "1"));
        assert!(reloaded.is_processed("github", "2"));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            StateTracker::open(&path),
            Err(StateError::Corrupt { .. })
        ));
    }
}
