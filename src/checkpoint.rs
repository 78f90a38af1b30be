//! # Checkpoint Store
//! Durable cursor of processing progress: newest `createdAt` ever handled,
//! the ids sharing that timestamp, and a couple of informational counters.
//!
//! The file store writes atomically (temp file, fsync, rename, fsync dir) so a
//! reader only ever observes the old or the new checkpoint.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;

/// Upper bound on `recent_ids`. Only ids sharing the newest timestamp are kept,
/// so this cap only matters for very large same-second bursts.
pub const RECENT_IDS_CAP: usize = 500;

pub const DEFAULT_STATE_PATH: &str = "state/bot_state.json";

/// Persisted as a single JSON object with camelCase keys
/// (`lastSeenCreatedAt`, `recentIds`, `totalNotified`, `lastPollTime`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub last_seen_created_at: DateTime<Utc>,
    #[serde(default)]
    pub recent_ids: VecDeque<String>,
    #[serde(default)]
    pub total_notified: u64,
    #[serde(default)]
    pub last_poll_time: Option<DateTime<Utc>>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            last_seen_created_at: DateTime::<Utc>::UNIX_EPOCH,
            recent_ids: VecDeque::new(),
            total_notified: 0,
            last_poll_time: None,
        }
    }
}

impl Checkpoint {
    /// True when nothing has ever been processed.
    pub fn is_fresh(&self) -> bool {
        self.last_seen_created_at == DateTime::<Utc>::UNIX_EPOCH
            && self.recent_ids.is_empty()
            && self.total_notified == 0
    }

    /// Has `(created_at, id)` already been handled?
    pub fn has_seen(&self, created_at: DateTime<Utc>, id: &str) -> bool {
        if created_at < self.last_seen_created_at {
            return true;
        }
        created_at == self.last_seen_created_at && self.recent_ids.iter().any(|r| r == id)
    }

    /// Move the cursor to `(created_at, id)`. Never moves backwards.
    pub fn advance(&mut self, created_at: DateTime<Utc>, id: &str) {
        if created_at > self.last_seen_created_at {
            self.last_seen_created_at = created_at;
            self.recent_ids.clear();
            self.recent_ids.push_back(id.to_string());
        } else if created_at == self.last_seen_created_at {
            if self.recent_ids.iter().any(|r| r == id) {
                return;
            }
            self.recent_ids.push_back(id.to_string());
            while self.recent_ids.len() > RECENT_IDS_CAP {
                self.recent_ids.pop_front();
            }
        }
    }

    /// Same cursor position, ignoring the informational fields.
    pub fn same_cursor(&self, other: &Checkpoint) -> bool {
        self.last_seen_created_at == other.last_seen_created_at
            && self.recent_ids == other.recent_ids
    }
}

/// Storage contract for the checkpoint. Access is strictly sequential.
pub trait CheckpointStore: Send + Sync {
    /// `Ok(None)` when no state was ever persisted.
    /// `Err(CorruptState)` when the persisted record cannot be parsed.
    fn try_load(&self) -> Result<Option<Checkpoint>, CheckpointError>;

    fn save(&self, cp: &Checkpoint) -> Result<(), CheckpointError>;

    /// Last persisted checkpoint or the zero value.
    fn load(&self) -> Result<Checkpoint, CheckpointError> {
        Ok(self.try_load()?.unwrap_or_default())
    }
}

/// JSON file on local disk.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn try_load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CheckpointError::CorruptState {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, cp: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let bytes =
            serde_json::to_vec_pretty(cp).map_err(|e| CheckpointError::Encode(e.to_string()))?;

        let tmp = self.tmp_path();
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        // Make the rename itself durable.
        #[cfg(unix)]
        if let Some(parent) = self.path.parent() {
            let dir = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            File::open(dir)?.sync_all()?;
        }

        tracing::debug!(
            target: "checkpoint",
            path = %self.path.display(),
            last_seen = %cp.last_seen_created_at.to_rfc3339(),
            recent_ids = cp.recent_ids.len(),
            "checkpoint saved"
        );
        Ok(())
    }
}

// --- Test helper ---
/// In-memory store. `fail_saves` makes every `save` return an IO error,
/// which is how tests simulate a crash during persisting.
pub struct MemoryCheckpointStore {
    pub saved: Mutex<Option<Checkpoint>>,
    pub save_calls: Mutex<usize>,
    pub fail_saves: Mutex<bool>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            saved: Mutex::new(None),
            save_calls: Mutex::new(0),
            fail_saves: Mutex::new(false),
        }
    }

    pub fn with_checkpoint(cp: Checkpoint) -> Self {
        let s = Self::new();
        *s.saved.lock().unwrap_or_else(|e| e.into_inner()) = Some(cp);
        s
    }

    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    pub fn current(&self) -> Option<Checkpoint> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn try_load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.current())
    }

    fn save(&self, cp: &Checkpoint) -> Result<(), CheckpointError> {
        *self.save_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if *self.fail_saves.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(CheckpointError::Io(io::Error::other("simulated save failure")));
        }
        *self.saved.lock().unwrap_or_else(|e| e.into_inner()) = Some(cp.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, sec).unwrap()
    }

    #[test]
    fn zero_value_is_epoch_and_empty() {
        let cp = Checkpoint::default();
        assert_eq!(cp.last_seen_created_at.timestamp(), 0);
        assert!(cp.recent_ids.is_empty());
        assert_eq!(cp.total_notified, 0);
        assert!(cp.last_poll_time.is_none());
        assert!(cp.is_fresh());
    }

    #[test]
    fn advance_forward_resets_recent_ids() {
        let mut cp = Checkpoint::default();
        cp.advance(ts(1), "a");
        cp.advance(ts(1), "b");
        assert_eq!(cp.recent_ids, vec!["a".to_string(), "b".to_string()]);
        cp.advance(ts(2), "c");
        assert_eq!(cp.last_seen_created_at, ts(2));
        assert_eq!(cp.recent_ids, vec!["c".to_string()]);
    }

    #[test]
    fn advance_never_moves_backwards() {
        let mut cp = Checkpoint::default();
        cp.advance(ts(5), "x");
        cp.advance(ts(3), "old");
        assert_eq!(cp.last_seen_created_at, ts(5));
        assert_eq!(cp.recent_ids, vec!["x".to_string()]);
    }

    #[test]
    fn advance_same_id_twice_is_noop() {
        let mut cp = Checkpoint::default();
        cp.advance(ts(5), "x");
        cp.advance(ts(5), "x");
        assert_eq!(cp.recent_ids.len(), 1);
    }

    #[test]
    fn recent_ids_are_bounded() {
        let mut cp = Checkpoint::default();
        for i in 0..(RECENT_IDS_CAP + 10) {
            cp.advance(ts(7), &format!("id-{i}"));
        }
        assert_eq!(cp.recent_ids.len(), RECENT_IDS_CAP);
        assert_eq!(cp.recent_ids.front().map(String::as_str), Some("id-10"));
    }

    #[test]
    fn has_seen_uses_timestamp_then_ids() {
        let mut cp = Checkpoint::default();
        cp.advance(ts(5), "x");
        assert!(cp.has_seen(ts(4), "anything"));
        assert!(cp.has_seen(ts(5), "x"));
        assert!(!cp.has_seen(ts(5), "y"));
        assert!(!cp.has_seen(ts(6), "x"));
    }

    #[test]
    fn file_store_missing_file_loads_zero_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("state.json"));
        assert!(store.try_load().unwrap().is_none());
        assert_eq!(store.load().unwrap(), Checkpoint::default());
    }

    #[test]
    fn file_store_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = FileCheckpointStore::new(&path);
        let mut cp = Checkpoint::default();
        cp.advance(ts(9), "abc");
        store.save(&cp).unwrap();
        assert!(path.exists());
        assert!(!store.tmp_path().exists());
    }
}
