use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::feedback::FeedbackEntry;
use super::store::{SessionMeta, StoredMessage};

/// Flat copy of every in-memory map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionMeta>,
    #[serde(default)]
    pub conversations: BTreeMap<String, Vec<StoredMessage>>,
    #[serde(default)]
    pub feedback: BTreeMap<String, Vec<FeedbackEntry>>,
}

/// JSON snapshot location; `None` keeps the store purely in memory.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFile {
    path: Option<PathBuf>,
}

impl SnapshotFile {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Missing or unreadable snapshots load as empty.
    pub fn load(&self) -> Snapshot {
        let Some(path) = &self.path else {
            return Snapshot::default();
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot at {}, starting empty", path.display());
                return Snapshot::default();
            }
            Err(e) => {
                warn!("Could not read snapshot {}: {}", path.display(), e);
                return Snapshot::default();
            }
        };
        match serde_json::from_str::<Snapshot>(&raw) {
            Ok(snapshot) => {
                info!(
                    "Loaded snapshot with {} session(s) from {}",
                    snapshot.sessions.len(),
                    path.display()
                );
                snapshot
            }
            Err(e) => {
                warn!("Corrupt snapshot {}: {}; starting empty", path.display(), e);
                Snapshot::default()
            }
        }
    }

    /// Write through a temporary file so a crash never leaves half a snapshot.
    pub fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(snapshot)?;
        std::fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_missing_and_corrupt_snapshots_load_empty() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::at(dir.path().join("conversations.json"));
        assert!(file.load().sessions.is_empty());

        std::fs::write(dir.path().join("conversations.json"), "{not json").unwrap();
        assert!(file.load().sessions.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::at(dir.path().join("data").join("conversations.json"));
        let now = Utc::now();

        let mut snapshot = Snapshot::default();
        snapshot.sessions.insert(
            "s1".into(),
            SessionMeta {
                user_id: Some(3),
                title: "Bubble Sort In C".into(),
                created_at: now,
                last_updated: now,
                message_count: 0,
            },
        );
        file.save(&snapshot).unwrap();

        let loaded = file.load();
        assert_eq!(loaded.sessions["s1"].title, "Bubble Sort In C");
        assert!(!dir.path().join("data").join("conversations.json.tmp").exists());
    }

    #[test]
    fn test_disabled_snapshot_is_noop() {
        let file = SnapshotFile::disabled();
        file.save(&Snapshot::default()).unwrap();
        assert!(file.load().sessions.is_empty());
        assert!(file.path().is_none());
    }
}
