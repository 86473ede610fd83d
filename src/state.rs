//! Persistence of the last-seen snapshot per monitored target.

use crate::fingerprint::{fingerprint, sha256_hex, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::Builder;
use thiserror::Error;
use url::Url;

/// Stable identifier naming a target's state file, derived from its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// First 16 bytes of the SHA-256 of the URL, hex encoded.
    pub fn from_url(url: &Url) -> Self {
        let mut hex = sha256_hex(url.as_str().as_bytes());
        hex.truncate(32);
        Self(hex)
    }

    /// Hex rendering used as the file stem.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One observed state of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Normalized page text.
    pub normalized_text: String,
    /// Fingerprint of `normalized_text`.
    pub digest: Digest,
    /// When the content was fetched.
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Fingerprints `normalized_text` and stamps it with `captured_at`.
    pub fn capture(normalized_text: String, captured_at: DateTime<Utc>) -> Self {
        let digest = fingerprint(&normalized_text);
        Self {
            normalized_text,
            digest,
            captured_at,
        }
    }
}

/// Errors raised while reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The state root or temporary file could not be created or written.
    #[error("failed to write state {path:?}: {source}")]
    Write {
        /// File or directory being written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// An existing state file could not be read.
    #[error("failed to read state {path:?}: {source}")]
    Read {
        /// State file path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// An existing state file does not parse.
    #[error("corrupt state file {path:?}: {source}")]
    Corrupt {
        /// State file path.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// The stored digest does not match the stored text.
    #[error("state file {path:?} digest {stored} does not match its text ({actual})")]
    DigestMismatch {
        /// State file path.
        path: PathBuf,
        /// Digest recorded in the file.
        stored: Digest,
        /// Digest recomputed from the stored text.
        actual: Digest,
    },
    /// Serializing the snapshot failed.
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Storage of one snapshot per target.
pub trait StateStore {
    /// Returns the stored snapshot, or `None` when the target has never been seen.
    fn load(&self, target: &TargetId) -> Result<Option<Snapshot>, StateError>;

    /// Replaces the stored snapshot for `target`.
    fn save(&self, target: &TargetId, snapshot: &Snapshot) -> Result<(), StateError>;
}

/// On-disk layout of a state file.
#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    target_id: TargetId,
    #[serde(flatten)]
    snapshot: Snapshot,
}

/// JSON files under a root directory, one per target, replaced via atomic rename.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    root: PathBuf,
    url: Option<Url>,
}

impl FsStateStore {
    /// Store rooted at `root`; the directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            url: None,
        }
    }

    /// Records `url` in written files so operators can tell state files apart.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Path of the state file for `target`.
    pub fn path_for(&self, target: &TargetId) -> PathBuf {
        self.root.join(format!("{}.json", target.as_str()))
    }
}

impl StateStore for FsStateStore {
    fn load(&self, target: &TargetId) -> Result<Option<Snapshot>, StateError> {
        let path = self.path_for(target);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Read { path, source }),
        };
        let record: StateRecord = match serde_json::from_str(&contents) {
            Ok(record) => record,
            Err(source) => return Err(StateError::Corrupt { path, source }),
        };

        let snapshot = record.snapshot;
        let actual = fingerprint(&snapshot.normalized_text);
        if actual != snapshot.digest {
            return Err(StateError::DigestMismatch {
                path,
                stored: snapshot.digest,
                actual,
            });
        }
        Ok(Some(snapshot))
    }

    fn save(&self, target: &TargetId, snapshot: &Snapshot) -> Result<(), StateError> {
        fs::create_dir_all(&self.root).map_err(|source| StateError::Write {
            path: self.root.clone(),
            source,
        })?;

        let record = StateRecord {
            url: self.url.as_ref().map(Url::to_string),
            target_id: target.clone(),
            snapshot: snapshot.clone(),
        };
        let json = serde_json::to_vec_pretty(&record).map_err(StateError::Serialize)?;

        // Temp file lives in the same directory so the rename never crosses filesystems.
        let path = self.path_for(target);
        let write_err = |source: io::Error| StateError::Write {
            path: path.clone(),
            source,
        };
        let mut tmp = Builder::new()
            .prefix(&format!(".{}.", target.as_str()))
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(write_err)?;
        tmp.write_all(&json).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|err| write_err(err.error))?;
        tracing::debug!(path = %path.display(), bytes = json.len(), "state persisted");
        Ok(())
    }
}

/// In-memory store for exercising the pipeline without touching disk.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshots: Mutex<HashMap<TargetId, Snapshot>>,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with one snapshot.
    pub fn with_snapshot(target: TargetId, snapshot: Snapshot) -> Self {
        let store = Self::default();
        store
            .snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(target, snapshot);
        store
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, target: &TargetId) -> Result<Option<Snapshot>, StateError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(target)
            .cloned())
    }

    fn save(&self, target: &TargetId, snapshot: &Snapshot) -> Result<(), StateError> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(target.clone(), snapshot.clone());
        *self.saves.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
        Ok(())
    }
}
