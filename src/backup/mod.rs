pub mod detector;
pub mod engine;
pub mod hasher;
pub mod ignore;
pub mod scheduler;
pub mod stats;

pub use detector::ChangeDetector;
pub use engine::SyncEngine;
pub use hasher::{ContentHash, ContentHasher};
pub use ignore::IgnoreMatcher;
pub use scheduler::Scheduler;
pub use stats::{RunStatistics, RunSummary};

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::ffi::OsString;
use std::fs::Metadata;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

/// One (source, backup) directory pair mirrored by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTask {
    #[serde(rename = "source")]
    pub source_root: PathBuf,
    #[serde(rename = "backup")]
    pub backup_root: PathBuf,
}

impl BackupTask {
    pub fn new(source_root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            backup_root: backup_root.into(),
        }
    }
}

/// A single child of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: OsString,
    pub is_directory: bool,
}

impl DirectoryEntry {
    /// Name used for ignore matching and log output
    pub fn display_name(&self) -> Cow<'_, str> {
        self.name.to_string_lossy()
    }
}

/// Size, mtime and optional content hash of one file.
///
/// Built fresh from the filesystem every run; the persisted form of this
/// record is the per-path entry kept by [`crate::storage::StateStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub size: u64,
    pub modified_at_millis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
}

impl FileDescriptor {
    pub fn new(size: u64, modified_at_millis: i64) -> Self {
        Self {
            size,
            modified_at_millis,
            hash: None,
        }
    }

    pub fn from_metadata(metadata: &Metadata) -> Self {
        // Pre-epoch and unsupported mtimes collapse to 0
        let modified_at_millis = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        Self::new(metadata.len(), modified_at_millis)
    }

    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Same size and timestamp, ignoring any hash
    pub fn same_stat(&self, other: &FileDescriptor) -> bool {
        self.size == other.size && self.modified_at_millis == other.modified_at_millis
    }
}

/// Behaviour switches shared by every task of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub use_hash_comparison: bool,
    /// Upper bound on concurrently open file handles
    pub max_open_files: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            use_hash_comparison: false,
            max_open_files: 256,
        }
    }
}
