//! Scheduled incremental mirroring of source directory trees into backup
//! trees.
//!
//! Each run compares every (source, backup) pair level by level, copies
//! files whose size or mtime changed (optionally confirmed by a BLAKE3
//! content hash), removes backup entries whose source is gone, and keeps a
//! per-file state table on disk so unchanged files are never re-hashed.
//!
//! ```rust,no_run
//! use backup_mirror::backup::{BackupTask, IgnoreMatcher, SyncEngine, SyncOptions};
//! use backup_mirror::storage::StateStore;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let engine = SyncEngine::new(
//!     SyncOptions::default(),
//!     IgnoreMatcher::empty(),
//!     StateStore::new("backup-state.json"),
//! );
//! let summary = engine.run(&[BackupTask::new("./data", "/mnt/backup/data")]).await?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod error;
pub mod storage;
pub mod utils;

pub use backup::{BackupTask, RunSummary, Scheduler, SyncEngine};
pub use error::{Result, SyncError};
pub use storage::StateStore;
pub use utils::Config;
