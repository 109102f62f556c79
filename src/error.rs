//! Error types for the mirroring engine

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed state file {}: {source}", .path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid ignore pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("I/O limiter closed")]
    LimiterClosed(#[from] tokio::sync::AcquireError),
}

impl SyncError {
    /// ENOENT-class failures are an "absent" signal for most callers
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Io { path, .. } | Self::Serialization { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Attach the offending path to a raw `io::Error`.
pub trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
