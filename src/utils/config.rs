use crate::backup::{BackupTask, SyncOptions};
use crate::error::{IoContext, Result, SyncError};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "backup-config.json";
pub const DEFAULT_STATE_PATH: &str = "backup-state.json";
pub const DEFAULT_MAX_OPEN_FILES: usize = 256;

/// Build output, VCS metadata and virtualenvs
const DEFAULT_IGNORED_DIRECTORIES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".cache",
];

/// Logs, temp files, env files, editor backups and swap files
const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "*.log",
    "*.tmp",
    "*.temp",
    "*.pyc",
    "*.swp",
    "*.swo",
    "*~",
    "*.bak",
    "*.orig",
    ".DS_Store",
    ".env",
    ".env.*",
];

/// Configuration as written by the user. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileConfig {
    pub tasks: Vec<BackupTask>,
    pub interval_millis: Option<u64>,
    pub dry_run: Option<bool>,
    pub use_hash_comparison: Option<bool>,
    pub ignored_directory_names: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub state_path: Option<PathBuf>,
    pub max_open_files: Option<usize>,
}

/// Resolved configuration: built-in defaults merged with the user's file
/// and environment overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub tasks: Vec<BackupTask>,

    /// Delay between runs; 0 runs once and exits
    pub interval_millis: u64,

    /// Decide and count, but never touch the filesystem
    pub dry_run: bool,

    /// Resolve timestamp-only differences by content hash
    pub use_hash_comparison: bool,

    pub ignored_directory_names: BTreeSet<String>,

    /// Glob patterns on base names, in declaration order
    pub ignore_patterns: Vec<String>,

    /// Persisted per-file state table
    pub state_path: PathBuf,

    /// Concurrent file handle limit
    pub max_open_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file_config(FileConfig::default())
    }
}

impl Config {
    /// Merge a user config over the defaults.
    ///
    /// Sets are unioned with the defaults, lists are appended after the
    /// defaults (repeats dropped), scalars replace the defaults.
    pub fn from_file_config(file: FileConfig) -> Self {
        let mut ignored_directory_names: BTreeSet<String> = DEFAULT_IGNORED_DIRECTORIES
            .iter()
            .map(|s| s.to_string())
            .collect();
        ignored_directory_names.extend(file.ignored_directory_names);

        let mut ignore_patterns: Vec<String> =
            DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect();
        for pattern in file.ignore_patterns {
            if !ignore_patterns.contains(&pattern) {
                ignore_patterns.push(pattern);
            }
        }

        Self {
            tasks: file.tasks,
            interval_millis: file.interval_millis.unwrap_or(0),
            dry_run: file.dry_run.unwrap_or(false),
            use_hash_comparison: file.use_hash_comparison.unwrap_or(false),
            ignored_directory_names,
            ignore_patterns,
            state_path: file
                .state_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH)),
            max_open_files: file.max_open_files.unwrap_or(DEFAULT_MAX_OPEN_FILES),
        }
    }

    /// Load config from a JSON file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).at(path)?;
        let file: FileConfig =
            serde_json::from_str(&raw).map_err(|source| SyncError::Serialization {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::from_file_config(file);
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dry_run) = env_override("BACKUP_DRY_RUN")? {
            self.dry_run = dry_run;
        }

        if let Some(use_hash) = env_override("BACKUP_USE_HASH")? {
            self.use_hash_comparison = use_hash;
        }

        if let Some(interval) = env_override("BACKUP_INTERVAL_MS")? {
            self.interval_millis = interval;
        }

        if let Ok(state_path) = std::env::var("BACKUP_STATE_PATH") {
            self.state_path = PathBuf::from(state_path);
        }

        if let Some(max_open_files) = env_override("BACKUP_MAX_OPEN_FILES")? {
            self.max_open_files = max_open_files;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_open_files == 0 {
            return Err(SyncError::Configuration {
                reason: "maxOpenFiles must be at least 1".to_string(),
            });
        }

        for task in &self.tasks {
            if task.source_root.as_os_str().is_empty() || task.backup_root.as_os_str().is_empty() {
                return Err(SyncError::Configuration {
                    reason: "every task needs a non-empty source and backup".to_string(),
                });
            }
        }

        if self.tasks.is_empty() {
            warn!("No backup tasks configured");
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            dry_run: self.dry_run,
            use_hash_comparison: self.use_hash_comparison,
            max_open_files: self.max_open_files,
        }
    }
}

fn env_override<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SyncError::Configuration {
                reason: format!("{} has an invalid value: {:?}", key, value),
            }),
        Err(_) => Ok(None),
    }
}

/// Config path from the first CLI argument, `BACKUP_CONFIG`, or the default
pub fn resolve_config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var("BACKUP_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
