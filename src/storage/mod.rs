use crate::backup::FileDescriptor;
use crate::error::{IoContext, Result, SyncError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Last-synced size, mtime and hash per absolute source path.
///
/// The table is loaded once before a run and written back once after it;
/// updates in between only touch memory.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, FileDescriptor>>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory table with the persisted one.
    ///
    /// A missing file is an empty table. A file that exists but does not
    /// parse is logged and also treated as empty.
    pub async fn load(&self) -> Result<()> {
        let loaded = match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, FileDescriptor>>(&bytes) {
                Ok(entries) => entries,
                Err(source) => {
                    let err = SyncError::Serialization {
                        path: self.path.clone(),
                        source,
                    };
                    warn!("{}; starting from empty state", err);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state file at {}", self.path.display());
                HashMap::new()
            }
            Err(e) => return Err(e).at(&self.path),
        };

        info!("Loaded {} state entries from {}", loaded.len(), self.path.display());
        *self.entries.write() = loaded;
        Ok(())
    }

    /// Write the table next to its destination, then rename it into place
    pub async fn save(&self) -> Result<()> {
        let data = {
            let entries = self.entries.read();
            serde_json::to_vec_pretty(&*entries).map_err(|source| SyncError::Serialization {
                path: self.path.clone(),
                source,
            })?
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.at(parent)?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        tokio::fs::write(&tmp_path, &data).await.at(&tmp_path)?;
        tokio::fs::rename(&tmp_path, &self.path).await.at(&self.path)?;

        debug!("Saved state to {}", self.path.display());
        Ok(())
    }

    /// Paths that are not valid UTF-8 are not recorded; a lossy key could
    /// collide with another file's entry.
    pub fn update(&self, path: &Path, descriptor: FileDescriptor) {
        match path.to_str() {
            Some(key) => {
                self.entries.write().insert(key.to_owned(), descriptor);
            }
            None => debug!("Not recording state for non-UTF-8 path {}", path.display()),
        }
    }

    pub fn get(&self, path: &Path) -> Option<FileDescriptor> {
        self.entries.read().get(path.to_str()?).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::ContentHash;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = StateStore::new(&path);
        store.update(
            Path::new("/src/a.txt"),
            FileDescriptor::new(100, 1_700_000_000_000).with_hash(ContentHash::from_bytes(b"a")),
        );
        store.update(Path::new("/src/b.txt"), FileDescriptor::new(5, 42));
        store.save().await.unwrap();

        let reloaded = StateStore::new(&path);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(Path::new("/src/a.txt")), store.get(Path::new("/src/a.txt")));
        assert_eq!(reloaded.get(Path::new("/src/b.txt")), Some(FileDescriptor::new(5, 42)));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("absent.json"));
        store.load().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn malformed_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = StateStore::new(&path);
        store.update(Path::new("/stale"), FileDescriptor::new(1, 1));
        store.load().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"/src/a": {"size": 3, "modifiedAtMillis": 7, "hash": "abc", "owner": "root"},
                "/src/b": {"size": 1, "modifiedAtMillis": 2}}"#,
        )
        .unwrap();

        let store = StateStore::new(&path);
        store.load().await.unwrap();
        let a = store.get(Path::new("/src/a")).unwrap();
        assert_eq!(a.size, 3);
        assert_eq!(a.hash.as_ref().map(ContentHash::as_str), Some("abc"));
        assert_eq!(store.get(Path::new("/src/b")).unwrap().hash, None);
    }

    #[tokio::test]
    async fn unreadable_path_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be
        let store = StateStore::new(dir.path());
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }

    #[test]
    fn update_overwrites_existing_entry() {
        let store = StateStore::new("unused.json");
        store.update(Path::new("/f"), FileDescriptor::new(1, 1));
        store.update(Path::new("/f"), FileDescriptor::new(2, 2));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(Path::new("/f")), Some(FileDescriptor::new(2, 2)));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_are_not_recorded() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let store = StateStore::new("unused.json");
        let invalid = Path::new(OsStr::from_bytes(b"/src/\xff"));
        // would share the lossy key "/src/\u{FFFD}" with the invalid path
        let lookalike = Path::new("/src/\u{FFFD}");
        store.update(lookalike, FileDescriptor::new(1, 1));
        store.update(invalid, FileDescriptor::new(2, 2));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(invalid), None);
        assert_eq!(store.get(lookalike), Some(FileDescriptor::new(1, 1)));
    }
}
