use super::{
    BackupTask, ChangeDetector, ContentHash, ContentHasher, DirectoryEntry, FileDescriptor,
    IgnoreMatcher, RunStatistics, RunSummary, SyncOptions,
};
use crate::error::{IoContext, Result};
use crate::storage::StateStore;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Mirrors source trees into backup trees, copying only what changed.
pub struct SyncEngine {
    options: SyncOptions,
    ignore: IgnoreMatcher,
    detector: ChangeDetector,
    hasher: ContentHasher,
    state: StateStore,
    stats: RunStatistics,
    io_slots: Semaphore,
}

impl SyncEngine {
    pub fn new(options: SyncOptions, ignore: IgnoreMatcher, state: StateStore) -> Self {
        Self {
            detector: ChangeDetector::new(options.use_hash_comparison),
            hasher: ContentHasher,
            stats: RunStatistics::new(),
            io_slots: Semaphore::new(options.max_open_files.max(1)),
            options,
            ignore,
            state,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Run every task once and return what happened.
    ///
    /// Tasks run concurrently and fail independently. The state table is
    /// persisted whatever the tasks did (dry runs never write it); only an
    /// unreadable state file aborts the run before any task starts.
    pub async fn run(&self, tasks: &[BackupTask]) -> Result<RunSummary> {
        let span = info_span!("run", id = %uuid::Uuid::new_v4());
        self.run_inner(tasks).instrument(span).await
    }

    async fn run_inner(&self, tasks: &[BackupTask]) -> Result<RunSummary> {
        self.state.load().await?;
        self.stats.reset();

        info!(
            "Starting run over {} task(s) (dry run: {}, hashing: {})",
            tasks.len(),
            self.options.dry_run,
            self.options.use_hash_comparison
        );

        join_all(tasks.iter().map(|task| self.run_task(task))).await;

        if self.options.dry_run {
            debug!("Dry run, state file left untouched");
        } else if let Err(e) = self.state.save().await {
            error!("Failed to persist state: {}", e);
            self.stats.record_error();
        }

        let summary = self.stats.snapshot();
        info!(
            copied = summary.files_copied,
            skipped = summary.files_skipped,
            ignored = summary.items_ignored,
            deleted = summary.items_deleted,
            errors = summary.errors,
            bytes = summary.total_bytes_copied,
            "Run complete"
        );
        Ok(summary)
    }

    async fn run_task(&self, task: &BackupTask) {
        let source = absolutize(&task.source_root);
        let backup = absolutize(&task.backup_root);
        info!("Syncing {} -> {}", source.display(), backup.display());

        // An unmounted or mistyped source root would otherwise empty the backup
        match fs::metadata(&source).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                error!("Task source {} is not a directory", source.display());
                self.stats.record_error();
                return;
            }
            Err(e) => {
                error!("Task source {} is unavailable: {}", source.display(), e);
                self.stats.record_error();
                return;
            }
        }

        if let Err(e) = self.sync_directory(source.clone(), backup).await {
            error!("Task {} failed: {}", source.display(), e);
            self.stats.record_error();
        }
    }

    /// Mirror one directory level and everything below it.
    ///
    /// Returns once the whole subtree is finished. Failures below this level
    /// are counted and logged here; only failing to prepare or list this
    /// directory itself is returned.
    pub fn sync_directory(&self, source: PathBuf, backup: PathBuf) -> BoxFuture<'_, Result<()>> {
        self.sync_tree(source, backup, true)
    }

    /// `backup_present` is false below a backup path that a dry run found
    /// missing or not a directory; nothing under it is statted then.
    fn sync_tree(
        &self,
        source: PathBuf,
        backup: PathBuf,
        backup_present: bool,
    ) -> BoxFuture<'_, Result<()>> {
        async move {
            let backup_is_dir = backup_present && self.prepare_backup_dir(&backup).await?;

            let (source_entries, backup_entries) = {
                let _slot = self.io_slot().await?;
                tokio::join!(list_dir(&source), async {
                    if backup_is_dir {
                        list_dir(&backup).await
                    } else {
                        Ok(Vec::new())
                    }
                })
            };
            let source_entries = source_entries?;
            let backup_entries = backup_entries?;

            tokio::join!(
                self.remove_orphans(&source, &backup, backup_entries),
                self.sync_entries(&source, &backup, source_entries, backup_is_dir),
            );
            Ok(())
        }
        .boxed()
    }

    /// Create the backup directory, replacing a file or symlink that sits in
    /// its place. Returns whether a real directory is there to list, which in
    /// a dry run is only the case if one already existed.
    async fn prepare_backup_dir(&self, backup: &Path) -> Result<bool> {
        let _slot = self.io_slot().await?;
        match fs::symlink_metadata(backup).await {
            Ok(meta) if meta.is_dir() => return Ok(true),
            Ok(_) if self.options.dry_run => {
                info!("[dry run] Would replace {} with a directory", backup.display());
                return Ok(false);
            }
            Ok(_) => {
                info!("Replacing {} with a directory", backup.display());
                fs::remove_file(backup).await.at(backup)?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.options.dry_run {
                    return Ok(false);
                }
            }
            Err(e) => return Err(e).at(backup),
        }
        fs::create_dir_all(backup).await.at(backup)?;
        Ok(true)
    }

    async fn remove_orphans(&self, source: &Path, backup: &Path, entries: Vec<DirectoryEntry>) {
        let removals = entries
            .into_iter()
            .filter(|entry| !self.ignore.should_ignore(&entry.display_name()))
            .map(|entry| async move {
                let source_path = source.join(&entry.name);
                let backup_path = backup.join(&entry.name);
                match self
                    .remove_if_orphan(&source_path, &backup_path, entry.is_directory)
                    .await
                {
                    Ok(true) => self.stats.record_deleted(),
                    Ok(false) => {}
                    Err(e) => {
                        error!("Failed to remove orphan {}: {}", backup_path.display(), e);
                        self.stats.record_error();
                    }
                }
            });
        join_all(removals).await;
    }

    async fn remove_if_orphan(&self, source: &Path, backup: &Path, is_directory: bool) -> Result<bool> {
        let _slot = self.io_slot().await?;

        match fs::symlink_metadata(source).await {
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).at(source),
        }

        if self.options.dry_run {
            info!("[dry run] Would remove {}", backup.display());
            return Ok(true);
        }

        if is_directory {
            fs::remove_dir_all(backup).await.at(backup)?;
        } else {
            fs::remove_file(backup).await.at(backup)?;
        }
        info!("Removed {}", backup.display());
        Ok(true)
    }

    async fn sync_entries(
        &self,
        source: &Path,
        backup: &Path,
        entries: Vec<DirectoryEntry>,
        backup_present: bool,
    ) {
        let work = entries.into_iter().map(|entry| async move {
            let child_source = source.join(&entry.name);
            if self.ignore.should_ignore(&entry.display_name()) {
                debug!("Ignoring {}", child_source.display());
                self.stats.record_ignored();
                return;
            }

            let child_backup = backup.join(&entry.name);
            let outcome = if entry.is_directory {
                self.sync_tree(child_source.clone(), child_backup, backup_present)
                    .await
            } else {
                self.sync_file_in(&child_source, &child_backup, backup_present)
                    .await
            };

            if let Err(e) = outcome {
                error!("Failed to sync {}: {}", child_source.display(), e);
                self.stats.record_error();
            }
        });
        join_all(work).await;
    }

    /// Copy one file if the change detector asks for it.
    ///
    /// Errors are returned to the caller, which counts them; nothing here
    /// touches sibling entries.
    pub async fn sync_file(&self, source: &Path, backup: &Path) -> Result<()> {
        self.sync_file_in(source, backup, true).await
    }

    async fn sync_file_in(&self, source: &Path, backup: &Path, backup_present: bool) -> Result<()> {
        let source_meta = {
            let _slot = self.io_slot().await?;
            fs::metadata(source).await.at(source)?
        };
        if !source_meta.is_file() {
            debug!("Skipping non-regular entry {}", source.display());
            return Ok(());
        }

        let mut source_desc = FileDescriptor::from_metadata(&source_meta);
        let mut backup_desc = if backup_present {
            self.backup_descriptor(backup).await?
        } else {
            None
        };

        let mut needs_copy = self.detector.should_backup(&source_desc, backup_desc.as_ref());

        // Hash only once stat data says a copy is needed
        if needs_copy && self.detector.uses_hashes() {
            source_desc.hash = Some(self.source_hash(source, &source_desc).await?);

            if let Some(existing) = backup_desc.as_mut().filter(|b| b.size == source_desc.size) {
                existing.hash = Some(self.hash_file(backup).await?);
                needs_copy = self.detector.should_backup(&source_desc, Some(&*existing));

                if !needs_copy {
                    debug!("{} differs only in mtime", source.display());
                    if !self.options.dry_run {
                        self.align_mtime(&source_meta, backup).await?;
                        self.state.update(source, source_desc.clone());
                    }
                }
            }
        }

        if !needs_copy {
            self.stats
                .record_skip(backup_desc.as_ref().map(|_| source_desc.size));
            return Ok(());
        }

        if self.options.dry_run {
            info!("[dry run] Would copy {}", source.display());
            self.stats.record_copy(source_desc.size);
            return Ok(());
        }

        self.copy_file(source, backup, &source_meta).await?;
        debug!("Copied {} ({} bytes)", source.display(), source_desc.size);
        self.stats.record_copy(source_desc.size);
        self.state.update(source, source_desc);
        Ok(())
    }

    /// Stat the backup copy without following symlinks. A directory or
    /// symlink in its place is removed first (unless dry-run) and reported
    /// as absent, so the copy never writes outside the backup tree.
    async fn backup_descriptor(&self, backup: &Path) -> Result<Option<FileDescriptor>> {
        let _slot = self.io_slot().await?;
        match fs::symlink_metadata(backup).await {
            Ok(meta) if meta.is_dir() => {
                if !self.options.dry_run {
                    info!("Replacing directory {} with a file", backup.display());
                    fs::remove_dir_all(backup).await.at(backup)?;
                }
                Ok(None)
            }
            Ok(meta) if meta.file_type().is_symlink() => {
                if !self.options.dry_run {
                    info!("Replacing symlink {} with a file", backup.display());
                    fs::remove_file(backup).await.at(backup)?;
                }
                Ok(None)
            }
            Ok(meta) => Ok(Some(FileDescriptor::from_metadata(&meta))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).at(backup),
        }
    }

    /// Reuse the stored hash while the source still matches its stat data
    async fn source_hash(&self, source: &Path, current: &FileDescriptor) -> Result<ContentHash> {
        if let Some(known) = self.state.get(source) {
            if known.same_stat(current) {
                if let Some(hash) = known.hash {
                    return Ok(hash);
                }
            }
        }
        self.hash_file(source).await
    }

    async fn hash_file(&self, path: &Path) -> Result<ContentHash> {
        let _slot = self.io_slot().await?;
        self.hasher.hash(path).await
    }

    async fn copy_file(&self, source: &Path, backup: &Path, source_meta: &Metadata) -> Result<()> {
        {
            let _slot = self.io_slot().await?;
            match fs::copy(source, backup).await {
                Ok(_) => {}
                // Copies of read-only sources are read-only too
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    fs::remove_file(backup).await.at(backup)?;
                    fs::copy(source, backup).await.at(backup)?;
                }
                Err(e) => return Err(e).at(backup),
            }
        }
        self.align_mtime(source_meta, backup).await
    }

    /// Give the backup copy the source's mtime so later runs compare equal
    async fn align_mtime(&self, source_meta: &Metadata, backup: &Path) -> Result<()> {
        let Ok(modified) = source_meta.modified() else {
            return Ok(());
        };

        let _slot = self.io_slot().await?;
        let target = backup.to_path_buf();
        tokio::task::spawn_blocking(move || {
            // Owners may set times through a read-only handle except on Windows
            let file = if cfg!(windows) {
                std::fs::OpenOptions::new().write(true).open(&target)?
            } else {
                std::fs::File::open(&target)?
            };
            file.set_modified(modified)
        })
        .await
        .map_err(std::io::Error::other)
        .and_then(|r| r)
        .at(backup)
    }

    async fn io_slot(&self) -> Result<SemaphorePermit<'_>> {
        Ok(self.io_slots.acquire().await?)
    }
}

/// List a directory; a missing directory lists as empty
async fn list_dir(path: &Path) -> Result<Vec<DirectoryEntry>> {
    let mut reader = match fs::read_dir(path).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).at(path),
    };

    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await.at(path)? {
        let file_type = entry.file_type().await.at(&entry.path())?;
        entries.push(DirectoryEntry {
            name: entry.file_name(),
            is_directory: file_type.is_dir(),
        });
    }
    Ok(entries)
}

/// Anchor a task root at the working directory and drop `.` components,
/// so state keys do not depend on how the root was spelled. `..` is kept;
/// resolving it lexically would be wrong across symlinks.
fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(e) => {
                warn!("Cannot resolve {} against the working directory: {}", path.display(), e);
                path.to_path_buf()
            }
        }
    };
    joined
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
