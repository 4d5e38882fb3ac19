//! # Cache Store
//!
//! Two flat directories under one root:
//! - `audio/` holds uploaded audio, one file per upload
//! - `tsv/` holds batch manifests
//!
//! Every file is named `<uuid v4><.ext>` and is never written twice. A file is
//! deleted either by whoever created it (through [`CacheLease`] or
//! [`CacheStore::release`]) or by the age-based [`CacheStore::sweep`],
//! whichever comes first. Both paths treat "already gone" as success, which is
//! what makes the sweep/release race harmless.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Longest extension we carry over from an uploaded filename.
const MAX_EXTENSION_LEN: usize = 16;

/// Which of the two cache directories an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheArea {
    Audio,
    Manifest,
}

impl CacheArea {
    pub const ALL: [CacheArea; 2] = [CacheArea::Audio, CacheArea::Manifest];

    /// Directory name under the cache root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            CacheArea::Audio => "audio",
            CacheArea::Manifest => "tsv",
        }
    }
}

/// A single cached file.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub id: Uuid,
    /// Extension without the leading dot, if the original name had one
    pub extension: Option<String>,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub area: CacheArea,
}

impl CacheEntry {
    /// `<uuid>.<ext>` as it appears on disk.
    pub fn file_name(&self) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{}", self.id, ext),
            None => self.id.to_string(),
        }
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Areas that existed and could be listed
    pub areas_scanned: usize,
    pub files_removed: usize,
    /// Files that were expired but could not be deleted
    pub failures: usize,
}

/// Read-only snapshot of the cache for diagnostics.
///
/// Field names match what operators already scrape from `/cache/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub cache_directory: PathBuf,
    pub audio_cache_directory: PathBuf,
    pub tsv_cache_directory: PathBuf,
    pub cache_exists: bool,
    pub audio_cache_exists: bool,
    pub tsv_cache_exists: bool,
    pub audio_files_count: usize,
    pub tsv_files_count: usize,
    pub total_cache_size_bytes: u64,
    pub total_cache_size_mb: f64,
}

/// Owner of the on-disk cache layout.
///
/// ## Thread Safety:
/// The store holds only paths, so it is shared as `Arc<CacheStore>` without
/// any locking. Concurrent writers never collide because every file gets a
/// fresh UUID and is opened with `create_new`.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at `root`. Relative roots are resolved against
    /// the current directory so entry paths are always absolute.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn area_dir(&self, area: CacheArea) -> PathBuf {
        self.root.join(area.dir_name())
    }

    /// Create both cache areas. Safe to call repeatedly.
    pub async fn ensure(&self) -> AppResult<()> {
        for area in CacheArea::ALL {
            let dir = self.area_dir(area);
            fs::create_dir_all(&dir).await.map_err(|e| {
                AppError::Directory(format!("cannot create {}: {}", dir.display(), e))
            })?;

            let metadata = fs::metadata(&dir).await.map_err(|e| {
                AppError::Directory(format!("cannot stat {}: {}", dir.display(), e))
            })?;
            if !metadata.is_dir() {
                return Err(AppError::Directory(format!(
                    "{} exists and is not a directory",
                    dir.display()
                )));
            }
        }

        tracing::debug!(root = %self.root.display(), "Cache areas ready");
        Ok(())
    }

    /// Write an uploaded audio file into the audio area.
    ///
    /// The extension of `original_name` is kept so the engine can sniff the
    /// container format from the path.
    pub async fn store(&self, content: &[u8], original_name: &str) -> AppResult<CacheEntry> {
        let extension = extension_of(original_name);
        self.store_in(CacheArea::Audio, content, extension.as_deref())
            .await
    }

    /// Write `content` into `area` under a fresh identity.
    pub async fn store_in(
        &self,
        area: CacheArea,
        content: &[u8],
        extension: Option<&str>,
    ) -> AppResult<CacheEntry> {
        let entry = CacheEntry {
            id: Uuid::new_v4(),
            extension: extension.map(str::to_string),
            path: PathBuf::new(),
            created_at: Utc::now(),
            area,
        };
        let path = self.area_dir(area).join(entry.file_name());
        let entry = CacheEntry { path, ..entry };

        if let Err(e) = write_new_file(&entry.path, content).await {
            // Don't leave a truncated blob behind for the sweep to find later
            remove_quietly(&entry.path).await;
            return Err(AppError::Write(format!(
                "cannot write {}: {}",
                entry.path.display(),
                e
            )));
        }

        tracing::debug!(
            path = %entry.path.display(),
            area = area.dir_name(),
            bytes = content.len(),
            "Stored cache entry"
        );
        Ok(entry)
    }

    /// Delete an entry's file. Missing files are fine, other failures are
    /// logged and swallowed.
    pub async fn release(&self, entry: &CacheEntry) {
        remove_quietly(&entry.path).await;
    }

    /// Delete every file in both areas whose modification time is more than
    /// `max_age` in the past.
    pub async fn sweep(&self, max_age: Duration) -> AppResult<SweepReport> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.sweep_before(cutoff).await
    }

    /// Delete every file last modified strictly before `cutoff`.
    pub async fn sweep_before(&self, cutoff: SystemTime) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut unreadable = Vec::new();

        for area in CacheArea::ALL {
            let dir = self.area_dir(area);
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!("Cannot read cache area {}: {}", dir.display(), e);
                    unreadable.push(format!("{}: {}", dir.display(), e));
                    continue;
                }
            };
            report.areas_scanned += 1;

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Error listing {}: {}", dir.display(), e);
                        break;
                    }
                };
                let path = entry.path();

                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    // Released by its owner between listing and stat
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => {
                        tracing::warn!("Cannot stat {}: {}", path.display(), e);
                        continue;
                    }
                };
                if !metadata.is_file() {
                    continue;
                }
                let expired = metadata
                    .modified()
                    .map(|modified| modified < cutoff)
                    .unwrap_or(false);
                if !expired {
                    continue;
                }

                match fs::remove_file(&path).await {
                    Ok(()) => {
                        tracing::info!("Cleaned up old cache file: {}", path.display());
                        report.files_removed += 1;
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!("Failed to clean up {}: {}", path.display(), e);
                        report.failures += 1;
                    }
                }
            }
        }

        if report.areas_scanned == 0 && !unreadable.is_empty() {
            return Err(AppError::Directory(format!(
                "no cache area could be read: {}",
                unreadable.join("; ")
            )));
        }

        Ok(report)
    }

    /// Walk the cache and report counts and sizes.
    ///
    /// This lists every file, so it's meant for the diagnostics endpoint and
    /// not for anything on the request path.
    pub async fn status(&self) -> AppResult<CacheStatus> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.status_blocking())
            .await
            .map_err(|e| AppError::Internal(format!("cache status task failed: {}", e)))
    }

    /// Whether both areas are present as directories.
    pub async fn area_dirs_exist(&self) -> bool {
        for area in CacheArea::ALL {
            match fs::metadata(self.area_dir(area)).await {
                Ok(metadata) if metadata.is_dir() => {}
                _ => return false,
            }
        }
        true
    }

    fn status_blocking(&self) -> CacheStatus {
        let audio_dir = self.area_dir(CacheArea::Audio);
        let tsv_dir = self.area_dir(CacheArea::Manifest);

        let total_size: u64 = walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|metadata| metadata.len())
            .sum();

        CacheStatus {
            cache_exists: self.root.is_dir(),
            audio_cache_exists: audio_dir.is_dir(),
            tsv_cache_exists: tsv_dir.is_dir(),
            audio_files_count: count_files(&audio_dir),
            tsv_files_count: count_files(&tsv_dir),
            total_cache_size_bytes: total_size,
            total_cache_size_mb: (total_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            cache_directory: self.root.clone(),
            audio_cache_directory: audio_dir,
            tsv_cache_directory: tsv_dir,
        }
    }
}

/// Owns a cache entry until it is released.
///
/// `release` is the normal path and goes through [`CacheStore::release`]. If
/// the lease is dropped without it (a panic unwinding through the
/// orchestrator, or an engine call cancelled by its timeout) the file is
/// removed in `Drop`, so every exit path deletes the entry exactly once.
///
/// `Drop` can't await, so that fallback is a single blocking unlink on the
/// current thread. It works with or without a runtime and only runs on the
/// abnormal paths.
#[derive(Debug)]
pub struct CacheLease {
    entry: CacheEntry,
    released: bool,
}

impl CacheLease {
    pub fn new(entry: CacheEntry) -> Self {
        Self {
            entry,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.entry.path
    }

    pub async fn release(mut self, store: &CacheStore) {
        store.release(&self.entry).await;
        self.released = true;
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.entry.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to clean up {} on drop: {}",
                self.entry.path.display(),
                e
            ),
        }
    }
}

async fn write_new_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(content).await?;
    file.flush().await?;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!("Failed to clean up {}: {}", path.display(), e);
        }
    }
}

/// Extension of a client-supplied filename, if it is short and alphanumeric.
fn extension_of(original_name: &str) -> Option<String> {
    let ext = Path::new(original_name).extension()?.to_str()?;
    let usable = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    usable.then(|| ext.to_string())
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
                .count()
        })
        .unwrap_or(0)
}
