//! Backup manager
//!
//! Copies `<mount>/<subdir>` into `<destination root>/<device label>`,
//! replacing the previous backup for that label. One copy runs at a time;
//! a second request waits for the first to finish. Each copy runs as a
//! detached task, so it is timed out, cancelled and recorded even when the
//! caller stops waiting.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::StorageConfig;

/// A completed backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    /// When the copy started (after acquiring the backup lock)
    pub started: DateTime<Utc>,
    /// When the copy finished
    pub timestamp: DateTime<Utc>,
    /// Directory that was copied
    pub source: PathBuf,
    /// Where it now lives
    pub destination: PathBuf,
    /// Files copied
    pub files: usize,
}

/// Backup failure
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// The volume has no backup subdirectory
    #[error("nothing to back up: {0} does not exist")]
    MissingSource(PathBuf),

    /// The requested path is not a mounted volume
    #[error("not a mounted volume: {0}")]
    UnknownMount(PathBuf),

    /// The copy did not finish in time
    #[error("backup timed out after {0:?}")]
    Timeout(Duration),

    /// The copy was abandoned
    #[error("backup cancelled")]
    Cancelled,

    /// Filesystem failure
    #[error("backup I/O error: {0}")]
    Io(#[from] io::Error),

    /// The copy task panicked
    #[error("backup task failed: {0}")]
    Task(String),
}

impl BackupError {
    /// Stable machine-readable kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingSource(_) => "missing_source",
            Self::UnknownMount(_) => "unknown_mount",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io_error",
            Self::Task(_) => "internal_error",
        }
    }
}

/// Serialized backup copies plus a ring of recent results
pub struct BackupManager {
    destination_root: PathBuf,
    subdir: String,
    copy_timeout: Duration,
    lock: Arc<tokio::sync::Mutex<()>>,
    recent: Arc<Mutex<VecDeque<BackupRecord>>>,
    recent_limit: usize,
}

impl BackupManager {
    /// Create a manager writing under `destination_root`
    #[must_use]
    pub fn new(
        destination_root: PathBuf,
        subdir: impl Into<String>,
        copy_timeout: Duration,
        recent_limit: usize,
    ) -> Self {
        Self {
            destination_root,
            subdir: subdir.into(),
            copy_timeout,
            lock: Arc::new(tokio::sync::Mutex::new(())),
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(recent_limit))),
            recent_limit: recent_limit.max(1),
        }
    }

    /// Build from configuration; backups land in `<files_root>/<backup_dir>`
    #[must_use]
    pub fn from_config(config: &StorageConfig, files_root: &Path) -> Self {
        Self::new(
            files_root.join(&config.backup_dir),
            config.backup_subdir.clone(),
            config.copy_timeout,
            config.recent_limit,
        )
    }

    /// The subdirectory copied from each volume
    #[must_use]
    pub fn subdir(&self) -> &str {
        &self.subdir
    }

    /// Whether `mount_point` carries something to back up
    #[must_use]
    pub fn has_source(&self, mount_point: &Path) -> bool {
        mount_point.join(&self.subdir).is_dir()
    }

    /// Destination for a volume mounted at `mount_point`
    #[must_use]
    pub fn destination_for(&self, mount_point: &Path) -> PathBuf {
        self.destination_root.join(device_label(mount_point))
    }

    /// Recent records, newest last
    #[must_use]
    pub fn recent(&self) -> Vec<BackupRecord> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Whether a copy is currently running
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Back up the volume at `mount_point`, waiting for any running copy first
    pub async fn backup(&self, mount_point: &Path) -> Result<BackupRecord, BackupError> {
        let source = mount_point.join(&self.subdir);
        if !source.is_dir() {
            return Err(BackupError::MissingSource(source));
        }

        let job = BackupJob {
            destination: self.destination_for(mount_point),
            source,
            lock: Arc::clone(&self.lock),
            recent: Arc::clone(&self.recent),
            recent_limit: self.recent_limit,
            copy_timeout: self.copy_timeout,
        };
        // Dropping this future leaves the job running to completion
        tokio::spawn(job.run())
            .await
            .map_err(|e| BackupError::Task(e.to_string()))?
    }
}

/// One copy, owning everything it needs to finish on its own
struct BackupJob {
    source: PathBuf,
    destination: PathBuf,
    lock: Arc<tokio::sync::Mutex<()>>,
    recent: Arc<Mutex<VecDeque<BackupRecord>>>,
    recent_limit: usize,
    copy_timeout: Duration,
}

impl BackupJob {
    async fn run(self) -> Result<BackupRecord, BackupError> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let started = Utc::now();
        info!(source = %self.source.display(), destination = %self.destination.display(), "Backup started");

        let cancel = Arc::new(AtomicBool::new(false));
        let task = {
            let cancel = Arc::clone(&cancel);
            let source = self.source.clone();
            let destination = self.destination.clone();
            // The guard moves into the blocking task so the lock is held until
            // the copy actually stops, even after a timeout
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                let files = copy_replacing(&source, &destination, &cancel)?;
                Ok::<_, BackupError>((files, Utc::now()))
            })
        };

        let (files, finished) = match tokio::time::timeout(self.copy_timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => return Err(BackupError::Task(e.to_string())),
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                warn!(source = %self.source.display(), timeout = ?self.copy_timeout, "Backup timed out");
                return Err(BackupError::Timeout(self.copy_timeout));
            }
        };

        let record = BackupRecord {
            started,
            timestamp: finished,
            source: self.source,
            destination: self.destination,
            files,
        };
        info!(
            source = %record.source.display(),
            destination = %record.destination.display(),
            files = record.files,
            "Backup complete"
        );

        let mut recent = self.recent.lock();
        if recent.len() == self.recent_limit {
            recent.pop_front();
        }
        recent.push_back(record.clone());
        Ok(record)
    }
}

/// Last path component of the mount point, used as the per-device folder name
fn device_label(mount_point: &Path) -> String {
    mount_point
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "root".to_string())
}

/// Copy into a staging directory, then swap it in place of `destination`
fn copy_replacing(source: &Path, destination: &Path, cancel: &AtomicBool) -> Result<usize, BackupError> {
    let parent = destination
        .parent()
        .ok_or_else(|| BackupError::Io(io::Error::other("destination has no parent")))?;
    fs::create_dir_all(parent)?;

    let label = device_label(destination);
    let staging = parent.join(format!(".{label}.partial"));
    let retired = parent.join(format!(".{label}.old"));
    remove_if_exists(&staging)?;
    remove_if_exists(&retired)?;

    let files = match copy_tree(source, &staging, cancel) {
        Ok(n) => n,
        Err(e) => {
            let _ = remove_if_exists(&staging);
            return Err(e);
        }
    };

    if destination.exists() {
        fs::rename(destination, &retired)?;
    }
    fs::rename(&staging, destination)?;
    remove_if_exists(&retired)?;
    Ok(files)
}

fn copy_tree(source: &Path, target: &Path, cancel: &AtomicBool) -> Result<usize, BackupError> {
    fs::create_dir_all(target)?;
    let mut files = 0;

    for entry in WalkDir::new(source).follow_links(false).min_depth(1) {
        if cancel.load(Ordering::SeqCst) {
            return Err(BackupError::Cancelled);
        }

        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during backup");
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let dest = target.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            match fs::copy(entry.path(), &dest) {
                Ok(_) => files += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to copy file"),
            }
        } else {
            debug!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }

    Ok(files)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(dir: &tempfile::TempDir, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let mount = dir.path().join(name);
        for (rel, content) in files {
            let path = mount.join("Streaming").join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        mount
    }

    #[tokio::test]
    async fn copies_subdir_into_device_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mount = volume(&dir, "usb1", &[("a.txt", "a"), ("nested/b.txt", "b")]);
        let manager = BackupManager::new(dir.path().join("Backups"), "Streaming", Duration::from_secs(10), 5);

        let record = manager.backup(&mount).await.unwrap();
        assert_eq!(record.destination, dir.path().join("Backups").join("usb1"));
        assert_eq!(record.files, 2);
        assert_eq!(
            fs::read_to_string(record.destination.join("nested/b.txt")).unwrap(),
            "b"
        );
        assert_eq!(manager.recent().len(), 1);
    }

    #[tokio::test]
    async fn second_backup_replaces_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let mount = volume(&dir, "usb1", &[("old.txt", "1")]);
        let manager = BackupManager::new(dir.path().join("Backups"), "Streaming", Duration::from_secs(10), 5);
        manager.backup(&mount).await.unwrap();

        fs::remove_file(mount.join("Streaming/old.txt")).unwrap();
        fs::write(mount.join("Streaming/new.txt"), "2").unwrap();
        let record = manager.backup(&mount).await.unwrap();

        assert!(!record.destination.join("old.txt").exists());
        assert!(record.destination.join("new.txt").exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("Backups"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("usb1")]);
    }

    #[tokio::test]
    async fn missing_subdir_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bare")).unwrap();
        let manager = BackupManager::new(dir.path().join("Backups"), "Streaming", Duration::from_secs(10), 5);

        let err = manager.backup(&dir.path().join("bare")).await.unwrap_err();
        assert!(matches!(err, BackupError::MissingSource(_)));
        assert!(manager.recent().is_empty());
    }

    #[tokio::test]
    async fn recent_ring_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("Backups"), "Streaming", Duration::from_secs(10), 2);
        for name in ["a", "b", "c"] {
            let mount = volume(&dir, name, &[("f", "x")]);
            manager.backup(&mount).await.unwrap();
        }

        let labels: Vec<_> = manager
            .recent()
            .iter()
            .map(|r| device_label(&r.destination))
            .collect();
        assert_eq!(labels, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn concurrent_backups_run_one_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let mount = volume(&dir, "usb1", &[("a.txt", "a")]);
        let manager = Arc::new(BackupManager::new(
            dir.path().join("Backups"),
            "Streaming",
            Duration::from_secs(10),
            5,
        ));

        let first = {
            let manager = Arc::clone(&manager);
            let mount = mount.clone();
            tokio::spawn(async move { manager.backup(&mount).await })
        };
        let second = {
            let manager = Arc::clone(&manager);
            let mount = mount.clone();
            tokio::spawn(async move { manager.backup(&mount).await })
        };

        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
        assert!(!manager.is_busy());

        let recent = manager.recent();
        assert_eq!(recent.len(), 2);
        assert!(recent[1].started >= recent[0].timestamp, "copies overlapped: {recent:?}");
    }

    #[tokio::test]
    async fn backup_waits_while_the_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let mount = volume(&dir, "usb1", &[("a.txt", "a")]);
        let manager = Arc::new(BackupManager::new(
            dir.path().join("Backups"),
            "Streaming",
            Duration::from_secs(10),
            5,
        ));

        let held = Arc::clone(&manager.lock).lock_owned().await;
        assert!(manager.is_busy());

        let pending = {
            let manager = Arc::clone(&manager);
            let mount = mount.clone();
            tokio::spawn(async move { manager.backup(&mount).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!pending.is_finished());
        assert!(!manager.destination_for(&mount).exists());
        assert!(manager.recent().is_empty());

        drop(held);
        let record = pending.await.unwrap().unwrap();
        assert_eq!(record.files, 1);
        assert!(!manager.is_busy());
    }

    #[tokio::test]
    async fn abandoned_backup_still_records() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<(String, String)> = (0..2000)
            .map(|i| (format!("d{}/f{i}.txt", i % 20), "x".to_string()))
            .collect();
        let files: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
        let mount = volume(&dir, "usb1", &files);
        let manager = BackupManager::new(dir.path().join("Backups"), "Streaming", Duration::from_secs(30), 5);

        // The caller gives up almost immediately; the copy carries on
        let _ = tokio::time::timeout(Duration::from_millis(1), manager.backup(&mount)).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        while manager.recent().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let recent = manager.recent();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].files, 2000);
        assert!(manager.destination_for(&mount).join("d0/f0.txt").exists());
    }

    #[test]
    fn root_mount_gets_a_label() {
        assert_eq!(device_label(Path::new("/")), "root");
        assert_eq!(device_label(Path::new("/media/usb1")), "usb1");
    }
}
