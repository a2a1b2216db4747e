//! Storage Watcher
//!
//! Polls the mount table, reports attach/detach deltas and, when enabled,
//! starts a backup for newly attached volumes that carry the backup
//! subdirectory. The first poll only records a baseline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backup::{BackupError, BackupManager, BackupRecord};
use super::mounts::{Mount, MountSource};

/// Change in the mount table between two polls
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "mount", rename_all = "snake_case")]
pub enum MountEvent {
    /// Volume appeared
    Attached(Mount),
    /// Volume disappeared
    Detached(Mount),
}

/// Outcome of one poll
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Attach/detach events, attaches first
    pub events: Vec<MountEvent>,
    /// Backups started by this poll
    pub backups: Vec<JoinHandle<()>>,
}

/// Periodic mount-table watcher
pub struct StorageWatcher {
    source: Arc<dyn MountSource>,
    backups: Arc<BackupManager>,
    auto_backup: bool,
    observed: RwLock<Option<BTreeMap<PathBuf, Mount>>>,
}

impl StorageWatcher {
    /// Create a watcher
    #[must_use]
    pub fn new(source: Arc<dyn MountSource>, backups: Arc<BackupManager>, auto_backup: bool) -> Self {
        Self {
            source,
            backups,
            auto_backup,
            observed: RwLock::new(None),
        }
    }

    /// Backup manager shared with manual triggers
    #[must_use]
    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    /// Mounts seen by the last successful poll
    #[must_use]
    pub fn current_mounts(&self) -> Vec<Mount> {
        self.observed
            .read()
            .as_ref()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `mount_point` was mounted at the last poll
    #[must_use]
    pub fn is_mounted(&self, mount_point: &Path) -> bool {
        self.observed
            .read()
            .as_ref()
            .is_some_and(|m| m.contains_key(mount_point))
    }

    /// Manual backup of a known volume; shares the lock with automatic backups
    pub async fn trigger_backup(&self, mount_point: &Path) -> Result<BackupRecord, BackupError> {
        if !self.is_mounted(mount_point) {
            return Err(BackupError::UnknownMount(mount_point.to_path_buf()));
        }
        self.backups.backup(mount_point).await
    }

    /// Poll the mount table once
    pub async fn poll_once(&self) -> CycleReport {
        let current: BTreeMap<PathBuf, Mount> = match self.source.mounts().await {
            Ok(mounts) => mounts.into_iter().map(|m| (m.mount_point.clone(), m)).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to enumerate mounts");
                return CycleReport::default();
            }
        };

        let previous = self.observed.read().clone();
        let Some(previous) = previous else {
            debug!(mounts = current.len(), "Recorded baseline mount set");
            *self.observed.write() = Some(current);
            return CycleReport::default();
        };

        let mut report = CycleReport::default();
        for (point, mount) in &current {
            if !previous.contains_key(point) {
                info!(mount_point = %point.display(), device = %mount.device, "Volume attached");
                report.events.push(MountEvent::Attached(mount.clone()));
                if let Some(handle) = self.start_auto_backup(point) {
                    report.backups.push(handle);
                }
            }
        }
        for (point, mount) in &previous {
            if !current.contains_key(point) {
                info!(mount_point = %point.display(), device = %mount.device, "Volume detached");
                report.events.push(MountEvent::Detached(mount.clone()));
            }
        }

        *self.observed.write() = Some(current);
        report
    }

    fn start_auto_backup(&self, mount_point: &Path) -> Option<JoinHandle<()>> {
        if !self.auto_backup {
            return None;
        }
        if !self.backups.has_source(mount_point) {
            debug!(mount_point = %mount_point.display(), subdir = self.backups.subdir(), "No backup subdirectory");
            return None;
        }

        let backups = Arc::clone(&self.backups);
        let mount_point = mount_point.to_path_buf();
        Some(tokio::spawn(async move {
            if let Err(e) = backups.backup(&mount_point).await {
                error!(mount_point = %mount_point.display(), error = %e, "Automatic backup failed");
            }
        }))
    }

    /// Run [`poll_once`](Self::poll_once) every `interval` until shutdown
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?interval, auto_backup = self.auto_backup, "Storage watcher started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.poll_once().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Storage watcher shutting down");
                        break;
                    }
                }
            }
        })
    }
}
