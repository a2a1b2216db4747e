//! Mounted storage: enumeration, attach watching and backups

pub mod backup;
pub mod mounts;
pub mod watcher;

pub use backup::{BackupError, BackupManager, BackupRecord};
pub use mounts::{Mount, MountSource, ProcMounts, parse_mounts};
pub use watcher::{CycleReport, MountEvent, StorageWatcher};
