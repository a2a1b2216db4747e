//! Mounted volume enumeration

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::{Error, Result};

/// Filesystem types that never represent attachable storage
const VIRTUAL_FS: &[&str] = &[
    "proc", "sysfs", "devtmpfs", "devpts", "tmpfs", "ramfs", "cgroup", "cgroup2", "securityfs",
    "pstore", "debugfs", "tracefs", "configfs", "fusectl", "mqueue", "hugetlbfs", "bpf",
    "autofs", "binfmt_misc", "overlay", "squashfs", "nsfs", "efivarfs", "rpc_pipefs",
    "selinuxfs", "fuse.portal", "fuse.gvfsd-fuse",
];

/// One mounted volume
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Mount {
    /// Backing device
    pub device: String,
    /// Where it is mounted
    pub mount_point: PathBuf,
    /// Filesystem type
    pub fs_type: String,
}

/// Source of the current mount table
#[async_trait]
pub trait MountSource: Send + Sync + 'static {
    /// Enumerate mounted, non-virtual volumes
    async fn mounts(&self) -> Result<Vec<Mount>>;
}

/// Reads `/proc/mounts` (or another file in that format)
#[derive(Debug, Clone)]
pub struct ProcMounts {
    path: PathBuf,
    timeout: Duration,
}

impl ProcMounts {
    /// Read from `/proc/mounts`
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_path("/proc/mounts", timeout)
    }

    /// Read from a custom mount table file
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl MountSource for ProcMounts {
    async fn mounts(&self) -> Result<Vec<Mount>> {
        let content = tokio::time::timeout(self.timeout, tokio::fs::read_to_string(&self.path))
            .await
            .map_err(|_| {
                Error::Internal(format!(
                    "Mount enumeration timed out after {:?}",
                    self.timeout
                ))
            })??;
        Ok(parse_mounts(&content))
    }
}

/// Parse a mount table in `/proc/mounts` format, skipping virtual filesystems
#[must_use]
pub fn parse_mounts(content: &str) -> Vec<Mount> {
    let mut mounts: Vec<Mount> = content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            if VIRTUAL_FS.contains(&fs_type) {
                return None;
            }
            Some(Mount {
                device: unescape(device),
                mount_point: PathBuf::from(unescape(mount_point)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect();
    mounts.sort_by(|a, b| a.mount_point.cmp(&b.mount_point));
    mounts.dedup_by(|a, b| a.mount_point == b.mount_point);
    mounts
}

/// Decode the octal escapes (`\040` for space) used in the mount table
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
