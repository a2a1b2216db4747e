//! Media Indexer
//!
//! Walks the file root on a fixed period and keeps an in-memory map of video
//! files. Entries whose size and modification instant are unchanged are
//! carried over untouched, including ones whose thumbnail failed; new or
//! changed files get a thumbnail. The finished map
//! replaces the previous one in a single assignment, so readers see either
//! the old index or the new one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use super::thumbnails::{ThumbnailCache, thumbnail_key};

/// Extensions treated as video containers (lower-case)
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "webm", "m4v", "wmv", "flv", "mpg", "mpeg", "ts",
];

/// Directory names never descended into
pub const SKIP_DIRS: &[&str] = &[
    "proc",
    "sys",
    "dev",
    "run",
    "tmp",
    "lost+found",
    "node_modules",
    "__pycache__",
    "$RECYCLE.BIN",
    "System Volume Information",
];

/// One indexed video
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoEntry {
    /// File name
    pub name: String,
    /// Path relative to the file root
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time, formatted for display
    pub mtime: String,
    /// Modification time, Unix seconds
    pub mtime_ts: i64,
    /// Exact modification instant, used for change detection
    #[serde(skip)]
    pub modified: SystemTime,
    /// Thumbnail cache key, when one was generated
    pub thumbnail: Option<String>,
}

/// Counters for one indexer pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Video files seen
    pub scanned: usize,
    /// Entries carried over unchanged
    pub reused: usize,
    /// Entries created or refreshed
    pub refreshed: usize,
    /// Entries dropped because the file is gone
    pub removed: usize,
}

struct Candidate {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Shared video index
pub struct MediaIndex {
    root: PathBuf,
    thumbnails: Arc<ThumbnailCache>,
    entries: RwLock<Arc<HashMap<PathBuf, VideoEntry>>>,
    cycle: Mutex<()>,
}

impl MediaIndex {
    /// Create an empty index over `root`
    #[must_use]
    pub fn new(root: PathBuf, thumbnails: Arc<ThumbnailCache>) -> Self {
        Self {
            root,
            thumbnails,
            entries: RwLock::new(Arc::new(HashMap::new())),
            cycle: Mutex::new(()),
        }
    }

    /// Thumbnail cache used by this index
    #[must_use]
    pub fn thumbnails(&self) -> &Arc<ThumbnailCache> {
        &self.thumbnails
    }

    /// Entry for an absolute path
    #[must_use]
    pub fn get(&self, absolute: &Path) -> Option<VideoEntry> {
        self.entries.read().get(absolute).cloned()
    }

    /// The latest complete index
    #[must_use]
    pub fn snapshot(&self) -> Arc<HashMap<PathBuf, VideoEntry>> {
        Arc::clone(&self.entries.read())
    }

    /// All entries, newest first
    #[must_use]
    pub fn videos(&self) -> Vec<VideoEntry> {
        let snapshot = self.snapshot();
        let mut videos: Vec<VideoEntry> = snapshot.values().cloned().collect();
        videos.sort_by(|a, b| b.mtime_ts.cmp(&a.mtime_ts).then_with(|| a.path.cmp(&b.path)));
        videos
    }

    /// Walk the root once and publish a new index
    pub async fn run_cycle(&self) -> CycleStats {
        let _cycle = self.cycle.lock().await;

        let root = self.root.clone();
        let candidates = match tokio::task::spawn_blocking(move || scan(&root)).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Media scan task failed");
                return CycleStats::default();
            }
        };

        let previous = self.snapshot();
        let mut next = HashMap::with_capacity(candidates.len());
        let mut stats = CycleStats {
            scanned: candidates.len(),
            ..CycleStats::default()
        };

        for candidate in candidates {
            let mtime_ts = unix_seconds(candidate.modified);
            let entry = match previous.get(&candidate.path) {
                Some(prev) if prev.size == candidate.size && prev.modified == candidate.modified => {
                    stats.reused += 1;
                    prev.clone()
                }
                Some(_) => {
                    stats.refreshed += 1;
                    let thumbnail = self.thumbnails.regenerate(&candidate.path).await;
                    self.entry_for(&candidate, mtime_ts, thumbnail.is_some())
                }
                None => {
                    stats.refreshed += 1;
                    let thumbnail = self.thumbnails.ensure_thumbnail(&candidate.path).await;
                    self.entry_for(&candidate, mtime_ts, thumbnail.is_some())
                }
            };
            next.insert(candidate.path, entry);
        }

        stats.removed = previous.keys().filter(|p| !next.contains_key(*p)).count();
        *self.entries.write() = Arc::new(next);

        debug!(
            scanned = stats.scanned,
            reused = stats.reused,
            refreshed = stats.refreshed,
            removed = stats.removed,
            "Media index cycle complete"
        );
        stats
    }

    fn entry_for(&self, candidate: &Candidate, mtime_ts: i64, has_thumbnail: bool) -> VideoEntry {
        let name = candidate
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = candidate
            .path
            .strip_prefix(&self.root)
            .unwrap_or(&candidate.path)
            .to_string_lossy()
            .into_owned();
        let mtime = DateTime::<Utc>::from(candidate.modified)
            .format("%Y-%m-%d %H:%M")
            .to_string();

        VideoEntry {
            name,
            path,
            size: candidate.size,
            mtime,
            mtime_ts,
            modified: candidate.modified,
            thumbnail: has_thumbnail.then(|| thumbnail_key(&candidate.path)),
        }
    }

    /// Run [`run_cycle`](Self::run_cycle) every `interval` until shutdown
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(root = %self.root.display(), interval = ?interval, "Media indexer started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Media indexer shutting down");
                        break;
                    }
                }
            }
        })
    }
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIP_DIRS.contains(&&*name)
}

fn scan(root: &Path) -> Vec<Candidate> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_video(entry.path()) {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => found.push(Candidate {
                path: entry.path().to_path_buf(),
                size: meta.len(),
                modified: meta.modified().unwrap_or(UNIX_EPOCH),
            }),
            Err(e) => debug!(path = %entry.path().display(), error = %e, "Skipping file without metadata"),
        }
    }
    found
}

fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    }
}
