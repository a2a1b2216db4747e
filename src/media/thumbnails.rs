//! Thumbnail Cache
//!
//! Preview images live at `<dir>/<sha256(absolute path)>.jpg`. Serving a
//! thumbnail is a pure existence check ([`ThumbnailCache::lookup`]); only
//! [`ThumbnailCache::ensure_thumbnail`] and [`ThumbnailCache::regenerate`]
//! run the extractor. Concurrent requests for the same source share one
//! extraction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::frames::FrameExtractor;
use crate::{Error, Result};

const EXTENSION: &str = "jpg";

/// Hex SHA-256 of an absolute path, the cache key
#[must_use]
pub fn thumbnail_key(absolute: &Path) -> String {
    hex::encode(Sha256::digest(absolute.to_string_lossy().as_bytes()))
}

fn is_valid_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| b.is_ascii_hexdigit())
}

/// On-disk, path-addressed cache of preview images
pub struct ThumbnailCache {
    dir: PathBuf,
    extractor: Arc<dyn FrameExtractor>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl ThumbnailCache {
    /// Create a cache rooted at `dir`, creating it if needed
    pub fn new(dir: PathBuf, extractor: Arc<dyn FrameExtractor>) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Internal(format!("Failed to create thumbnail dir: {e}")))?;
        Ok(Self {
            dir,
            extractor,
            in_flight: DashMap::new(),
        })
    }

    /// Cache directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{EXTENSION}"))
    }

    /// Existing image for `key`. Never generates.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        if !is_valid_key(key) {
            return None;
        }
        let path = self.path_for(key);
        path.is_file().then_some(path)
    }

    /// Cached image for `absolute`, extracting one if absent
    pub async fn ensure_thumbnail(&self, absolute: &Path) -> Option<PathBuf> {
        self.produce(absolute, false).await
    }

    /// Extract a fresh image for `absolute`, replacing any cached one
    pub async fn regenerate(&self, absolute: &Path) -> Option<PathBuf> {
        self.produce(absolute, true).await
    }

    async fn produce(&self, absolute: &Path, force: bool) -> Option<PathBuf> {
        let key = thumbnail_key(absolute);
        let target = self.path_for(&key);

        if !force && target.is_file() {
            return Some(target);
        }

        let lock = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        // Whoever held the lock may have produced it already
        let result = if !force && target.is_file() {
            Some(target)
        } else {
            self.extract_into(absolute, &key, target).await
        };

        drop(guard);
        self.in_flight
            .remove_if(&key, |_, l| Arc::strong_count(l) <= 2);
        result
    }

    async fn extract_into(&self, absolute: &Path, key: &str, target: PathBuf) -> Option<PathBuf> {
        let partial = self.dir.join(format!("{key}.part.{EXTENSION}"));

        match self.extractor.extract(absolute, &partial).await {
            Ok(()) if partial.is_file() => match tokio::fs::rename(&partial, &target).await {
                Ok(()) => {
                    debug!(source = %absolute.display(), key, "Thumbnail generated");
                    Some(target)
                }
                Err(e) => {
                    warn!(source = %absolute.display(), error = %e, "Failed to store thumbnail");
                    let _ = tokio::fs::remove_file(&partial).await;
                    None
                }
            },
            Ok(()) => {
                warn!(source = %absolute.display(), "Extractor reported success but wrote nothing");
                None
            }
            Err(e) => {
                warn!(source = %absolute.display(), error = %e, "Thumbnail extraction failed");
                let _ = tokio::fs::remove_file(&partial).await;
                None
            }
        }
    }
}
