//! Pending authorization flow storage
//!
//! Persists `{state -> verifier, expiry}` to a JSON side file so a login
//! started by one worker can be completed by another, or after a restart.
//! The file is re-read before every lookup; nothing is cached in memory.
//! Every read-modify-write holds an exclusive advisory lock on a sibling
//! `.lock` file, so workers in separate processes never interleave.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::token::unix_now;
use crate::{Error, Result};

/// One in-flight login attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFlow {
    /// PKCE code verifier
    pub verifier: String,
    /// Expiry (Unix epoch seconds)
    pub expires_at: u64,
}

impl PendingFlow {
    /// Whether the flow is past its lifetime at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// File-backed store of pending flows keyed by state token
pub struct PendingFlowStore {
    path: PathBuf,
    lock_path: PathBuf,
    ttl: Duration,
}

impl PendingFlowStore {
    /// Create a store persisting to `path`
    pub fn new(path: PathBuf, ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Internal(format!("Failed to create pending flow dir: {e}"))
                })?;
            }
        }

        Ok(Self {
            lock_path: path.with_extension("lock"),
            path,
            ttl,
        })
    }

    /// Side file location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a new flow; its expiry is fixed server-side
    pub fn insert(&self, state: &str, verifier: &str) -> Result<PendingFlow> {
        self.insert_at(state, verifier, unix_now())
    }

    /// Record a new flow as if the current time were `now`
    pub fn insert_at(&self, state: &str, verifier: &str, now: u64) -> Result<PendingFlow> {
        let flow = PendingFlow {
            verifier: verifier.to_string(),
            expires_at: now.saturating_add(self.ttl.as_secs()),
        };

        let _lock = self.lock()?;
        let mut flows = self.read_all();
        // Expired entries are dropped whenever the file is rewritten
        flows.retain(|_, f| !f.is_expired_at(now));
        flows.insert(state.to_string(), flow.clone());
        self.write_all(&flows)?;

        debug!(pending = flows.len(), "Stored pending authorization flow");
        Ok(flow)
    }

    /// Remove and return the flow for `state`.
    ///
    /// Returns `Ok(None)` when the state was never issued, was already
    /// consumed, or has expired. A state is consumed even when expired.
    pub fn take(&self, state: &str) -> Result<Option<PendingFlow>> {
        self.take_at(state, unix_now())
    }

    /// [`take`](Self::take) as if the current time were `now`
    pub fn take_at(&self, state: &str, now: u64) -> Result<Option<PendingFlow>> {
        let _lock = self.lock()?;
        // Another worker may have written the flow; always reload first
        let mut flows = self.read_all();

        let Some(flow) = flows.remove(state) else {
            return Ok(None);
        };

        flows.retain(|_, f| !f.is_expired_at(now));
        self.write_all(&flows)?;

        if flow.is_expired_at(now) {
            info!("Pending authorization flow expired before callback");
            return Ok(None);
        }
        Ok(Some(flow))
    }

    /// Exclusive lock shared by every store on this side file; released on drop
    fn lock(&self) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| Error::Internal(format!("Failed to open pending flow lock: {e}")))?;
        file.lock_exclusive()
            .map_err(|e| Error::Internal(format!("Failed to lock pending flow file: {e}")))?;
        Ok(file)
    }

    fn read_all(&self) -> HashMap<String, PendingFlow> {
        if !self.path.exists() {
            return HashMap::new();
        }

        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => HashMap::new(),
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "Discarding unparsable pending flow file");
                HashMap::new()
            }),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read pending flow file");
                HashMap::new()
            }
        }
    }

    fn write_all(&self, flows: &HashMap<String, PendingFlow>) -> Result<()> {
        let content = serde_json::to_string_pretty(flows)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        // Unique temp file (mode 0600) renamed over the side file
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| Error::Internal(format!("Failed to create pending flow temp file: {e}")))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| Error::Internal(format!("Failed to write pending flow file: {e}")))?;
        tmp.persist(&self.path).map_err(|e| {
            Error::Internal(format!("Failed to replace pending flow file: {}", e.error))
        })?;
        Ok(())
    }
}
