//! Allow-List Gate
//!
//! The allow list is re-read from its side file on every check so edits take
//! effect without a restart. When the file cannot be used, exactly one
//! built-in identity is admitted: never everyone, never no one.

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, warn};

/// Accepted on-disk shapes
#[derive(Deserialize)]
#[serde(untagged)]
enum AllowListFile {
    /// `["a@example.com", "b@example.com"]`
    List(Vec<String>),
    /// `{"emails": ["a@example.com"]}`
    Object { emails: Vec<String> },
}

/// Case-insensitive email allow list backed by a JSON side file
#[derive(Debug, Clone)]
pub struct AllowList {
    path: PathBuf,
    default_identity: String,
}

impl AllowList {
    /// Create a gate reading from `path`
    #[must_use]
    pub fn new(path: PathBuf, default_identity: impl Into<String>) -> Self {
        Self {
            path,
            default_identity: default_identity.into(),
        }
    }

    /// Side file location
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the current entries, lower-cased and de-duplicated in file order.
    ///
    /// Falls back to the single default identity when the file is missing,
    /// unreadable, unparsable or empty.
    #[must_use]
    pub fn load(&self) -> Vec<String> {
        match self.read_file() {
            Some(entries) if !entries.is_empty() => entries,
            Some(_) => {
                warn!(path = %self.path.display(), "Allow list is empty, using default identity");
                vec![self.default_identity.to_lowercase()]
            }
            None => vec![self.default_identity.to_lowercase()],
        }
    }

    /// Case-insensitive membership test
    #[must_use]
    pub fn is_allowed(&self, email: &str) -> bool {
        let needle = email.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.load().iter().any(|entry| *entry == needle)
    }

    fn read_file(&self) -> Option<Vec<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Allow list not readable");
                return None;
            }
        };

        let parsed: AllowListFile = match serde_json::from_str(&content) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to parse allow list");
                return None;
            }
        };

        let raw = match parsed {
            AllowListFile::List(emails) | AllowListFile::Object { emails } => emails,
        };

        let mut entries: Vec<String> = Vec::with_capacity(raw.len());
        for email in raw {
            let normalized = email.trim().to_lowercase();
            if !normalized.is_empty() && !entries.contains(&normalized) {
                entries.push(normalized);
            }
        }
        Some(entries)
    }
}
