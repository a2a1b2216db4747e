//! Sandboxed Path Resolver
//!
//! Every file operation goes through [`PathResolver::resolve`]. Requested
//! paths are joined to the root and normalized lexically; anything that
//! climbs out of the root is refused. With `check_symlinks` on, the deepest
//! existing ancestor is also canonicalized so a link inside the root cannot
//! point the operation somewhere else.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::config::FilesConfig;
use crate::error::PathError;

/// Confines paths to one configured root
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    check_symlinks: bool,
}

impl PathResolver {
    /// Create a resolver for `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, check_symlinks: bool) -> Self {
        Self {
            root: normalize(&root.into()),
            check_symlinks,
        }
    }

    /// Build from configuration
    #[must_use]
    pub fn from_config(config: &FilesConfig) -> Self {
        Self::new(config.root(), config.check_symlinks)
    }

    /// Configured root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `requested` under the root, or `None` if it escapes
    #[must_use]
    pub fn resolve(&self, requested: &str) -> Option<PathBuf> {
        self.try_resolve(requested).ok()
    }

    /// [`resolve`](Self::resolve) with the reason for refusal
    pub fn try_resolve(&self, requested: &str) -> Result<PathBuf, PathError> {
        let relative = requested.trim_start_matches(['/', '\\']);
        let candidate = normalize(&self.root.join(relative));

        if !candidate.starts_with(&self.root) {
            debug!(requested, "Path escapes root");
            return Err(PathError::OutsideRoot);
        }

        if self.check_symlinks && !self.stays_inside_after_links(&candidate) {
            debug!(requested, "Path escapes root through a symlink");
            return Err(PathError::OutsideRoot);
        }

        Ok(candidate)
    }

    /// Root-relative form of an absolute path under the root
    #[must_use]
    pub fn relative(&self, absolute: &Path) -> Option<PathBuf> {
        absolute.strip_prefix(&self.root).ok().map(Path::to_path_buf)
    }

    fn stays_inside_after_links(&self, candidate: &Path) -> bool {
        // A missing root contains nothing that could link outside it
        let Ok(real_root) = self.root.canonicalize() else {
            return true;
        };

        let mut ancestor = candidate;
        loop {
            if let Ok(real) = ancestor.canonicalize() {
                return real.starts_with(&real_root);
            }
            match ancestor.parent() {
                Some(parent) if parent.starts_with(&self.root) => ancestor = parent,
                _ => return true,
            }
        }
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
/// `..` at the filesystem root stays at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_is_refused() {
        let resolver = PathResolver::new("/srv/pincerna", false);
        assert_eq!(resolver.resolve("../../etc/passwd"), None);
        assert_eq!(resolver.resolve("/a/../../../etc"), None);
        assert_eq!(
            resolver.try_resolve("movies/../../secret"),
            Err(PathError::OutsideRoot)
        );
    }

    #[test]
    fn sibling_with_common_prefix_is_refused() {
        let resolver = PathResolver::new("/srv/pincerna", false);
        assert_eq!(resolver.resolve("../pincerna-evil/x"), None);
    }

    #[test]
    fn leading_separator_is_relative_to_root() {
        let resolver = PathResolver::new("/srv/pincerna", false);
        let resolved = resolver.resolve("/sub/dir").unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/pincerna/sub/dir"));
        assert!(resolved.starts_with(resolver.root()));
    }

    #[test]
    fn dots_inside_root_are_normalized() {
        let resolver = PathResolver::new("/srv/pincerna/", false);
        assert_eq!(
            resolver.resolve("a/./b/../c"),
            Some(PathBuf::from("/srv/pincerna/a/c"))
        );
        assert_eq!(resolver.resolve(""), Some(PathBuf::from("/srv/pincerna")));
        assert_eq!(resolver.resolve("a/.."), Some(PathBuf::from("/srv/pincerna")));
    }

    #[test]
    fn relative_strips_root() {
        let resolver = PathResolver::new("/srv/pincerna", false);
        assert_eq!(
            resolver.relative(Path::new("/srv/pincerna/Movies/a.mp4")),
            Some(PathBuf::from("Movies/a.mp4"))
        );
        assert_eq!(resolver.relative(Path::new("/etc/passwd")), None);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_refused_when_checked() {
        let outside = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("escape")).unwrap();
        std::fs::create_dir(root.path().join("inside")).unwrap();

        let checked = PathResolver::new(root.path(), true);
        assert_eq!(checked.resolve("escape/file.txt"), None);
        assert!(checked.resolve("inside/new.txt").is_some());

        let unchecked = PathResolver::new(root.path(), false);
        assert!(unchecked.resolve("escape/file.txt").is_some());
    }
}
