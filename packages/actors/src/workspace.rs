//! Scratch directories owned by a single handler invocation.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A private scratch directory, removed when released or dropped.
///
/// Dropping (including during unwinding) removes the directory silently;
/// [`Workspace::release`] does the same but logs removal errors.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh directory under `root`, or under the system temp dir.
    pub fn acquire(root: Option<&Path>, label: &str) -> io::Result<Self> {
        let prefix = format!("{label}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        tracing::debug!("Acquired workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create (if needed) and return a subdirectory.
    pub fn subdir(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Remove the directory. Failures are logged, never returned.
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!("Failed to remove workspace {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[test]
    fn release_removes_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::acquire(Some(root.path()), "scene").unwrap();
        let frames = workspace.subdir("scene").unwrap();
        std::fs::write(frames.join("scene0001.png"), b"png").unwrap();

        let path = workspace.path().to_path_buf();
        assert!(path.starts_with(root.path()));
        workspace.release();
        assert!(!path.exists());
    }

    #[test]
    fn unwinding_still_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let captured = std::panic::catch_unwind(|| {
            let workspace = Workspace::acquire(Some(root.path()), "scene").unwrap();
            let path = workspace.path().to_path_buf();
            std::panic::panic_any(path);
        });
        let path = *captured.unwrap_err().downcast::<PathBuf>().unwrap();
        assert!(!path.exists());
    }
}
