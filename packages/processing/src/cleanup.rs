//! Guaranteed removal of a job's temporary files.

use std::path::PathBuf;

/// Deletes every tracked path when dropped.
///
/// Dropping happens on every exit from the pipeline, including early returns
/// and the per-job timeout cancelling the pipeline future.
#[derive(Debug, Default)]
pub(crate) struct TempFiles {
    paths: Vec<PathBuf>,
}

impl TempFiles {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track a path for removal. The file does not need to exist yet.
    pub(crate) fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Removed temp file {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove temp file {:?}: {}", path, e),
            }
        }
    }
}
