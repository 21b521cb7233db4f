//! Lag-deferred, idempotent removal of exhausted files.
//!
//! Adjacent contiguous granules can share intermediate artifacts, so a
//! granule's removable files must survive until the next granule's run
//! begins. The lag is modeled as an explicit two-slot queue: files are
//! deferred into `pending_next`, rotated into `pending_now` once per
//! granule, and only then swept from disk.

use std::path::{Path, PathBuf};

/// Two-slot deferred-removal queue.
#[derive(Debug, Default)]
pub struct CleanupManager {
    pending_now: Vec<PathBuf>,
    pending_next: Vec<PathBuf>,
}

impl CleanupManager {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer a file to the next rotation.
    pub fn defer(&mut self, path: PathBuf) {
        tracing::debug!("Deferring removal of {}", path.display());
        self.pending_next.push(path);
    }

    /// Defer a batch of files to the next rotation.
    pub fn defer_all<I: IntoIterator<Item = PathBuf>>(&mut self, paths: I) {
        for path in paths {
            self.defer(path);
        }
    }

    /// Rotate the queue once: the previous granule's deferred files become
    /// due now. Called at the start of each granule's run.
    pub fn rotate(&mut self) {
        let due = std::mem::take(&mut self.pending_next);
        self.pending_now.extend(due);
    }

    /// Delete every file due now. Idempotent: an already-absent file is
    /// logged and skipped, never an error, so a crashed batch can retry.
    pub fn sweep_now(&mut self) -> usize {
        let due = std::mem::take(&mut self.pending_now);
        let mut removed = 0;
        for path in due {
            if remove_idempotent(&path) {
                removed += 1;
            }
        }
        removed
    }

    /// Drop the not-yet-rotated slot without deleting anything. Used when
    /// a granule is retained so its evidence stays on disk.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending_next.len();
        if dropped > 0 {
            tracing::info!("Retaining {} files queued for removal", dropped);
        }
        self.pending_next.clear();
        dropped
    }

    /// Sweep both slots at the end of a batch.
    pub fn flush(&mut self) -> usize {
        self.rotate();
        self.sweep_now()
    }

    /// Files due for removal at the next sweep.
    pub fn pending_now(&self) -> &[PathBuf] {
        &self.pending_now
    }

    /// Files deferred until the next rotation.
    pub fn pending_next(&self) -> &[PathBuf] {
        &self.pending_next
    }
}

/// Remove one file, treating absence as success.
pub fn remove_idempotent(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed {}", path.display());
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("Already absent: {}", path.display());
            false
        }
        Err(e) => {
            // Deletions are best-effort; never propagated.
            tracing::warn!("Unable to remove {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_one_granule_lag() {
        let dir = tempfile::tempdir().unwrap();
        let g1_file = touch(dir.path(), "g1.blob");

        let mut cleanup = CleanupManager::new();

        // Granule 1 runs and marks its file removable.
        cleanup.rotate();
        assert_eq!(cleanup.sweep_now(), 0);
        cleanup.defer(g1_file.clone());
        assert!(g1_file.exists());

        // Granule 2 starts: G1's file becomes due and is swept.
        cleanup.rotate();
        assert_eq!(cleanup.pending_now(), std::slice::from_ref(&g1_file));
        assert_eq!(cleanup.sweep_now(), 1);
        assert!(!g1_file.exists());
    }

    #[test]
    fn test_files_survive_until_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(dir.path(), "shared.blob");

        let mut cleanup = CleanupManager::new();
        cleanup.defer(file.clone());

        // Sweeping without rotating must not touch the deferred file.
        assert_eq!(cleanup.sweep_now(), 0);
        assert!(file.exists());
        assert_eq!(cleanup.pending_next().len(), 1);
    }

    #[test]
    fn test_retained_granule_keeps_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(dir.path(), "evidence.blob");

        let mut cleanup = CleanupManager::new();
        cleanup.defer(file.clone());
        assert_eq!(cleanup.discard_pending(), 1);

        cleanup.rotate();
        assert_eq!(cleanup.sweep_now(), 0);
        assert!(file.exists());
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(dir.path(), "once.blob");

        let mut cleanup = CleanupManager::new();
        cleanup.defer(file.clone());
        cleanup.rotate();
        assert_eq!(cleanup.sweep_now(), 1);

        // Deleting the same set again produces no error and no removal.
        let mut again = CleanupManager::new();
        again.defer(file.clone());
        again.rotate();
        assert_eq!(again.sweep_now(), 0);
    }

    #[test]
    fn test_flush_sweeps_both_slots() {
        let dir = tempfile::tempdir().unwrap();
        let due = touch(dir.path(), "due.blob");
        let deferred = touch(dir.path(), "deferred.blob");

        let mut cleanup = CleanupManager::new();
        cleanup.defer(due.clone());
        cleanup.rotate();
        cleanup.defer(deferred.clone());

        assert_eq!(cleanup.flush(), 2);
        assert!(!due.exists());
        assert!(!deferred.exists());
    }

    #[test]
    fn test_remove_idempotent_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!remove_idempotent(&dir.path().join("never-existed")));
    }
}
