//! Temporary resource tracking.
//!
//! Every intermediate file or directory a run creates is registered here
//! under the run's identifier *before* it is produced. Releasing a run
//! deletes everything registered for it, whether the run succeeded or not.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use reelsmith_core::RunId;

/// Outcome of [`TempResourceTracker::release_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Paths that existed and were deleted.
    pub removed: usize,
    /// Paths that were registered but never created (or already gone).
    pub missing: usize,
    /// Paths that could not be deleted.
    pub failed: Vec<PathBuf>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Registry of temporary paths keyed by run.
///
/// Safe to share across concurrent runs; registrations for different runs
/// never interfere with each other.
#[derive(Debug, Default)]
pub struct TempResourceTracker {
    entries: Mutex<HashMap<RunId, Vec<PathBuf>>>,
}

impl TempResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path` as a temporary resource of `run`.
    ///
    /// Registering the same path twice is harmless.
    pub fn register(&self, run: &RunId, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut entries = self.entries.lock();
        let paths = entries.entry(run.clone()).or_default();
        if !paths.contains(&path) {
            tracing::trace!(run = %run, path = %path.display(), "Registered temp resource");
            paths.push(path);
        }
    }

    /// Paths currently registered for `run`, in registration order.
    pub fn registered(&self, run: &RunId) -> Vec<PathBuf> {
        self.entries.lock().get(run).cloned().unwrap_or_default()
    }

    /// Total number of paths registered across all runs.
    pub fn outstanding(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    /// Delete every path registered for `run` and forget them.
    ///
    /// Never fails: a path that does not exist counts as released, and a
    /// deletion error is logged and reported but does not stop the sweep.
    /// Paths are removed newest first so files go before the directory that
    /// holds them. Calling this again for the same run is a no-op.
    pub fn release_all(&self, run: &RunId) -> ReleaseReport {
        let paths = self.entries.lock().remove(run).unwrap_or_default();
        let mut report = ReleaseReport::default();

        for path in paths.iter().rev() {
            match remove_path(path) {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => report.missing += 1,
                Err(e) => {
                    tracing::warn!(
                        run = %run,
                        path = %path.display(),
                        "Failed to remove temp resource: {e}"
                    );
                    report.failed.push(path.clone());
                }
            }
        }

        if !paths.is_empty() {
            tracing::debug!(
                run = %run,
                removed = report.removed,
                missing = report.missing,
                failed = report.failed.len(),
                "Released temp resources"
            );
        }
        report
    }

    /// Guard that releases `run` when dropped.
    pub fn scope(self: &Arc<Self>, run: RunId) -> RunScope {
        RunScope {
            tracker: Arc::clone(self),
            run,
            released: false,
        }
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Releases a run's temp resources on every exit path, including unwinding
/// and future cancellation.
#[derive(Debug)]
pub struct RunScope {
    tracker: Arc<TempResourceTracker>,
    run: RunId,
    released: bool,
}

impl RunScope {
    pub fn run_id(&self) -> &RunId {
        &self.run
    }

    /// Register a path under this scope's run.
    pub fn register(&self, path: impl Into<PathBuf>) {
        self.tracker.register(&self.run, path);
    }

    /// Release now and return the report. Dropping afterwards does nothing.
    ///
    /// Deletion runs on the blocking pool. It still completes if the
    /// returned future is dropped part way.
    pub async fn release(mut self) -> ReleaseReport {
        self.released = true;
        let tracker = Arc::clone(&self.tracker);
        let run = self.run.clone();
        match tokio::task::spawn_blocking(move || tracker.release_all(&run)).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(run = %self.run, "Temp resource release task failed: {e}");
                self.tracker.release_all(&self.run)
            }
        }
    }
}

impl Drop for RunScope {
    fn drop(&mut self) {
        if !self.released {
            self.tracker.release_all(&self.run);
        }
    }
}
