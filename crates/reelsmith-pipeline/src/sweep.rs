//! Stale work-file sweeper.
//!
//! The tracker cleans up after every run it sees finish, but a process that
//! is killed outright leaves its run directory behind. Sweeping the work
//! directory at startup removes anything older than a cutoff age.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use reelsmith_core::{Error, Result};

/// Totals from one [`sweep_stale`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub bytes_freed: u64,
    pub failures: Vec<PathBuf>,
}

/// Remove files under `dir` last modified at least `max_age` ago, then any
/// directory that was itself stale and is now empty.
///
/// `dir` itself is never removed. A missing `dir` yields an empty report.
///
/// # Errors
///
/// Returns [`Error::Validation`] if `dir` exists but is not a directory.
pub fn sweep_stale(dir: &Path, max_age: Duration) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    if !dir.exists() {
        return Ok(report);
    }
    if !dir.is_dir() {
        return Err(Error::Validation(format!(
            "sweep target is not a directory: {}",
            dir.display()
        )));
    }

    let now = SystemTime::now();
    let is_stale = |modified: SystemTime| {
        now.duration_since(modified)
            .map(|age| age >= max_age)
            .unwrap_or(false)
    };

    let mut stale_dirs = Vec::new();

    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Error walking work directory");
                None
            }
        })
    {
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), error = %err, "Cannot stat entry");
                continue;
            }
        };
        let Ok(modified) = meta.modified() else {
            continue;
        };
        if !is_stale(modified) {
            continue;
        }

        if entry.file_type().is_dir() {
            stale_dirs.push(entry.into_path());
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                report.files_removed += 1;
                report.bytes_freed += meta.len();
            }
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), error = %err, "Failed to remove stale file");
                report.failures.push(entry.into_path());
            }
        }
    }

    // Deepest first so a parent is empty by the time it is tried.
    for path in stale_dirs.iter().rev() {
        if std::fs::remove_dir(path).is_ok() {
            report.dirs_removed += 1;
        }
    }

    if report.files_removed > 0 || report.dirs_removed > 0 {
        tracing::info!(
            dir = %dir.display(),
            files = report.files_removed,
            dirs = report.dirs_removed,
            bytes = report.bytes_freed,
            "Swept stale work files"
        );
    }

    Ok(report)
}
