//! Unified error type for reelsmith.
//!
//! Every stage failure is funnelled into [`Error`]. The assembly pipeline wraps
//! the underlying cause in [`Error::Stage`] so callers see one terminal error
//! that names the failing stage.

use std::path::PathBuf;

/// Unified error type covering all failure modes in reelsmith.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration or request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) failed to spawn, timed out, or
    /// exited non-zero. `message` carries the tool's diagnostic output.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Duration probing produced no usable value.
    #[error("Probe error: {0}")]
    Probe(String),

    /// Fetching a remote media reference failed.
    #[error("Fetch error [{source_ref}]: {message}")]
    Fetch {
        /// The remote reference that was being fetched.
        source_ref: String,
        /// Human-readable error description.
        message: String,
    },

    /// A local media reference does not exist.
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// A pipeline stage failed; the cause is kept as the error source.
    #[error("Stage '{stage}' failed{}", scene_suffix(.scene))]
    Stage {
        /// Name of the stage that failed (e.g. "stage", "mux").
        stage: &'static str,
        /// Scene index the stage was working on, if the stage is per-scene.
        scene: Option<usize>,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Work was cancelled before it could complete.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Catch-all for unexpected internal faults (task panics and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

fn scene_suffix(scene: &Option<usize>) -> String {
    match scene {
        Some(index) => format!(" for scene {index}"),
        None => String::new(),
    }
}

impl Error {
    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Fetch`].
    pub fn fetch(source_ref: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Fetch {
            source_ref: source_ref.into(),
            message: message.into(),
        }
    }

    /// Wrap `self` as the cause of a failed stage.
    ///
    /// An error that is already a stage error is returned unchanged so the
    /// innermost stage name wins.
    pub fn in_stage(self, stage: &'static str, scene: Option<usize>) -> Self {
        match self {
            err @ Error::Stage { .. } => err,
            other => Error::Stage {
                stage,
                scene,
                source: Box::new(other),
            },
        }
    }

    /// Name of the failing stage, if this is a stage error.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Scene index of the failing stage, if known.
    pub fn scene(&self) -> Option<usize> {
        match self {
            Error::Stage { scene, .. } => *scene,
            _ => None,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
