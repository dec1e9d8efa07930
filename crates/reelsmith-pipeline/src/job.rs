//! Scene jobs, pipeline runs, and the run status state machine.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use reelsmith_core::{Error, Result, RunId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// MediaSource
// ---------------------------------------------------------------------------

/// Where a scene's pre-rendered video lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MediaSource {
    /// An `http://` or `https://` URI that must be fetched.
    Remote(String),
    /// A caller-owned local file, used in place and never deleted.
    Local(PathBuf),
}

impl MediaSource {
    /// Classify a reference string by its scheme.
    pub fn parse(reference: &str) -> Self {
        let trimmed = reference.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            MediaSource::Remote(trimmed.to_string())
        } else {
            MediaSource::Local(PathBuf::from(trimmed))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, MediaSource::Remote(_))
    }
}

impl From<String> for MediaSource {
    fn from(s: String) -> Self {
        MediaSource::parse(&s)
    }
}

impl From<&str> for MediaSource {
    fn from(s: &str) -> Self {
        MediaSource::parse(s)
    }
}

impl From<PathBuf> for MediaSource {
    fn from(p: PathBuf) -> Self {
        MediaSource::Local(p)
    }
}

impl From<MediaSource> for String {
    fn from(source: MediaSource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::Remote(url) => f.write_str(url),
            MediaSource::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

// ---------------------------------------------------------------------------
// SceneMediaJob
// ---------------------------------------------------------------------------

/// One scene's video + narration pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneMediaJob {
    scene_index: usize,
    video_source: MediaSource,
    narration_source: PathBuf,
    probed_duration: Option<f64>,
    stage_artifacts: Vec<PathBuf>,
}

impl SceneMediaJob {
    pub fn new(
        scene_index: usize,
        video_source: impl Into<MediaSource>,
        narration_source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scene_index,
            video_source: video_source.into(),
            narration_source: narration_source.into(),
            probed_duration: None,
            stage_artifacts: Vec::new(),
        }
    }

    pub fn scene_index(&self) -> usize {
        self.scene_index
    }

    pub fn video_source(&self) -> &MediaSource {
        &self.video_source
    }

    pub fn narration_source(&self) -> &Path {
        &self.narration_source
    }

    /// Duration of the staged video, once probed.
    pub fn probed_duration(&self) -> Option<f64> {
        self.probed_duration
    }

    /// Record the probed duration. It can be set exactly once.
    pub fn set_probed_duration(&mut self, seconds: f64) -> Result<()> {
        if let Some(existing) = self.probed_duration {
            return Err(Error::Internal(format!(
                "scene {} duration already probed as {existing}s",
                self.scene_index
            )));
        }
        self.probed_duration = Some(seconds);
        Ok(())
    }

    /// Temp files produced for this job, in creation order.
    pub fn stage_artifacts(&self) -> &[PathBuf] {
        &self.stage_artifacts
    }

    pub(crate) fn push_artifact(&mut self, path: PathBuf) {
        self.stage_artifacts.push(path);
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a [`PipelineRun`]. Variants are declared in stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Staging,
    Fitting,
    Muxing,
    Fading,
    Concatenating,
    Encoding,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Staging => "staging",
            RunStatus::Fitting => "fitting",
            RunStatus::Muxing => "muxing",
            RunStatus::Fading => "fading",
            RunStatus::Concatenating => "concatenating",
            RunStatus::Encoding => "encoding",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Progress of a single scene job through its per-scene stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPhase {
    Queued,
    Staging,
    Fitting,
    Muxing,
    Fading,
    Done,
}

impl JobPhase {
    /// The run status implied when this is the least advanced job.
    pub fn run_status(self) -> RunStatus {
        match self {
            JobPhase::Queued | JobPhase::Staging => RunStatus::Staging,
            JobPhase::Fitting => RunStatus::Fitting,
            JobPhase::Muxing => RunStatus::Muxing,
            JobPhase::Fading | JobPhase::Done => RunStatus::Fading,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineRun
// ---------------------------------------------------------------------------

/// One assembly request.
///
/// Jobs are held in ascending `scene_index` order, which is the order of the
/// final video. Nothing after construction reorders them.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    run_id: RunId,
    jobs: Vec<SceneMediaJob>,
    background_music: Option<PathBuf>,
    output_name: String,
    status: RunStatus,
}

impl PipelineRun {
    /// Create a pending run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if there are no jobs, two jobs share a
    /// scene index, or `output_name` is not a plain file name.
    pub fn new(
        run_id: impl Into<RunId>,
        output_name: impl Into<String>,
        mut jobs: Vec<SceneMediaJob>,
    ) -> Result<Self> {
        let output_name = output_name.into();

        if jobs.is_empty() {
            return Err(Error::Validation("a run needs at least one scene".into()));
        }

        let mut seen = HashSet::with_capacity(jobs.len());
        for job in &jobs {
            if !seen.insert(job.scene_index) {
                return Err(Error::Validation(format!(
                    "duplicate scene index {}",
                    job.scene_index
                )));
            }
        }

        let is_plain_name = !output_name.is_empty()
            && Path::new(&output_name).file_name().and_then(|n| n.to_str())
                == Some(output_name.as_str());
        if !is_plain_name {
            return Err(Error::Validation(format!(
                "output name {output_name:?} must be a plain file name"
            )));
        }

        jobs.sort_by_key(|j| j.scene_index);

        Ok(Self {
            run_id: run_id.into(),
            jobs,
            background_music: None,
            output_name,
            status: RunStatus::Pending,
        })
    }

    /// Mix `path` under every scene's narration.
    pub fn with_background_music(mut self, path: impl Into<PathBuf>) -> Self {
        self.background_music = Some(path.into());
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn jobs(&self) -> &[SceneMediaJob] {
        &self.jobs
    }

    pub fn background_music(&self) -> Option<&Path> {
        self.background_music.as_deref()
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Move forward to `next`.
    ///
    /// Returns `Ok(false)` when already at `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] for a backward move or any move out of a
    /// terminal state. Moving to [`RunStatus::Failed`] is always allowed from
    /// a non-terminal state.
    pub fn advance(&mut self, next: RunStatus) -> Result<bool> {
        if self.status == next {
            return Ok(false);
        }
        if self.status.is_terminal() || next < self.status {
            return Err(Error::Internal(format!(
                "illegal run transition {} -> {next}",
                self.status
            )));
        }
        self.status = next;
        Ok(true)
    }

    /// Mark the run failed unless it already reached a terminal state.
    pub fn fail(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = RunStatus::Failed;
        true
    }

    /// Swap in jobs that finished processing. Order and indices must match.
    pub(crate) fn replace_jobs(&mut self, jobs: Vec<SceneMediaJob>) {
        debug_assert!(jobs
            .iter()
            .map(|j| j.scene_index)
            .eq(self.jobs.iter().map(|j| j.scene_index)));
        self.jobs = jobs;
    }
}
