//! Run manifests: the JSON file handed to `reelsmith assemble`.
//!
//! ```json
//! {
//!   "run_id": "campaign-42",
//!   "output_name": "spring-sale.mp4",
//!   "background_music": "music/bed.mp3",
//!   "scenes": [
//!     { "video": "https://cdn.example.com/s0.mp4", "narration": "voice/s0.mp3" },
//!     { "scene_index": 1, "video": "clips/s1.mp4", "narration": "voice/s1.mp3" }
//!   ]
//! }
//! ```
//!
//! Relative local paths resolve against the manifest's own directory.

use anyhow::{Context, Result};
use reelsmith_core::RunId;
use reelsmith_pipeline::{MediaSource, PipelineRun, SceneMediaJob};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_output_name() -> String {
    "advertisement.mp4".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Generated when absent.
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default = "default_output_name")]
    pub output_name: String,
    #[serde(default)]
    pub background_music: Option<PathBuf>,
    pub scenes: Vec<SceneEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneEntry {
    /// Defaults to the entry's position in `scenes`.
    #[serde(default)]
    pub scene_index: Option<usize>,
    pub video: MediaSource,
    pub narration: PathBuf,
}

impl RunManifest {
    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {:?}", path))
    }

    /// Build a pending [`PipelineRun`], resolving relative paths against
    /// `base_dir`.
    pub fn into_run(self, base_dir: &Path) -> Result<PipelineRun> {
        let run_id = self
            .run_id
            .map(RunId::new)
            .unwrap_or_else(RunId::generate);

        let jobs = self
            .scenes
            .into_iter()
            .enumerate()
            .map(|(position, scene)| {
                let video = match scene.video {
                    MediaSource::Local(p) => MediaSource::Local(resolve(base_dir, p)),
                    remote => remote,
                };
                SceneMediaJob::new(
                    scene.scene_index.unwrap_or(position),
                    video,
                    resolve(base_dir, scene.narration),
                )
            })
            .collect();

        let mut run = PipelineRun::new(run_id, self.output_name, jobs)?;
        if let Some(music) = self.background_music {
            run = run.with_background_music(resolve(base_dir, music));
        }
        Ok(run)
    }
}

fn resolve(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
