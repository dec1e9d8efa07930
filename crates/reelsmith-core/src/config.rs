//! Application configuration types.
//!
//! The top-level [`Config`] carries the assembly, tool, download, and retry
//! sections. Every section defaults sensibly so an empty file is valid. The
//! binary decides where the file comes from; this module only describes its
//! shape.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub assembly: AssemblyConfig,
    pub tools: ToolsConfig,
    pub download: DownloadConfig,
    pub retry: RetryConfig,
}

impl Config {
    /// Return a list of validation warnings (non-fatal issues).
    ///
    /// Values that would make the pipeline or retry policy unusable are
    /// rejected again, as hard errors, when those are constructed.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let a = &self.assembly;

        if a.max_concurrent_jobs == 0 {
            warnings.push("assembly.max_concurrent_jobs is 0; no scene could ever run".into());
        }
        if !(a.fade_duration_secs >= 0.0) {
            warnings.push("assembly.fade_duration_secs must be zero or positive".into());
        }
        if !(0.0..=1.0).contains(&a.music_volume) {
            warnings.push(format!(
                "assembly.music_volume {} is outside 0.0..=1.0; music may drown the narration",
                a.music_volume
            ));
        }
        if a.work_dir == a.output_dir {
            warnings.push(
                "assembly.work_dir equals assembly.output_dir; the stale sweeper may delete outputs"
                    .into(),
            );
        }
        if self.tools.timeout_secs == 0 {
            warnings.push("tools.timeout_secs is 0; every tool call will time out".into());
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts must be at least 1".into());
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            warnings.push("retry.backoff_multiplier must be at least 1.0".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Media assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Directory under which each run gets its own scratch directory.
    pub work_dir: PathBuf,
    /// Directory receiving finished advertisements.
    pub output_dir: PathBuf,
    /// Length of the fade-in/fade-out applied at interior clip edges.
    pub fade_duration_secs: f64,
    /// Background music volume relative to narration (narration is 1.0).
    pub music_volume: f32,
    /// Upper bound on concurrently processed scenes, shared by all runs of
    /// one pipeline instance.
    pub max_concurrent_jobs: usize,
    /// Video encoder used for the final concatenation.
    pub video_codec: String,
    /// Pixel format forced on the final concatenation.
    pub pixel_format: String,
    /// Audio encoder used when muxing and concatenating.
    pub audio_codec: String,
    /// Sweep stale leftovers from the work directory before assembling.
    pub sweep_on_start: bool,
    /// Age after which an untracked file in the work directory is stale.
    pub sweep_max_age_hours: u64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("reelsmith");
        Self {
            work_dir: base.join("work"),
            output_dir: base.join("output"),
            fade_duration_secs: 0.7,
            music_volume: 0.2,
            max_concurrent_jobs: num_cpus::get().max(1),
            video_codec: "libx264".into(),
            pixel_format: "yuv420p".into(),
            audio_codec: "aac".into(),
            sweep_on_start: true,
            sweep_max_age_hours: 48,
        }
    }
}

impl AssemblyConfig {
    /// Fade length as a [`Duration`]; negative or NaN values collapse to zero.
    pub fn fade_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.fade_duration_secs).unwrap_or(Duration::ZERO)
    }

    /// Sweep age as a [`Duration`].
    pub fn sweep_max_age(&self) -> Duration {
        Duration::from_secs(self.sweep_max_age_hours.saturating_mul(3600))
    }
}

/// External tool path overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// Maximum runtime of a single tool invocation before it is killed.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            timeout_secs: 300,
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Remote fetch settings used when staging scene clips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Backoff settings for upstream generation calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Cap on any single backoff sleep.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 12_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 300_000,
        }
    }
}
