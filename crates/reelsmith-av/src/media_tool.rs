//! The narrow media capability the assembly pipeline is written against.
//!
//! Pipeline logic never builds tool command lines itself; it asks a
//! [`MediaTool`] to probe, fit, strip, mux, fade, or concatenate. Swapping
//! the concrete toolchain (or substituting a fake in tests) only means
//! providing another implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reelsmith_core::Result;

/// Background music mixed under the narration.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicBed {
    pub path: PathBuf,
    /// Volume relative to narration (narration plays at 1.0).
    pub volume: f32,
}

/// Inputs for combining a silent video with narration.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxSpec<'a> {
    pub video: &'a Path,
    pub narration: &'a Path,
    pub music: Option<&'a MusicBed>,
    pub output: &'a Path,
}

/// Which edges of a clip fade, and how.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeSpec {
    pub fade_in: bool,
    pub fade_out: bool,
    /// Fade length in seconds.
    pub duration: f64,
    /// Measured total length of the clip in seconds.
    pub clip_duration: f64,
}

impl FadeSpec {
    /// Second at which the fade-out begins, so that it ends exactly at the
    /// end of the clip. Never negative.
    pub fn fade_out_start(&self) -> f64 {
        (self.clip_duration - self.duration).max(0.0)
    }

    /// Fade length clamped to the clip length.
    pub fn effective_duration(&self) -> f64 {
        self.duration.min(self.clip_duration).max(0.0)
    }

    /// Whether any fade is applied at all.
    pub fn is_noop(&self) -> bool {
        (!self.fade_in && !self.fade_out) || self.effective_duration() <= 0.0
    }
}

/// Media operations needed to assemble an advertisement.
///
/// Every method writes to the `output` path it is given; callers decide where
/// artifacts live and when they are removed.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Short name for logs (e.g. "ffmpeg").
    fn name(&self) -> &'static str;

    /// Duration of a media file in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Pad `audio` with trailing silence or truncate it so that it lasts
    /// exactly `duration` seconds. Never time-stretches.
    async fn fit_audio(&self, audio: &Path, duration: f64, output: &Path) -> Result<()>;

    /// Copy the video stream of `video` bit-for-bit, dropping all audio.
    async fn strip_audio(&self, video: &Path, output: &Path) -> Result<()>;

    /// Combine a silent video with narration (and optional music).
    async fn mux(&self, spec: &MuxSpec<'_>) -> Result<()>;

    /// Apply video and audio fades to one clip.
    async fn fade(&self, input: &Path, output: &Path, spec: &FadeSpec) -> Result<()>;

    /// Join `clips` in order into one uniformly re-encoded file.
    ///
    /// `scratch` is a path the implementation may use for a side file (such
    /// as a concat manifest); the caller owns and removes it.
    async fn concat(&self, clips: &[PathBuf], output: &Path, scratch: &Path) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_out_starts_before_end() {
        let spec = FadeSpec {
            fade_in: true,
            fade_out: true,
            duration: 0.7,
            clip_duration: 5.0,
        };
        assert!((spec.fade_out_start() - 4.3).abs() < 1e-9);
        assert!(!spec.is_noop());
    }

    #[test]
    fn fade_longer_than_clip_is_clamped() {
        let spec = FadeSpec {
            fade_in: false,
            fade_out: true,
            duration: 2.0,
            clip_duration: 1.5,
        };
        assert_eq!(spec.fade_out_start(), 0.0);
        assert_eq!(spec.effective_duration(), 1.5);
    }

    #[test]
    fn no_edges_is_noop() {
        let spec = FadeSpec {
            fade_in: false,
            fade_out: false,
            duration: 0.7,
            clip_duration: 5.0,
        };
        assert!(spec.is_noop());
    }

    #[test]
    fn zero_duration_is_noop() {
        let spec = FadeSpec {
            fade_in: true,
            fade_out: true,
            duration: 0.0,
            clip_duration: 5.0,
        };
        assert!(spec.is_noop());
    }
}
