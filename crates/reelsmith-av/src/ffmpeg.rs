//! [`MediaTool`] backed by the ffmpeg and ffprobe command-line tools.
//!
//! Argument construction is kept in plain functions so the exact command
//! lines can be checked without ffmpeg installed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reelsmith_core::config::AssemblyConfig;
use reelsmith_core::Result;

use crate::media_tool::{FadeSpec, MediaTool, MuxSpec};
use crate::tools::ToolRegistry;

/// Codecs used wherever audio or video is re-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub pixel_format: String,
    pub audio_codec: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".into(),
            pixel_format: "yuv420p".into(),
            audio_codec: "aac".into(),
        }
    }
}

impl From<&AssemblyConfig> for EncodeSettings {
    fn from(config: &AssemblyConfig) -> Self {
        Self {
            video_codec: config.video_codec.clone(),
            pixel_format: config.pixel_format.clone(),
            audio_codec: config.audio_codec.clone(),
        }
    }
}

/// ffmpeg/ffprobe implementation of [`MediaTool`].
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    tools: Arc<ToolRegistry>,
    settings: EncodeSettings,
}

impl FfmpegTool {
    pub fn new(tools: Arc<ToolRegistry>, settings: EncodeSettings) -> Self {
        Self { tools, settings }
    }

    pub fn settings(&self) -> &EncodeSettings {
        &self.settings
    }

    async fn run_ffmpeg(&self, args: Vec<String>) -> Result<()> {
        let ffmpeg = self.tools.require("ffmpeg")?;
        let mut cmd = ffmpeg.command();
        cmd.args(["-hide_banner", "-nostdin", "-y"]);
        cmd.args(args);
        cmd.execute().await?;
        Ok(())
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        crate::probe::probe_duration(&self.tools, path).await
    }

    async fn fit_audio(&self, audio: &Path, duration: f64, output: &Path) -> Result<()> {
        self.run_ffmpeg(fit_audio_args(audio, duration, output)).await
    }

    async fn strip_audio(&self, video: &Path, output: &Path) -> Result<()> {
        self.run_ffmpeg(strip_audio_args(video, output)).await
    }

    async fn mux(&self, spec: &MuxSpec<'_>) -> Result<()> {
        self.run_ffmpeg(mux_args(spec, &self.settings)).await
    }

    async fn fade(&self, input: &Path, output: &Path, spec: &FadeSpec) -> Result<()> {
        self.run_ffmpeg(fade_args(input, output, spec, &self.settings))
            .await
    }

    async fn concat(&self, clips: &[PathBuf], output: &Path, scratch: &Path) -> Result<()> {
        tokio::fs::write(scratch, concat_manifest(clips)).await?;
        self.run_ffmpeg(concat_args(scratch, output, &self.settings))
            .await
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn secs(value: f64) -> String {
    format!("{value:.6}")
}

/// `apad=whole_dur` pads with silence up to the target and `-t` cuts anything
/// longer, so one command covers both the pad and the truncate case.
pub fn fit_audio_args(audio: &Path, duration: f64, output: &Path) -> Vec<String> {
    let d = secs(duration);
    vec![
        "-i".into(),
        path_arg(audio),
        "-vn".into(),
        "-af".into(),
        format!("apad=whole_dur={d}"),
        "-t".into(),
        d,
        "-c:a".into(),
        "pcm_s16le".into(),
        path_arg(output),
    ]
}

pub fn strip_audio_args(video: &Path, output: &Path) -> Vec<String> {
    vec![
        "-i".into(),
        path_arg(video),
        "-map".into(),
        "0:v".into(),
        "-c:v".into(),
        "copy".into(),
        "-an".into(),
        path_arg(output),
    ]
}

pub fn mux_args(spec: &MuxSpec<'_>, settings: &EncodeSettings) -> Vec<String> {
    let mut args = vec![
        "-i".into(),
        path_arg(spec.video),
        "-i".into(),
        path_arg(spec.narration),
    ];

    match spec.music {
        Some(music) => {
            args.extend([
                "-i".into(),
                path_arg(&music.path),
                "-filter_complex".into(),
                format!(
                    "[1:a]volume=1.0[a1];[2:a]volume={}[a2];[a1][a2]amix=inputs=2:duration=shortest[a]",
                    music.volume
                ),
                "-map".into(),
                "0:v".into(),
                "-map".into(),
                "[a]".into(),
            ]);
        }
        None => {
            args.extend(["-map".into(), "0:v".into(), "-map".into(), "1:a".into()]);
        }
    }

    args.extend([
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        settings.audio_codec.clone(),
        path_arg(spec.output),
    ]);
    args
}

pub fn fade_args(
    input: &Path,
    output: &Path,
    spec: &FadeSpec,
    settings: &EncodeSettings,
) -> Vec<String> {
    if spec.is_noop() {
        return vec![
            "-i".into(),
            path_arg(input),
            "-c".into(),
            "copy".into(),
            path_arg(output),
        ];
    }

    let d = secs(spec.effective_duration());
    let mut video = Vec::new();
    let mut audio = Vec::new();
    if spec.fade_in {
        video.push(format!("fade=t=in:st=0:d={d}"));
        audio.push(format!("afade=t=in:st=0:d={d}"));
    }
    if spec.fade_out {
        let st = secs(spec.fade_out_start());
        video.push(format!("fade=t=out:st={st}:d={d}"));
        audio.push(format!("afade=t=out:st={st}:d={d}"));
    }

    vec![
        "-i".into(),
        path_arg(input),
        "-vf".into(),
        video.join(","),
        "-af".into(),
        audio.join(","),
        "-c:v".into(),
        settings.video_codec.clone(),
        "-pix_fmt".into(),
        settings.pixel_format.clone(),
        "-c:a".into(),
        settings.audio_codec.clone(),
        path_arg(output),
    ]
}

/// Contents of an ffmpeg concat-demuxer manifest for `clips`.
///
/// The demuxer resolves relative entries against the manifest's own
/// directory, so every entry is written as an absolute path.
pub fn concat_manifest(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|p| {
            let abs = std::path::absolute(p).unwrap_or_else(|_| p.clone());
            format!("file '{}'\n", path_arg(&abs).replace('\'', r"'\''"))
        })
        .collect()
}

pub fn concat_args(manifest: &Path, output: &Path, settings: &EncodeSettings) -> Vec<String> {
    vec![
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        path_arg(manifest),
        "-c:v".into(),
        settings.video_codec.clone(),
        "-pix_fmt".into(),
        settings.pixel_format.clone(),
        "-c:a".into(),
        settings.audio_codec.clone(),
        "-movflags".into(),
        "+faststart".into(),
        path_arg(output),
    ]
}
