//! # reelsmith-av
//!
//! External media tool plumbing for the reelsmith assembly pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support; the child process is killed if the future is dropped.
//! - **Media capability** ([`MediaTool`]) -- the narrow probe / fit / strip /
//!   mux / fade / concat interface the pipeline is written against.
//! - **ffmpeg backend** ([`FfmpegTool`]) -- [`MediaTool`] implemented by
//!   shelling out to ffmpeg and ffprobe.

pub mod command;
pub mod ffmpeg;
pub mod media_tool;
pub mod probe;
pub mod tools;

pub use command::{ToolCommand, ToolOutput};
pub use ffmpeg::{EncodeSettings, FfmpegTool};
pub use media_tool::{FadeSpec, MediaTool, MusicBed, MuxSpec};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
