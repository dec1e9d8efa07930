//! Duration probing via ffprobe.

use std::path::Path;

use reelsmith_core::{Error, Result};

use crate::tools::ToolRegistry;

/// Probe the container duration of `path` in seconds.
pub async fn probe_duration(tools: &ToolRegistry, path: &Path) -> Result<f64> {
    let ffprobe = tools.require("ffprobe")?;

    let mut cmd = ffprobe.command();
    cmd.args([
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ]);
    cmd.arg_path(path);

    let output = cmd.execute().await?;
    parse_duration(&output.stdout)
        .map_err(|e| Error::Probe(format!("{}: {e}", path.display())))
}

/// Parse the single seconds value ffprobe prints for `format=duration`.
///
/// Rejects `N/A`, empty output, and non-positive or non-finite values.
pub fn parse_duration(stdout: &str) -> std::result::Result<f64, String> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| "ffprobe reported no duration".to_string())?;

    let seconds: f64 = line
        .parse()
        .map_err(|_| format!("unparseable duration {line:?}"))?;

    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("invalid duration {seconds}"));
    }
    Ok(seconds)
}
