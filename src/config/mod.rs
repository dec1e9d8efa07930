pub use reelsmith_core::config::*;

use anyhow::{Context, Result};
use reelsmith_core::RetryPolicy;
use reelsmith_pipeline::PipelineSettings;
use std::path::{Path, PathBuf};

/// Locations searched, in order, when no `--config` is given.
const DEFAULT_PATHS: &[&str] = &[
    "./reelsmith.toml",
    "~/.config/reelsmith/config.toml",
    "/etc/reelsmith/config.toml",
];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    expand_paths(&mut config);
    validate_config(&config).with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// First existing file among the default locations.
pub fn find_config_file() -> Option<PathBuf> {
    DEFAULT_PATHS
        .iter()
        .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
        .find(|p| p.exists())
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    match find_config_file() {
        Some(path) => {
            tracing::debug!("Using config file {:?}", path);
            load_config(&path)
        }
        None => Ok(Config::default()),
    }
}

fn expand(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).as_ref()),
        None => path.to_path_buf(),
    }
}

fn expand_paths(config: &mut Config) {
    config.assembly.work_dir = expand(&config.assembly.work_dir);
    config.assembly.output_dir = expand(&config.assembly.output_dir);
    if let Some(p) = config.tools.ffmpeg_path.as_mut() {
        *p = expand(p);
    }
    if let Some(p) = config.tools.ffprobe_path.as_mut() {
        *p = expand(p);
    }
}

/// Reject values the pipeline or retry policy cannot run with, then log the
/// remaining soft warnings.
pub fn validate_config(config: &Config) -> Result<()> {
    PipelineSettings::from_config(&config.assembly).validate()?;
    RetryPolicy::<reelsmith_core::Error>::from_config(&config.retry)?;

    if config.tools.timeout_secs == 0 {
        anyhow::bail!("tools.timeout_secs cannot be 0");
    }

    for warning in config.validate() {
        tracing::warn!("{warning}");
    }

    Ok(())
}
