mod cli;

use reelsmith::{config, manifest::RunManifest};
use reelsmith_av::{EncodeSettings, FfmpegTool, ToolRegistry};
use reelsmith_pipeline::{
    sweep_stale, MediaAssemblyPipeline, PipelineSettings, Stager, StatusSender,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelsmith=trace,reelsmith_pipeline=trace,reelsmith_av=debug,reelsmith_core=debug"
                .to_string()
        } else {
            "reelsmith=info,reelsmith_pipeline=info,reelsmith_av=warn,reelsmith_core=info"
                .to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Assemble {
            manifest,
            output_dir,
            concurrency,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(assemble(
                &manifest,
                cli.config.as_deref(),
                output_dir,
                concurrency,
            ))
        }
        Commands::Probe { file } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, cli.config.as_deref()))
        }
        Commands::CheckTools => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(cli.config.as_deref()))
        }
        Commands::Sweep { dir, max_age_hours } => sweep(cli.config.as_deref(), dir, max_age_hours),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reelsmith {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn assemble(
    manifest_path: &Path,
    config_path: Option<&Path>,
    output_dir: Option<PathBuf>,
    concurrency: Option<usize>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some(dir) = output_dir {
        config.assembly.output_dir = dir;
    }
    if let Some(n) = concurrency {
        config.assembly.max_concurrent_jobs = n;
    }

    if !manifest_path.exists() {
        anyhow::bail!("Manifest does not exist: {:?}", manifest_path);
    }
    let base_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let mut run = RunManifest::load(manifest_path)?.into_run(&base_dir)?;

    if config.assembly.sweep_on_start {
        match sweep_stale(&config.assembly.work_dir, config.assembly.sweep_max_age()) {
            Ok(report) if report.files_removed > 0 => {
                tracing::info!(
                    "Removed {} stale work files ({} bytes)",
                    report.files_removed,
                    report.bytes_freed
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Stale sweep failed: {e}"),
        }
    }

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    if !tools.is_complete() {
        anyhow::bail!("ffmpeg and ffprobe are required; run `reelsmith check-tools`");
    }
    let media = Arc::new(FfmpegTool::new(tools, EncodeSettings::from(&config.assembly)));
    let stager = Stager::new(config.download.timeout())?;
    let pipeline = MediaAssemblyPipeline::new(
        media,
        stager,
        PipelineSettings::from_config(&config.assembly),
    )?
    .with_status(StatusSender::new(|run_id, status| {
        tracing::info!(run = %run_id, "Status: {status}");
    }));

    let run_id = run.run_id().clone();
    println!("Assembling {} scene(s) for run {}", run.jobs().len(), run_id);
    let output = pipeline
        .assemble(&mut run)
        .await
        .with_context(|| format!("Run {run_id} failed"))?;

    println!("Output: {}", output.display());
    Ok(())
}

async fn probe_file(file: &Path, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools);
    let duration = reelsmith_av::probe::probe_duration(&tools, file).await?;

    println!("File: {}", file.display());
    println!("Duration: {:.3}s", duration);
    Ok(())
}

async fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools).check_all().await;
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to assemble videos.");
    }

    Ok(())
}

fn sweep(
    config_path: Option<&Path>,
    dir: Option<PathBuf>,
    max_age_hours: Option<u64>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let dir = dir.unwrap_or_else(|| config.assembly.work_dir.clone());
    let max_age = max_age_hours
        .map(|h| Duration::from_secs(h.saturating_mul(3600)))
        .unwrap_or_else(|| config.assembly.sweep_max_age());

    let report = sweep_stale(&dir, max_age)?;
    println!("Swept {}", dir.display());
    println!("  Files removed: {}", report.files_removed);
    println!("  Directories removed: {}", report.dirs_removed);
    println!("  Bytes freed: {}", report.bytes_freed);
    if !report.failures.is_empty() {
        println!("  Could not remove: {}", report.failures.len());
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    let a = &config.assembly;
    println!("  Work dir: {}", a.work_dir.display());
    println!("  Output dir: {}", a.output_dir.display());
    println!("  Fade: {}s", a.fade_duration_secs);
    println!("  Music volume: {}", a.music_volume);
    println!("  Max concurrent jobs: {}", a.max_concurrent_jobs);
    println!(
        "  Retry: {} attempts, {}ms base delay, x{}",
        config.retry.max_attempts, config.retry.base_delay_ms, config.retry.backoff_multiplier
    );
    for warning in config.validate() {
        println!("  warning: {warning}");
    }

    Ok(())
}
