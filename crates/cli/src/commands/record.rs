//! `record` command implementation.
//!
//! Smoke run of the recording path: every configured robot is recorded for
//! `--secs`, and the command fails unless each recording was saved with at
//! least one frame.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use super::load_blueprint;
use crate::cli::RecordArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig, PipelineStats};

/// Time the run continues after the recordings are stopped
const SETTLE: Duration = Duration::from_millis(500);

/// Execute the `record` command
pub async fn run_record(args: &RecordArgs) -> Result<()> {
    let mut blueprint = load_blueprint(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if let Some(frequency_hz) = args.frequency_hz {
        blueprint.recording.frequency_hz = Some(frequency_hz);
        config_loader::ConfigLoader::validate(&blueprint)
            .map_err(|e| CliError::invalid_override(e.to_string()))?;
    }

    let record_for = Duration::from_secs(args.secs);
    info!(
        robots = blueprint.robots.len(),
        secs = args.secs,
        output_dir = ?args.output_dir,
        "Starting recording smoke run"
    );

    let stats = Pipeline::new(PipelineConfig {
        blueprint,
        duration: Some(record_for + SETTLE),
        record_for: Some(record_for),
        output_dir: args.output_dir.clone(),
        preview: false,
        tokens: String::new(),
        metrics_port: None,
    })
    .run(std::future::pending())
    .await
    .context("Recording run failed")?;

    println!(
        "Recorded {} robots: {} saved, {} failed, {} frames",
        stats.robots, stats.recordings_saved, stats.recordings_failed, stats.frames_recorded
    );
    if let Some(dir) = &args.output_dir {
        println!("Recordings written to {}", dir.display());
    }

    check_outcome(&stats)?;
    Ok(())
}

/// Every robot needs a saved, non-empty recording
fn check_outcome(stats: &PipelineStats) -> Result<(), CliError> {
    if stats.robots == 0 {
        return Err(CliError::recording_check("no robots configured"));
    }
    let saved = stats.recordings_saved as usize;
    if saved < stats.robots || stats.recordings_failed > 0 {
        return Err(CliError::recording_check(format!(
            "{} of {} recordings saved, {} failed",
            saved, stats.robots, stats.recordings_failed
        )));
    }
    if stats.frames_recorded == 0 {
        return Err(CliError::recording_check("recordings hold no frames"));
    }
    Ok(())
}
