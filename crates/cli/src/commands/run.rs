//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::PlatformBlueprint;
use std::time::Duration;
use tracing::{info, warn};

use super::load_blueprint;
use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    let mut blueprint = load_blueprint(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    apply_overrides(&mut blueprint, args)?;

    info!(
        robots = blueprint.robots.len(),
        tolerance_ms = blueprint.sync.tolerance_ms,
        output_frequency_hz = blueprint.sync.output_frequency_hz,
        grace_period_s = blueprint.recording.grace_period_s,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        blueprint,
        duration: non_zero_secs(args.duration),
        record_for: non_zero_secs(args.record_secs),
        output_dir: args.output_dir.clone(),
        preview: args.preview,
        tokens: args.tokens.clone(),
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
    };

    info!("Starting pipeline...");
    let stats = Pipeline::new(pipeline_config)
        .run(shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    info!(
        samples_received = stats.samples.samples_received,
        recordings_saved = stats.recordings_saved,
        duration_secs = stats.duration.as_secs_f64(),
        sample_rate = format!("{:.1}", stats.sample_rate()),
        "Pipeline completed successfully"
    );
    stats.print_summary();

    info!("Telemetry Broker finished");
    Ok(())
}

/// Apply command line overrides and re-validate the result
fn apply_overrides(blueprint: &mut PlatformBlueprint, args: &RunArgs) -> Result<(), CliError> {
    if let Some(tolerance_ms) = args.tolerance_ms {
        info!(tolerance_ms, "Overriding sync tolerance from CLI");
        blueprint.sync.tolerance_ms = tolerance_ms;
    }
    if let Some(frequency_hz) = args.frequency_hz {
        info!(frequency_hz, "Overriding output frequency from CLI");
        blueprint.sync.output_frequency_hz = frequency_hz;
    }
    if let Some(grace_period_s) = args.grace_period_s {
        info!(grace_period_s, "Overriding recording grace period from CLI");
        blueprint.recording.grace_period_s = grace_period_s;
    }

    config_loader::ConfigLoader::validate(blueprint)
        .map_err(|e| CliError::invalid_override(e.to_string()))
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &PlatformBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Sync:");
    println!("  Tolerance: {} ms", blueprint.sync.tolerance_ms);
    println!("  Output frequency: {} Hz", blueprint.sync.output_frequency_hz);
    println!("  Pacing: {:?}", blueprint.sync.pacing);

    println!("\nRecording:");
    println!("  Grace period: {} s", blueprint.recording.grace_period_s);
    println!("  Max duration: {} s", blueprint.recording.max_duration_s);

    println!("\nRobots ({}):", blueprint.robots.len());
    for robot in &blueprint.robots {
        println!(
            "  - {}#{} - {} tracks",
            robot.robot_id,
            robot.instance,
            robot.tracks.len()
        );
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    const CONFIG: &str = r#"
[sync]
tolerance_ms = 50.0

[recording]
grace_period_s = 5.0
"#;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["telemetry-broker", "run"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Run(args) => args,
            _ => unreachable!(),
        }
    }

    fn blueprint() -> PlatformBlueprint {
        config_loader::ConfigLoader::load_from_str(CONFIG, config_loader::ConfigFormat::Toml)
            .unwrap()
    }

    #[test]
    fn test_overrides_applied() {
        let mut blueprint = blueprint();
        let args = run_args(&["--tolerance-ms", "20", "--grace-period-s", "2.5"]);
        apply_overrides(&mut blueprint, &args).unwrap();
        assert_eq!(blueprint.sync.tolerance_ms, 20.0);
        assert_eq!(blueprint.recording.grace_period_s, 2.5);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut blueprint = blueprint();
        let args = run_args(&["--frequency-hz", "0"]);
        let err = apply_overrides(&mut blueprint, &args).unwrap_err();
        assert!(matches!(err, CliError::InvalidOverride { .. }));
    }

    #[test]
    fn test_zero_means_unbounded() {
        assert_eq!(non_zero_secs(0), None);
        assert_eq!(non_zero_secs(3), Some(Duration::from_secs(3)));
    }
}
