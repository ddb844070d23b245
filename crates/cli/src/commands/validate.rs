//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{PacingMode, PlatformBlueprint};
use serde::Serialize;
use tracing::info;

use super::load_blueprint;
use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    robot_count: usize,
    track_count: usize,
    tolerance_ms: f64,
    output_frequency_hz: f64,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    match load_blueprint(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            let track_count = blueprint.robots.iter().map(|r| r.tracks.len()).sum();

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    robot_count: blueprint.robots.len(),
                    track_count,
                    tolerance_ms: blueprint.sync.tolerance_ms,
                    output_frequency_hz: blueprint.sync.output_frequency_hz,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &PlatformBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.robots.is_empty() {
        warnings.push("No robots configured - `run` will not publish any tracks".to_string());
    }

    for robot in &blueprint.robots {
        if robot.tracks.is_empty() {
            warnings.push(format!(
                "Robot '{}#{}' has no tracks configured",
                robot.robot_id, robot.instance
            ));
        }
        for track in &robot.tracks {
            if track.jitter_ms > blueprint.sync.tolerance_ms {
                warnings.push(format!(
                    "Track '{}' on '{}#{}' jitters more than the sync tolerance ({} > {} ms)",
                    track.label,
                    robot.robot_id,
                    robot.instance,
                    track.jitter_ms,
                    blueprint.sync.tolerance_ms
                ));
            }
        }
    }

    if blueprint.sync.pacing == PacingMode::External {
        warnings.push(
            "sync.pacing is external - `run` does not advance the cursors by itself".to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Robots: {}", summary.robot_count);
            println!("  Tracks: {}", summary.track_count);
            println!("  Tolerance: {} ms", summary.tolerance_ms);
            println!("  Output frequency: {} Hz", summary.output_frequency_hz);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
