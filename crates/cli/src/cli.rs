//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Telemetry Broker - robot telemetry synchronization and session brokering
#[derive(Parser, Debug)]
#[command(
    name = "telemetry-broker",
    author,
    version,
    about = "Robot telemetry synchronization and session broker",
    long_about = "Aligns multi-modal robot telemetry onto a common time base.\n\n\
                  Publishes simulated robot tracks, synchronizes their samples at a \n\
                  fixed output frequency, brokers consumer connections and records \n\
                  synchronized data to storage."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TELEMETRY_BROKER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TELEMETRY_BROKER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the simulated robots: sync, broker and optional recording
    Run(RunArgs),

    /// Record every robot for a few seconds and check the results
    Record(RecordArgs),

    /// Print the discovery payload the configured robots advertise
    Registry(RegistryArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Run(_) => "run",
            Commands::Record(_) => "record",
            Commands::Registry(_) => "registry",
            Commands::Validate(_) => "validate",
        }
    }
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "broker.toml",
        env = "TELEMETRY_BROKER_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the alignment tolerance (ms)
    #[arg(long, env = "TELEMETRY_BROKER_TOLERANCE_MS")]
    pub tolerance_ms: Option<f64>,

    /// Override the default output frequency (Hz)
    #[arg(long, env = "TELEMETRY_BROKER_FREQUENCY_HZ")]
    pub frequency_hz: Option<f64>,

    /// Override the recording grace period (seconds)
    #[arg(long, env = "TELEMETRY_BROKER_GRACE_PERIOD_S")]
    pub grace_period_s: Option<f64>,

    /// Stop after this many seconds (0 = run until Ctrl+C)
    #[arg(long, default_value = "0", env = "TELEMETRY_BROKER_DURATION")]
    pub duration: u64,

    /// Record every robot for this many seconds (0 = no recording)
    #[arg(long, default_value = "0", env = "TELEMETRY_BROKER_RECORD_SECS")]
    pub record_secs: u64,

    /// Write recordings as JSON into this directory instead of logging them
    #[arg(long, env = "TELEMETRY_BROKER_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Attach a live preview subscriber to every robot
    #[arg(long)]
    pub preview: bool,

    /// Comma separated list of accepted consumer tokens (empty = accept any)
    #[arg(long, default_value = "", env = "TELEMETRY_BROKER_TOKENS")]
    pub tokens: String,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "TELEMETRY_BROKER_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "broker.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `record` command
#[derive(Parser, Debug, Clone)]
pub struct RecordArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "broker.toml",
        env = "TELEMETRY_BROKER_CONFIG"
    )]
    pub config: PathBuf,

    /// Recording length in seconds
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u64).range(1..))]
    pub secs: u64,

    /// Recording frequency (Hz), defaults to the sync output frequency
    #[arg(long)]
    pub frequency_hz: Option<f64>,

    /// Keep the recordings as JSON in this directory
    #[arg(long, env = "TELEMETRY_BROKER_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,
}

/// Arguments for the `registry` command
#[derive(Parser, Debug)]
pub struct RegistryArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "broker.toml")]
    pub config: PathBuf,

    /// Only show this robot
    #[arg(long)]
    pub robot: Option<String>,

    /// Output the raw discovery payload as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::parse_from([
            "telemetry-broker",
            "-v",
            "run",
            "--config",
            "robots.toml",
            "--tolerance-ms",
            "25",
            "--record-secs",
            "3",
            "--preview",
        ]);
        assert_eq!(cli.verbose, 1);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config, PathBuf::from("robots.toml"));
        assert_eq!(args.tolerance_ms, Some(25.0));
        assert_eq!(args.record_secs, 3);
        assert!(args.preview);
        assert!(args.output_dir.is_none());
    }

    #[test]
    fn test_record_args_parse() {
        let cli = Cli::parse_from([
            "telemetry-broker",
            "record",
            "--secs",
            "2",
            "--frequency-hz",
            "30",
        ]);
        let Commands::Record(args) = cli.command else {
            panic!("expected record");
        };
        assert_eq!(args.secs, 2);
        assert_eq!(args.frequency_hz, Some(30.0));
        assert!(Cli::try_parse_from(["telemetry-broker", "record", "--secs", "0"]).is_err());
    }

    #[test]
    fn test_registry_args_parse() {
        let cli = Cli::parse_from(["telemetry-broker", "registry", "--robot", "robot-7", "--json"]);
        let Commands::Registry(args) = cli.command else {
            panic!("expected registry");
        };
        assert_eq!(args.robot.as_deref(), Some("robot-7"));
        assert!(args.json);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["telemetry-broker", "-q", "-v", "validate"]);
        assert!(result.is_err());
    }
}
