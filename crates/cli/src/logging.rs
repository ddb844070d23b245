//! Tracing subscriber setup.
//!
//! `-v` flags raise the level of the workspace crates only; dependencies stay
//! at `warn`. `TELEMETRY_BROKER_LOG` replaces the whole filter.

use anyhow::Result;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::cli::{Cli, LogFormat};

pub const LOG_ENV: &str = "TELEMETRY_BROKER_LOG";

const CRATES: [&str; 9] = [
    "telemetry_broker",
    "contracts",
    "config_loader",
    "stream_registry",
    "sync_engine",
    "session_broker",
    "recording",
    "ingestion",
    "observability",
];

/// 默认过滤指令
fn default_directives(verbose: u8, quiet: bool) -> String {
    let level = match (quiet, verbose) {
        (true, _) => return "warn".to_string(),
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    std::iter::once("warn".to_string())
        .chain(CRATES.iter().map(|c| format!("{c}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn init(cli: &Cli) -> Result<()> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) if !cli.quiet => filter,
        _ => EnvFilter::try_new(default_directives(cli.verbose, cli.quiet))?,
    };

    let fmt_layer = match cli.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_names(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_scopes_to_workspace() {
        let directives = default_directives(1, false);
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("sync_engine=debug"));
        assert!(directives.contains("telemetry_broker=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());

        assert!(default_directives(3, false).contains("session_broker=trace"));
        assert_eq!(default_directives(2, true), "warn");
    }
}
