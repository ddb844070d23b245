//! Command implementations.

mod record;
mod registry;
mod run;
mod validate;

use std::path::Path;

use contracts::PlatformBlueprint;

use crate::cli::Commands;
use crate::error::{CliError, Result};

use record::run_record;
use registry::run_registry;
use run::run_pipeline;
use validate::run_validate;

/// Run one subcommand to completion
pub async fn dispatch(command: &Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run_pipeline(args).await,
        Commands::Record(args) => run_record(args).await,
        Commands::Registry(args) => run_registry(args),
        Commands::Validate(args) => run_validate(args),
    }
}

/// Load and validate a configuration file
fn load_blueprint(path: &Path) -> Result<PlatformBlueprint> {
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()));
    }
    Ok(config_loader::ConfigLoader::load_from_path(path)?)
}
