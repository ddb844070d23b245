//! Error types for CLI operations.

use contracts::ContractError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration failed to load or validate
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ContractError),

    /// Command line overrides produced an invalid configuration
    #[error("Invalid override: {message}")]
    InvalidOverride { message: String },

    /// Pipeline execution error
    #[error("Pipeline execution failed: {message}")]
    PipelineExecution { message: String },

    /// A recording smoke run did not produce the expected recordings
    #[error("Recording check failed: {message}")]
    RecordingCheck { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn invalid_override(message: impl Into<String>) -> Self {
        Self::InvalidOverride {
            message: message.into(),
        }
    }

    pub fn recording_check(message: impl Into<String>) -> Self {
        Self::RecordingCheck {
            message: message.into(),
        }
    }

    /// Configuration problems exit with 2, runtime failures with 1
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ConfigNotFound { .. } | Self::Config(_) | Self::InvalidOverride { .. } => 2,
            Self::RecordingCheck { .. } | Self::PipelineExecution { .. } | Self::Io(_) => 1,
        }
    }

    pub fn pipeline_execution(message: impl Into<String>) -> Self {
        Self::PipelineExecution {
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
