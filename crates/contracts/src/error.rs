//! Layered error definitions
//!
//! `ContractError` covers configuration; every crate error maps onto the
//! shared `ErrorKind` taxonomy.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Unified configuration error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Classify for ContractError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Unavailable,
            _ => ErrorKind::InvalidInput,
        }
    }
}

impl From<validator::ValidationErrors> for ContractError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let (field, message) = first_violation(&errors, "")
            .unwrap_or_else(|| ("<unknown>".to_string(), errors.to_string()));
        Self::ConfigValidation { field, message }
    }
}

/// First failing field, with its dotted path through nested sections
fn first_violation(errors: &validator::ValidationErrors, prefix: &str) -> Option<(String, String)> {
    use validator::ValidationErrorsKind;

    let join = |field: &str| {
        if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        }
    };
    for (field, kind) in errors.errors() {
        let path = join(field);
        let found = match kind {
            ValidationErrorsKind::Field(errs) => errs.first().map(|e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                (path, message)
            }),
            ValidationErrorsKind::Struct(inner) => first_violation(inner, &path),
            ValidationErrorsKind::List(items) => items
                .iter()
                .find_map(|(idx, inner)| first_violation(inner, &format!("{path}[{idx}]"))),
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Error classification shared by every component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    CapacityExceeded,
    ProtocolViolation,
    Timeout,
    StorageError,
    OutOfOrderSample,
    InvalidTransition,
    Unauthorized,
    InvalidInput,
    Unavailable,
}

impl ErrorKind {
    /// Whether the caller may retry the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::CapacityExceeded
                | ErrorKind::Timeout
                | ErrorKind::StorageError
                | ErrorKind::Unavailable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::OutOfOrderSample => "out_of_order_sample",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every component error
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Failure reported by an external collaborator (token service, storage)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// May succeed on retry
    #[error("transient collaborator failure: {0}")]
    Transient(String),

    #[error("collaborator failure: {0}")]
    Permanent(String),

    #[error("collaborator call timed out after {0:?}")]
    Timeout(Duration),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

impl Classify for CollaboratorError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::StorageError,
        }
    }
}
